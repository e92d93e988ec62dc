//! Document entity, lifecycle state machine, and persistence seam.

pub mod store;
pub mod types;

pub use store::{DocumentStore, EncryptionKey, MemoryDocumentStore, StoreError, TransferProgress};
pub use types::{
    Document, DocumentStatus, ErrorClass, ErrorDetail, ExtractionStats, current_timestamp_rfc3339,
    error_details_json,
};
