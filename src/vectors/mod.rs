//! Vector store integration: chunk record persistence over HTTP.

mod client;
mod payload;
mod types;

pub use client::VectorStoreService;
pub use types::{ChunkMetadata, EmbeddingOutcome, VectorRecord, VectorStoreError};
