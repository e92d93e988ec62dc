//! The document ingestion pipeline: upload, parse, chunk, embed, persist.

pub mod chunking;
pub mod dispatch;
pub mod embedder;
pub mod service;
pub mod types;
pub mod upload;
pub mod webhook;

pub use chunking::{ChunkingError, chunk_text};
pub use dispatch::{DispatchOutcome, HttpParserClient, ParseSubmission, ParserClient, ParsingDispatcher};
pub use embedder::{EmbeddingBatchProcessor, EmbeddingRunReport};
pub use service::{PipelineApi, PipelineService};
pub use types::{ParsedPage, PipelineError, PipelineSettings, WebhookEvent, WebhookSource};
pub use upload::{TransferUpdate, UploadCoordinator, UploadHandle, UploadRequest};
pub use webhook::{WebhookOutcome, WebhookRouter};
