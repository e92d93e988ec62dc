//! Core data types and error definitions for the ingestion pipeline.

use crate::document::{ErrorClass, StoreError};
use crate::embedding::EmbeddingClientError;
use crate::storage::StorageError;
use crate::vectors::VectorStoreError;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Hard cap on declared upload size.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
/// Fixed byte-level transfer chunk size.
pub const DEFAULT_TRANSFER_CHUNK_BYTES: u64 = 5 * 1024 * 1024;
/// Default maximum text chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default character overlap between adjacent text chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default number of concurrent embedding requests per batch.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 5;

/// Tunables shared across pipeline stages.
///
/// Components receive these explicitly instead of reading the global config, which
/// keeps the pipeline constructible in tests.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Hard cap on declared upload size in bytes.
    pub max_upload_bytes: u64,
    /// Fixed size of one byte-level transfer chunk.
    pub transfer_chunk_bytes: u64,
    /// Maximum text chunk size in characters.
    pub chunk_size: usize,
    /// Character overlap between adjacent text chunks.
    pub chunk_overlap: usize,
    /// Dimensionality of embedding vectors (and placeholder vectors).
    pub embedding_dimension: usize,
    /// Concurrent embedding requests per batch.
    pub embedding_batch_size: usize,
}

impl PipelineSettings {
    /// Defaults with an explicit embedding dimension.
    pub fn with_dimension(embedding_dimension: usize) -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            transfer_chunk_bytes: DEFAULT_TRANSFER_CHUNK_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embedding_dimension,
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }

    /// Build settings from the loaded configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let defaults = Self::with_dimension(config.embedding_dimension);
        Self {
            max_upload_bytes: config.max_upload_bytes.unwrap_or(defaults.max_upload_bytes),
            transfer_chunk_bytes: config
                .transfer_chunk_bytes
                .unwrap_or(defaults.transfer_chunk_bytes),
            chunk_size: config.chunk_size.unwrap_or(defaults.chunk_size),
            chunk_overlap: config.chunk_overlap.unwrap_or(defaults.chunk_overlap),
            embedding_dimension: config.embedding_dimension,
            embedding_batch_size: config
                .embedding_batch_size
                .unwrap_or(defaults.embedding_batch_size),
        }
    }
}

/// Errors emitted by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or disallowed input; user-facing.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A completed document with the same owner and content hash already exists.
    #[error("duplicate of completed document {existing}")]
    Duplicate {
        /// Identifier of the already-completed document.
        existing: Uuid,
    },
    /// No document exists with the given identifier.
    #[error("document not found: {0}")]
    NotFound(Uuid),
    /// A parser callback could not be matched to any in-flight document.
    #[error("no in-flight document matches the parser callback")]
    NoCorrelation,
    /// The external parsing service rejected a dispatch.
    #[error("parser dispatch failed: {0}")]
    ParserDispatch(String),
    /// Embedding provider failure.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Object storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Vector store failure.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// Document metadata store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Classify the error for recording on the document.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::Duplicate { .. } | Self::NoCorrelation => {
                ErrorClass::ValidationError
            }
            Self::NotFound(_) => ErrorClass::ValidationError,
            Self::ParserDispatch(_) => ErrorClass::ApiError,
            Self::Embedding(err) => err.class(),
            Self::Storage(StorageError::Network(_)) => ErrorClass::NetworkError,
            Self::Storage(_) => ErrorClass::ApiError,
            Self::VectorStore(VectorStoreError::Http(_)) => ErrorClass::NetworkError,
            Self::VectorStore(_) => ErrorClass::DatabaseError,
            Self::Store(_) => ErrorClass::DatabaseError,
        }
    }
}

/// Source tag carried by non-parser webhook payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookSource {
    /// The external parsing service (tag rarely present; shape classification applies).
    ExternalParser,
    /// Object storage lifecycle callbacks.
    Storage,
    /// Embedding provider callbacks.
    Embedding,
    /// Internal re-dispatches.
    Internal,
}

/// One page entry in a parser callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedPage {
    /// One-based page number.
    #[serde(default)]
    pub page: Option<u32>,
    /// Plain text extracted from the page.
    #[serde(default)]
    pub text: Option<String>,
    /// Markdown rendering of the page.
    #[serde(default)]
    pub markdown: Option<String>,
    /// Image descriptors found on the page.
    #[serde(default)]
    pub images: Vec<Value>,
}

/// Inbound webhook payload; a single shape shared by all sources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    /// Optional explicit source tag.
    #[serde(default)]
    pub source: Option<WebhookSource>,
    /// Callback status (`completed` | `failed` | `processing`).
    #[serde(default)]
    pub status: Option<String>,
    /// Document id, present for non-parser sources.
    #[serde(default)]
    pub document_id: Option<Uuid>,
    /// Correlation token, when the source echoes one back.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Plain extracted text.
    #[serde(default)]
    pub text: Option<String>,
    /// Markdown rendering of the document.
    #[serde(default)]
    pub markdown: Option<String>,
    /// Per-page extraction results.
    #[serde(default)]
    pub pages: Option<Vec<ParsedPage>>,
    /// Document-level image descriptors.
    #[serde(default)]
    pub images: Option<Vec<Value>>,
    /// Error string on failed callbacks.
    #[serde(default)]
    pub error: Option<String>,
}
