//! Shared types used by the vector store client and helpers.

use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned while interacting with the vector store.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Vector store responded with an unexpected status code.
    #[error("Unexpected vector store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from the vector store.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Embedding result carried on each chunk record.
///
/// Degradation is a tagged variant, never a magic all-zero vector: the stored
/// placeholder keeps the collection dimensionality consistent, but downstream
/// consumers must branch on the variant (persisted as an explicit payload flag).
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutcome {
    /// A real vector produced by an embedding provider.
    Embedded(Vec<f32>),
    /// No semantic signal available; text search only.
    Unembedded {
        /// Why the embedding path was skipped or failed.
        reason: String,
    },
}

impl EmbeddingOutcome {
    /// Whether this record took the degraded path.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Unembedded { .. })
    }

    /// The vector to persist: the real embedding, or a fixed-dimensionality placeholder.
    pub fn vector(&self, dimension: usize) -> Vec<f32> {
        match self {
            Self::Embedded(vector) => vector.clone(),
            Self::Unembedded { .. } => vec![0.0; dimension],
        }
    }
}

/// Metadata blob persisted with each chunk record.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    /// Originating filename.
    pub filename: String,
    /// Extraction method used (`external_parser` or `direct`).
    pub extraction_method: String,
    /// Embedding method used (`primary`, `fallback`, or `degraded`).
    pub embedding_method: String,
    /// Character length of the chunk text.
    pub chunk_length: usize,
    /// Total chunk count for the owning document.
    pub total_chunks: usize,
    /// RFC3339 processing timestamp.
    pub processed_at: String,
}

/// One chunk record ready for persistence.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Owning document id.
    pub document_id: Uuid,
    /// Owning user id.
    pub owner_id: String,
    /// Zero-based chunk index; contiguous and unique per document.
    pub chunk_index: usize,
    /// Raw chunk text.
    pub text: String,
    /// Embedding result, tagged.
    pub outcome: EmbeddingOutcome,
    /// Identifier of the encryption key active at processing time.
    pub encryption_key_id: String,
    /// Metadata blob.
    pub metadata: ChunkMetadata,
}
