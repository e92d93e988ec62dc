//! Helpers for constructing vector store payloads.

use crate::vectors::types::VectorRecord;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Build the payload object stored alongside each chunk record.
///
/// The `embedding_degraded` flag is the authoritative marker for the placeholder
/// path; vector contents are never inspected to infer it.
pub(crate) fn build_payload(record: &VectorRecord) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "document_id".into(),
        Value::String(record.document_id.to_string()),
    );
    payload.insert("owner_id".into(), Value::String(record.owner_id.clone()));
    payload.insert("chunk_index".into(), json!(record.chunk_index));
    payload.insert("text".into(), Value::String(record.text.clone()));
    payload.insert(
        "encryption_key_id".into(),
        Value::String(record.encryption_key_id.clone()),
    );
    payload.insert(
        "embedding_degraded".into(),
        Value::Bool(record.outcome.is_degraded()),
    );
    if let crate::vectors::types::EmbeddingOutcome::Unembedded { reason } = &record.outcome {
        payload.insert("degradation_reason".into(), Value::String(reason.clone()));
    }
    payload.insert(
        "metadata".into(),
        json!({
            "filename": record.metadata.filename,
            "extraction_method": record.metadata.extraction_method,
            "embedding_method": record.metadata.embedding_method,
            "chunk_length": record.metadata.chunk_length,
            "total_chunks": record.metadata.total_chunks,
            "processed_at": record.metadata.processed_at,
        }),
    );
    Value::Object(payload)
}

/// Construct an identifier suitable for vector store points.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
