//! HTTP surface for the ingestion pipeline.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /uploads` – Validate an upload request, reject duplicates, and return a
//!   signed destination plus the transfer-chunk plan.
//! - `POST /uploads/:id/transfer/:index` – Acknowledge one byte-level transfer chunk;
//!   the final chunk triggers processing.
//! - `POST /uploads/:id/complete` – Finalize a single-request upload and run processing.
//! - `POST /webhooks` – Shared callback endpoint for the parser, storage, and
//!   embedding services.
//! - `GET /documents/:id` – Current document state, progress, and error history.
//! - `GET /metrics` – Operational counters.

use crate::document::error_details_json;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{PipelineApi, PipelineError, UploadRequest, WebhookEvent};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/uploads", post(initiate_upload::<S>))
        .route(
            "/uploads/:id/transfer/:index",
            post(record_transfer_chunk::<S>),
        )
        .route("/uploads/:id/complete", post(complete_upload::<S>))
        .route("/webhooks", post(handle_webhook::<S>))
        .route("/documents/:id", get(get_document::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /uploads`.
#[derive(Deserialize)]
struct InitiateUploadRequest {
    /// Original filename.
    filename: String,
    /// Declared media type.
    content_type: String,
    /// Declared size in bytes.
    size: u64,
    /// Owning user id.
    user_id: String,
}

/// Success response for `POST /uploads`.
#[derive(Serialize)]
struct InitiateUploadResponse {
    document_id: Uuid,
    upload_url: String,
    expires_in: u64,
    storage_path: String,
    transfer_chunk_bytes: u64,
    total_transfer_chunks: u32,
}

async fn initiate_upload<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<InitiateUploadRequest>,
) -> Result<Json<InitiateUploadResponse>, AppError>
where
    S: PipelineApi,
{
    let handle = service
        .initiate_upload(UploadRequest {
            filename: request.filename,
            content_type: request.content_type,
            declared_size: request.size,
            owner_id: request.user_id,
        })
        .await?;
    Ok(Json(InitiateUploadResponse {
        document_id: handle.document_id,
        upload_url: handle.upload_url,
        expires_in: handle.expires_in,
        storage_path: handle.storage_path,
        transfer_chunk_bytes: handle.transfer_chunk_bytes,
        total_transfer_chunks: handle.total_transfer_chunks,
    }))
}

/// Success response for transfer-chunk acknowledgements.
#[derive(Serialize)]
struct TransferResponse {
    processed: u32,
    total: u32,
    upload_complete: bool,
}

async fn record_transfer_chunk<S>(
    State(service): State<Arc<S>>,
    Path((id, index)): Path<(Uuid, u32)>,
) -> Result<Json<TransferResponse>, AppError>
where
    S: PipelineApi,
{
    let update = service.record_transfer_chunk(id, index).await?;
    Ok(Json(TransferResponse {
        processed: update.processed,
        total: update.total,
        upload_complete: update.upload_complete,
    }))
}

async fn complete_upload<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: PipelineApi,
{
    let document = service.complete_upload(id).await?;
    Ok(Json(json!({
        "document_id": document.id,
        "status": document.status.as_str(),
        "progress": document.progress,
    })))
}

async fn handle_webhook<S>(
    State(service): State<Arc<S>>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: PipelineApi,
{
    service.handle_webhook(event).await?;
    Ok(Json(json!({ "received": true })))
}

/// Response body for `GET /documents/:id`.
#[derive(Serialize)]
struct DocumentResponse {
    document_id: Uuid,
    filename: String,
    status: String,
    progress: u8,
    total_chunks: Option<usize>,
    processed_chunks: usize,
    failed_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    error_details: serde_json::Value,
}

async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError>
where
    S: PipelineApi,
{
    let document = service.document(id).await?;
    Ok(Json(DocumentResponse {
        document_id: document.id,
        filename: document.filename,
        status: document.status.as_str().to_string(),
        progress: document.progress,
        total_chunks: document.total_chunks,
        processed_chunks: document.processed_chunks,
        failed_chunks: document.failed_chunks,
        warning: document.warning,
        error_message: document.error_message,
        error_details: error_details_json(&document.error_details),
    }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

struct AppError(PipelineError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Validation(_) | PipelineError::NoCorrelation => StatusCode::BAD_REQUEST,
            PipelineError::Duplicate { .. } => StatusCode::CONFLICT,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match &self.0 {
            PipelineError::Duplicate { existing } => json!({
                "error": self.0.to_string(),
                "existing_document_id": existing,
            }),
            _ => json!({ "error": self.0.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
