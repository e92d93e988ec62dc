//! Upload coordination: initiation, transfer-chunk accounting, and finalization.

use crate::document::{Document, DocumentStatus, DocumentStore};
use crate::pipeline::types::{PipelineError, PipelineSettings};
use crate::storage::ObjectStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Media types the pipeline accepts for upload.
const ALLOWED_MEDIA_TYPES: &[&str] = &[
    "text/plain",
    "text/markdown",
    "text/csv",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Parameters supplied when a client initiates an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Original filename.
    pub filename: String,
    /// Declared media type.
    pub content_type: String,
    /// Declared size in bytes.
    pub declared_size: u64,
    /// Owning user id.
    pub owner_id: String,
}

/// Handle returned to the client after a successful initiation.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    /// Identifier of the created document.
    pub document_id: Uuid,
    /// Signed destination the client uploads raw bytes to.
    pub upload_url: String,
    /// Seconds until the signed destination expires.
    pub expires_in: u64,
    /// Allocated object storage path.
    pub storage_path: String,
    /// Fixed transfer chunk size in bytes.
    pub transfer_chunk_bytes: u64,
    /// Number of transfer chunks the client must send.
    pub total_transfer_chunks: u32,
}

/// Outcome of recording one transfer-chunk arrival.
#[derive(Debug, Clone, Copy)]
pub struct TransferUpdate {
    /// Transfer chunks acknowledged so far.
    pub processed: u32,
    /// Total transfer chunks in the plan.
    pub total: u32,
    /// True exactly once, on the call that completed the transfer.
    pub upload_complete: bool,
}

/// Issues upload destinations and tracks byte-level transfer completion.
pub struct UploadCoordinator {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    settings: PipelineSettings,
}

impl UploadCoordinator {
    /// Build a coordinator over the given store and object storage.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            objects,
            settings,
        }
    }

    /// Validate an upload request, reject duplicates, and create the document.
    pub async fn initiate(&self, request: UploadRequest) -> Result<UploadHandle, PipelineError> {
        let filename = request.filename.trim();
        if filename.is_empty() {
            return Err(PipelineError::Validation("filename is required".into()));
        }
        if request.declared_size > self.settings.max_upload_bytes {
            return Err(PipelineError::Validation(format!(
                "file exceeds the {} byte limit",
                self.settings.max_upload_bytes
            )));
        }
        if !ALLOWED_MEDIA_TYPES.contains(&request.content_type.as_str()) {
            return Err(PipelineError::Validation(format!(
                "unsupported media type: {}",
                request.content_type
            )));
        }

        let content_hash = identity_hash(&request);
        if let Some(existing) = self
            .store
            .find_completed_duplicate(&request.owner_id, &content_hash)
            .await?
        {
            tracing::info!(
                existing_id = %existing.id,
                owner = %request.owner_id,
                "Duplicate upload rejected"
            );
            return Err(PipelineError::Duplicate {
                existing: existing.id,
            });
        }

        let document = Document::new(
            request.owner_id.clone(),
            filename.to_string(),
            request.content_type.clone(),
            request.declared_size,
            content_hash,
        );
        let document_id = document.id;
        let storage_path = format!("uploads/{document_id}/{filename}");

        let total_transfer_chunks =
            transfer_chunk_count(request.declared_size, self.settings.transfer_chunk_bytes);

        self.store.insert(document).await?;
        self.store
            .create_transfer_state(document_id, total_transfer_chunks)
            .await?;
        self.store
            .set_storage_path(document_id, &storage_path)
            .await?;

        let destination = self
            .objects
            .create_signed_upload_destination(&storage_path)
            .await?;

        tracing::info!(
            document_id = %document_id,
            owner = %request.owner_id,
            size = request.declared_size,
            transfer_chunks = total_transfer_chunks,
            "Upload initiated"
        );

        Ok(UploadHandle {
            document_id,
            upload_url: destination.url,
            expires_in: destination.expires_in,
            storage_path,
            transfer_chunk_bytes: self.settings.transfer_chunk_bytes,
            total_transfer_chunks,
        })
    }

    /// Record one transfer-chunk arrival.
    ///
    /// Safe under concurrent calls for disjoint chunk indices; the completion
    /// transition fires exactly once even when the callback is re-delivered.
    pub async fn record_transfer_chunk(
        &self,
        document_id: Uuid,
        chunk_index: u32,
    ) -> Result<TransferUpdate, PipelineError> {
        let document = self.store.get(document_id).await?;
        if document.status == DocumentStatus::Pending {
            // First chunk observed; tolerate losing the race to another chunk.
            let _ = self
                .store
                .transition(document_id, DocumentStatus::Uploading)
                .await;
        }

        let progress = self
            .store
            .record_transfer_chunk(document_id, chunk_index)
            .await?;

        if progress.newly_complete {
            self.store
                .transition(document_id, DocumentStatus::Uploaded)
                .await?;
        }

        Ok(TransferUpdate {
            processed: progress.processed,
            total: progress.total,
            upload_complete: progress.newly_complete,
        })
    }

    /// Explicit finalize for small/single-request uploads.
    pub async fn complete(&self, document_id: Uuid) -> Result<(), PipelineError> {
        let document = self.store.get(document_id).await?;
        match document.status {
            DocumentStatus::Pending => {
                self.store
                    .transition(document_id, DocumentStatus::Uploading)
                    .await?;
                self.store
                    .transition(document_id, DocumentStatus::Uploaded)
                    .await?;
            }
            DocumentStatus::Uploading => {
                self.store
                    .transition(document_id, DocumentStatus::Uploaded)
                    .await?;
            }
            other => {
                return Err(PipelineError::Validation(format!(
                    "upload cannot be completed from status {}",
                    other.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Number of fixed-size transfer chunks needed for a declared size; minimum 1.
pub fn transfer_chunk_count(declared_size: u64, chunk_bytes: u64) -> u32 {
    let chunk_bytes = chunk_bytes.max(1);
    (declared_size.div_ceil(chunk_bytes)).max(1) as u32
}

/// Deterministic identity hash used for duplicate detection.
///
/// Raw bytes are not available at initiation time, so the hash covers the declared
/// identity of the upload rather than its content.
pub fn identity_hash(request: &UploadRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.owner_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.filename.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.declared_size.to_be_bytes());
    hasher.update(b"\0");
    hasher.update(request.content_type.as_bytes());
    hex::encode(hasher.finalize())
}
