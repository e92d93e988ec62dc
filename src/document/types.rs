//! Core document entity and lifecycle state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle states of a [`Document`].
///
/// The canonical machine is `pending → uploading → uploaded → parsing → chunking →
/// vectorizing → completed`, with `failed` reachable from every non-terminal state.
/// Historical vocabulary variants (`embedding_in_progress`, `chunks_stored`) are accepted
/// on parse and mapped onto the canonical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Document created, upload not yet started.
    Pending,
    /// Byte-level transfer in progress.
    Uploading,
    /// Raw file fully received in object storage.
    Uploaded,
    /// Waiting on text extraction (external parser or direct).
    Parsing,
    /// Extracted text is being split into overlapping chunks.
    Chunking,
    /// Chunks are being embedded and persisted.
    Vectorizing,
    /// All chunks persisted; terminal.
    Completed,
    /// Unrecoverable error; terminal, kept for audit and dedup lookups.
    Failed,
}

impl DocumentStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `failed` is reachable from every non-terminal state; terminal states accept no
    /// further transitions.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Pending, Uploaded)
                | (Uploading, Uploaded)
                | (Uploaded, Parsing)
                | (Parsing, Chunking)
                | (Chunking, Vectorizing)
                | (Vectorizing, Completed)
        )
    }

    /// Whether this state has no successors.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// Fixed progress milestone associated with entering this state.
    ///
    /// `vectorizing` reports the start of its 70–95 range; the embedding stage updates
    /// progress per batch from there. `pending` reports the upload-initialized milestone.
    pub fn progress_milestone(self) -> u8 {
        match self {
            DocumentStatus::Pending => 5,
            DocumentStatus::Uploading => 10,
            DocumentStatus::Uploaded => 20,
            DocumentStatus::Parsing => 30,
            DocumentStatus::Chunking => 60,
            DocumentStatus::Vectorizing => 70,
            DocumentStatus::Completed => 100,
            DocumentStatus::Failed => 0,
        }
    }

    /// Canonical snake_case name used in payloads and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Vectorizing => "vectorizing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "uploaded" => Ok(Self::Uploaded),
            "parsing" | "processing" => Ok(Self::Parsing),
            "chunking" | "chunks_stored" => Ok(Self::Chunking),
            "vectorizing" | "embedding_in_progress" => Ok(Self::Vectorizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// Classification attached to recorded pipeline errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Provider-reported rate or billing limit; triggers the degradation path.
    QuotaExceeded,
    /// 4xx from an external service; non-retryable.
    ApiError,
    /// Transient connectivity failure; retryable.
    NetworkError,
    /// Malformed input; non-retryable, user-facing.
    ValidationError,
    /// Persistence failure; fatal for the current run on writes.
    DatabaseError,
}

/// One structured entry appended to a document's error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error classification for operator triage.
    pub class: ErrorClass,
    /// Pipeline stage that recorded the error.
    pub stage: String,
    /// Raw provider/system error for diagnosis; never shown to end users.
    pub detail: String,
    /// RFC3339 timestamp of the recording.
    pub recorded_at: String,
}

/// Extraction statistics attached when parsing completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Extraction method used (`external_parser` or `direct`).
    pub method: String,
    /// Number of pages reported by the parser, when known.
    pub page_count: Option<usize>,
    /// Number of images reported by the parser, when known.
    pub image_count: Option<usize>,
}

/// The persisted record representing one user-submitted file through its lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Owning user identifier.
    pub owner_id: String,
    /// Original filename as declared at upload initiation.
    pub filename: String,
    /// Declared media type.
    pub media_type: String,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Identity hash used for duplicate detection.
    pub content_hash: String,
    /// Object storage location, once allocated.
    pub storage_path: Option<String>,
    /// Current lifecycle state.
    pub status: DocumentStatus,
    /// Progress percentage, monotonically non-decreasing within a run.
    pub progress: u8,
    /// Total text chunks, known once chunking has run.
    pub total_chunks: Option<usize>,
    /// Chunks persisted with a real embedding.
    pub processed_chunks: usize,
    /// Chunks that failed embedding and were persisted degraded.
    pub failed_chunks: usize,
    /// Short human-readable error; set whenever `status == failed`.
    pub error_message: Option<String>,
    /// Appended structured error history.
    pub error_details: Vec<ErrorDetail>,
    /// Non-fatal warning surfaced on degraded completions.
    pub warning: Option<String>,
    /// Correlation token assigned when an external parser callback is matched.
    pub parser_task_id: Option<String>,
    /// Extraction statistics recorded when parsing completes.
    pub extraction: Option<ExtractionStats>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Upload start timestamp.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub upload_started_at: Option<OffsetDateTime>,
    /// Upload completion timestamp.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub upload_completed_at: Option<OffsetDateTime>,
    /// Timestamp the document was handed to a parser.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub parsing_dispatched_at: Option<OffsetDateTime>,
    /// Processing completion timestamp (terminal states).
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub processing_completed_at: Option<OffsetDateTime>,
}

impl Document {
    /// Create a fresh document in `pending` at the upload-initialized milestone.
    pub fn new(
        owner_id: String,
        filename: String,
        media_type: String,
        size_bytes: u64,
        content_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            filename,
            media_type,
            size_bytes,
            content_hash,
            storage_path: None,
            status: DocumentStatus::Pending,
            progress: DocumentStatus::Pending.progress_milestone(),
            total_chunks: None,
            processed_chunks: 0,
            failed_chunks: 0,
            error_message: None,
            error_details: Vec::new(),
            warning: None,
            parser_task_id: None,
            extraction: None,
            created_at: OffsetDateTime::now_utc(),
            upload_started_at: None,
            upload_completed_at: None,
            parsing_dispatched_at: None,
            processing_completed_at: None,
        }
    }

    /// Apply a progress update, keeping the value monotonically non-decreasing.
    pub fn bump_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    /// Append an error entry without discarding earlier history.
    pub fn push_error(&mut self, class: ErrorClass, stage: &str, detail: impl Into<String>) {
        self.error_details.push(ErrorDetail {
            class,
            stage: stage.to_string(),
            detail: detail.into(),
            recorded_at: current_timestamp_rfc3339(),
        });
    }
}

/// Current timestamp formatted for payload storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Serialize the appended error history as a JSON array for external consumers.
pub fn error_details_json(details: &[ErrorDetail]) -> Value {
    serde_json::to_value(details).unwrap_or(Value::Null)
}
