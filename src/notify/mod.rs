//! Fire-and-forget progress notification channel.
//!
//! Progress events are UI hints, never pipeline state: the notifier buffers them in a
//! bounded queue drained by a background sender task, drops on overflow, and swallows
//! sink failures. Nothing here can block or fail the pipeline.

use crate::document::DocumentStatus;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One progress event emitted toward the notification sink.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Owning user id.
    pub user_id: String,
    /// Document the event describes.
    pub document_id: Uuid,
    /// Event payload forwarded to the sink.
    pub payload: ProgressPayload,
}

/// Payload body of a progress event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressPayload {
    /// Event type tag; always `document_progress`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Document id repeated for sink consumers.
    #[serde(rename = "documentId")]
    pub document_id: Uuid,
    /// Progress percentage at emission time.
    pub progress: u8,
    /// Lifecycle status at emission time.
    pub status: String,
    /// RFC3339 emission timestamp.
    pub timestamp: String,
    /// Optional free-form details (stage messages, warnings).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Best-effort notifier backed by a bounded queue and a background sender.
#[derive(Clone)]
pub struct ProgressNotifier {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressNotifier {
    /// Spawn the background sender and return the notifier handle.
    ///
    /// When `sink_url` is `None`, events are logged at trace level and discarded,
    /// which keeps local runs and tests quiet.
    pub fn spawn(capacity: usize, sink_url: Option<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(capacity.max(1));
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            while let Some(event) = rx.recv().await {
                match &sink_url {
                    Some(url) => {
                        if let Err(err) = client.post(url).json(&event).send().await {
                            tracing::warn!(
                                document_id = %event.document_id,
                                error = %err,
                                "Progress notification delivery failed; dropping event"
                            );
                        }
                    }
                    None => {
                        tracing::trace!(
                            document_id = %event.document_id,
                            progress = event.payload.progress,
                            status = %event.payload.status,
                            "Progress event (no sink configured)"
                        );
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queue a progress event; drops with a warning when the queue is full or closed.
    pub fn notify(
        &self,
        user_id: &str,
        document_id: Uuid,
        status: DocumentStatus,
        progress: u8,
        details: Option<Value>,
    ) {
        let event = ProgressEvent {
            user_id: user_id.to_string(),
            document_id,
            payload: ProgressPayload {
                kind: "document_progress",
                document_id,
                progress,
                status: status.as_str().to_string(),
                timestamp: crate::document::current_timestamp_rfc3339(),
                details,
            },
        };
        if let Err(err) = self.tx.try_send(event) {
            tracing::warn!(document_id = %document_id, error = %err, "Progress queue full; dropping event");
        }
    }
}
