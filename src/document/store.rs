//! Persistence seam for documents, transfer accounting, and encryption keys.
//!
//! The relational metadata store is an external collaborator, so the pipeline only
//! depends on the [`DocumentStore`] trait. [`MemoryDocumentStore`] is the bundled
//! implementation used by the binary and the test suite; a SQL-backed implementation
//! plugs in behind the same trait.

use crate::document::types::{Document, DocumentStatus, ErrorClass, ExtractionStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors raised by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document exists with the given identifier.
    #[error("document not found: {0}")]
    NotFound(Uuid),
    /// The requested status change violates the state machine.
    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state.
        from: DocumentStatus,
        /// Requested state.
        to: DocumentStatus,
    },
    /// Chunk counters would exceed the known total.
    #[error("chunk counters exceed total_chunks for document {0}")]
    CounterOverflow(Uuid),
    /// No transfer state was registered for the document.
    #[error("no transfer state for document {0}")]
    MissingTransferState(Uuid),
    /// No active encryption key is available.
    #[error("no active encryption key")]
    NoActiveKey,
    /// Backend-specific failure.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Result of recording one transfer-chunk arrival.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    /// Transfer chunks acknowledged so far.
    pub processed: u32,
    /// Total transfer chunks in the plan.
    pub total: u32,
    /// True exactly once: on the call that observed the final chunk.
    pub newly_complete: bool,
}

/// Read-only view of an encryption key record.
#[derive(Debug, Clone)]
pub struct EncryptionKey {
    /// Key identifier recorded on every chunk record.
    pub id: String,
    /// Key status; the pipeline only consumes `active` keys.
    pub key_status: String,
    /// Creation timestamp used to pick the most recent active key.
    pub created_at: OffsetDateTime,
}

/// Store operations required by the pipeline.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a freshly created document.
    async fn insert(&self, document: Document) -> Result<(), StoreError>;

    /// Fetch a document by id.
    async fn get(&self, id: Uuid) -> Result<Document, StoreError>;

    /// Find a `completed` document with the same owner and identity hash.
    async fn find_completed_duplicate(
        &self,
        owner_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>, StoreError>;

    /// Move a document to `next`, enforcing the state machine and stamping
    /// milestone progress plus lifecycle timestamps.
    async fn transition(&self, id: Uuid, next: DocumentStatus) -> Result<Document, StoreError>;

    /// Record the allocated object storage location.
    async fn set_storage_path(&self, id: Uuid, path: &str) -> Result<(), StoreError>;

    /// Record extraction statistics once parsing completes.
    async fn set_extraction(&self, id: Uuid, stats: ExtractionStats) -> Result<(), StoreError>;

    /// Set the total chunk count once chunking has run.
    async fn set_total_chunks(&self, id: Uuid, total: usize) -> Result<(), StoreError>;

    /// Add to the processed/failed chunk counters, rejecting counter overflow
    /// past `total_chunks`.
    async fn add_chunk_counts(
        &self,
        id: Uuid,
        processed: usize,
        failed: usize,
    ) -> Result<Document, StoreError>;

    /// Raise the progress percentage (monotonic; lower values are ignored).
    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError>;

    /// Attach a non-fatal warning (degraded completions).
    async fn set_warning(&self, id: Uuid, warning: &str) -> Result<(), StoreError>;

    /// Mark a document failed: transition, set the user-facing message, and append
    /// a classified entry to the error history.
    async fn record_failure(
        &self,
        id: Uuid,
        class: ErrorClass,
        stage: &str,
        message: &str,
        detail: &str,
    ) -> Result<(), StoreError>;

    /// Correlate an external-parser callback to an in-flight document.
    ///
    /// The parser callback carries no caller-supplied token, so this is a recency
    /// heuristic: prefer the most recently dispatched `parsing` document without a
    /// correlation token, falling back to the most recent `parsing` document
    /// regardless of token state. The match is stamped with `token` under the same
    /// lock, so a duplicated delivery cannot claim the same document twice. A
    /// SQL-backed implementation should use `SELECT ... FOR UPDATE SKIP LOCKED`
    /// here. Under concurrent uploads the heuristic can misattribute a callback;
    /// that risk is inherent to the parser's callback contract.
    async fn claim_parser_candidate(&self, token: &str) -> Result<Option<Document>, StoreError>;

    /// Look up a document by a previously stamped correlation token.
    async fn find_by_parser_task(&self, token: &str) -> Result<Option<Document>, StoreError>;

    /// Register the transfer plan for a document.
    async fn create_transfer_state(&self, id: Uuid, total: u32) -> Result<(), StoreError>;

    /// Record one transfer-chunk arrival with a single atomic increment-and-compare.
    ///
    /// Safe under concurrent calls for disjoint chunk indices; calls after the state
    /// is already complete are idempotent no-ops (`newly_complete` stays false).
    async fn record_transfer_chunk(
        &self,
        id: Uuid,
        chunk_index: u32,
    ) -> Result<TransferProgress, StoreError>;

    /// Identifier of the most recently created key with `key_status = active`.
    async fn active_encryption_key(&self) -> Result<String, StoreError>;
}

struct TransferState {
    total: u32,
    processed: AtomicU32,
}

/// In-memory [`DocumentStore`] implementation.
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, Document>>,
    transfers: RwLock<HashMap<Uuid, Arc<TransferState>>>,
    keys: RwLock<Vec<EncryptionKey>>,
}

impl MemoryDocumentStore {
    /// Create an empty store seeded with a single active encryption key.
    pub fn new() -> Self {
        Self::with_keys(vec![EncryptionKey {
            id: format!("key-{}", Uuid::new_v4()),
            key_status: "active".to_string(),
            created_at: OffsetDateTime::now_utc(),
        }])
    }

    /// Create a store with an explicit key table.
    pub fn with_keys(keys: Vec<EncryptionKey>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            transfers: RwLock::new(HashMap::new()),
            keys: RwLock::new(keys),
        }
    }

    fn apply_transition(document: &mut Document, next: DocumentStatus) -> Result<(), StoreError> {
        if !document.status.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                from: document.status,
                to: next,
            });
        }
        let now = OffsetDateTime::now_utc();
        match next {
            DocumentStatus::Uploading => document.upload_started_at = Some(now),
            DocumentStatus::Uploaded => document.upload_completed_at = Some(now),
            DocumentStatus::Parsing => document.parsing_dispatched_at = Some(now),
            DocumentStatus::Completed | DocumentStatus::Failed => {
                document.processing_completed_at = Some(now);
            }
            _ => {}
        }
        document.status = next;
        if next != DocumentStatus::Failed {
            document.bump_progress(next.progress_milestone());
        }
        Ok(())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, document: Document) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        documents.insert(document.id, document);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Document, StoreError> {
        let documents = self.documents.read().await;
        documents.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn find_completed_duplicate(
        &self,
        owner_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>, StoreError> {
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .find(|doc| {
                doc.owner_id == owner_id
                    && doc.content_hash == content_hash
                    && doc.status == DocumentStatus::Completed
            })
            .cloned())
    }

    async fn transition(&self, id: Uuid, next: DocumentStatus) -> Result<Document, StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        Self::apply_transition(document, next)?;
        tracing::debug!(document_id = %id, status = next.as_str(), "Document transitioned");
        Ok(document.clone())
    }

    async fn set_storage_path(&self, id: Uuid, path: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        document.storage_path = Some(path.to_string());
        Ok(())
    }

    async fn set_extraction(&self, id: Uuid, stats: ExtractionStats) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        document.extraction = Some(stats);
        Ok(())
    }

    async fn set_total_chunks(&self, id: Uuid, total: usize) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        document.total_chunks = Some(total);
        Ok(())
    }

    async fn add_chunk_counts(
        &self,
        id: Uuid,
        processed: usize,
        failed: usize,
    ) -> Result<Document, StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let next_processed = document.processed_chunks + processed;
        let next_failed = document.failed_chunks + failed;
        if let Some(total) = document.total_chunks
            && next_processed + next_failed > total
        {
            return Err(StoreError::CounterOverflow(id));
        }
        document.processed_chunks = next_processed;
        document.failed_chunks = next_failed;
        Ok(document.clone())
    }

    async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        document.bump_progress(progress);
        Ok(())
    }

    async fn set_warning(&self, id: Uuid, warning: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        document.warning = Some(warning.to_string());
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        class: ErrorClass,
        stage: &str,
        message: &str,
        detail: &str,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !document.status.is_terminal() {
            Self::apply_transition(document, DocumentStatus::Failed)?;
        }
        document.error_message = Some(message.to_string());
        document.push_error(class, stage, detail);
        tracing::warn!(document_id = %id, stage, ?class, message, "Document failed");
        Ok(())
    }

    async fn claim_parser_candidate(&self, token: &str) -> Result<Option<Document>, StoreError> {
        // Single write lock covers both the candidate query and the token stamp.
        let mut documents = self.documents.write().await;
        let dispatched_at = |doc: &Document| doc.parsing_dispatched_at.unwrap_or(doc.created_at);

        let preferred = documents
            .values()
            .filter(|doc| doc.status == DocumentStatus::Parsing && doc.parser_task_id.is_none())
            .max_by_key(|doc| dispatched_at(doc))
            .map(|doc| doc.id);
        let candidate = preferred.or_else(|| {
            documents
                .values()
                .filter(|doc| doc.status == DocumentStatus::Parsing)
                .max_by_key(|doc| dispatched_at(doc))
                .map(|doc| doc.id)
        });

        match candidate {
            Some(id) => {
                let document = documents
                    .get_mut(&id)
                    .expect("candidate id came from the same map");
                document.parser_task_id = Some(token.to_string());
                Ok(Some(document.clone()))
            }
            None => Ok(None),
        }
    }

    async fn find_by_parser_task(&self, token: &str) -> Result<Option<Document>, StoreError> {
        let documents = self.documents.read().await;
        Ok(documents
            .values()
            .find(|doc| doc.parser_task_id.as_deref() == Some(token))
            .cloned())
    }

    async fn create_transfer_state(&self, id: Uuid, total: u32) -> Result<(), StoreError> {
        let mut transfers = self.transfers.write().await;
        transfers.insert(
            id,
            Arc::new(TransferState {
                total: total.max(1),
                processed: AtomicU32::new(0),
            }),
        );
        Ok(())
    }

    async fn record_transfer_chunk(
        &self,
        id: Uuid,
        chunk_index: u32,
    ) -> Result<TransferProgress, StoreError> {
        let state = {
            let transfers = self.transfers.read().await;
            transfers
                .get(&id)
                .cloned()
                .ok_or(StoreError::MissingTransferState(id))?
        };

        // Atomic increment-and-compare; never exceeds total, so the
        // `prev + 1 == total` observation fires exactly once.
        let result = state
            .processed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < state.total).then_some(current + 1)
            });

        match result {
            Ok(prev) => {
                let processed = prev + 1;
                tracing::trace!(document_id = %id, chunk_index, processed, total = state.total, "Transfer chunk recorded");
                Ok(TransferProgress {
                    processed,
                    total: state.total,
                    newly_complete: processed == state.total,
                })
            }
            Err(_) => Ok(TransferProgress {
                processed: state.total,
                total: state.total,
                newly_complete: false,
            }),
        }
    }

    async fn active_encryption_key(&self) -> Result<String, StoreError> {
        let keys = self.keys.read().await;
        keys.iter()
            .filter(|key| key.key_status == "active")
            .max_by_key(|key| key.created_at)
            .map(|key| key.id.clone())
            .ok_or(StoreError::NoActiveKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        Document::new(
            "user-1".into(),
            "report.pdf".into(),
            "application/pdf".into(),
            1024,
            "hash-1".into(),
        )
    }

    #[tokio::test]
    async fn transition_enforces_state_machine() {
        let store = MemoryDocumentStore::new();
        let doc = sample_document();
        let id = doc.id;
        store.insert(doc).await.unwrap();

        let err = store
            .transition(id, DocumentStatus::Vectorizing)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));

        let updated = store.transition(id, DocumentStatus::Uploading).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::Uploading);
        assert!(updated.upload_started_at.is_some());
    }

    #[tokio::test]
    async fn transfer_completion_fires_exactly_once() {
        let store = MemoryDocumentStore::new();
        let doc = sample_document();
        let id = doc.id;
        store.insert(doc).await.unwrap();
        store.create_transfer_state(id, 3).await.unwrap();

        let first = store.record_transfer_chunk(id, 0).await.unwrap();
        let second = store.record_transfer_chunk(id, 1).await.unwrap();
        let third = store.record_transfer_chunk(id, 2).await.unwrap();
        assert!(!first.newly_complete);
        assert!(!second.newly_complete);
        assert!(third.newly_complete);

        // Duplicate delivery after completion is an idempotent no-op.
        let again = store.record_transfer_chunk(id, 2).await.unwrap();
        assert!(!again.newly_complete);
        assert_eq!(again.processed, 3);
    }

    #[tokio::test]
    async fn concurrent_transfer_chunks_complete_exactly_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        let doc = sample_document();
        let id = doc.id;
        store.insert(doc).await.unwrap();
        store.create_transfer_state(id, 8).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..8u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.record_transfer_chunk(id, index).await.unwrap()
            }));
        }
        let mut completions = 0;
        for handle in handles {
            if handle.await.unwrap().newly_complete {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn chunk_counters_never_exceed_total() {
        let store = MemoryDocumentStore::new();
        let doc = sample_document();
        let id = doc.id;
        store.insert(doc).await.unwrap();
        store.set_total_chunks(id, 3).await.unwrap();

        store.add_chunk_counts(id, 2, 1).await.unwrap();
        let err = store.add_chunk_counts(id, 1, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::CounterOverflow(_)));
    }

    #[tokio::test]
    async fn claim_prefers_tokenless_parsing_documents_most_recent_first() {
        let store = MemoryDocumentStore::new();

        let older = sample_document();
        let older_id = older.id;
        store.insert(older).await.unwrap();
        store.transition(older_id, DocumentStatus::Uploading).await.unwrap();
        store.transition(older_id, DocumentStatus::Uploaded).await.unwrap();
        store.transition(older_id, DocumentStatus::Parsing).await.unwrap();

        let newer = sample_document();
        let newer_id = newer.id;
        store.insert(newer).await.unwrap();
        store.transition(newer_id, DocumentStatus::Uploading).await.unwrap();
        store.transition(newer_id, DocumentStatus::Uploaded).await.unwrap();
        store.transition(newer_id, DocumentStatus::Parsing).await.unwrap();

        let claimed = store
            .claim_parser_candidate("task-1")
            .await
            .unwrap()
            .expect("candidate expected");
        assert_eq!(claimed.id, newer_id);

        // Second delivery cannot claim the same document; it falls to the older one.
        let claimed = store
            .claim_parser_candidate("task-2")
            .await
            .unwrap()
            .expect("second candidate expected");
        assert_eq!(claimed.id, older_id);

        let by_token = store.find_by_parser_task("task-1").await.unwrap().unwrap();
        assert_eq!(by_token.id, newer_id);
    }

    #[tokio::test]
    async fn claim_returns_none_without_parsing_documents() {
        let store = MemoryDocumentStore::new();
        let doc = sample_document();
        store.insert(doc).await.unwrap();
        assert!(store.claim_parser_candidate("task").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_lookup_only_matches_completed_documents() {
        let store = MemoryDocumentStore::new();
        let doc = sample_document();
        let id = doc.id;
        let hash = doc.content_hash.clone();
        store.insert(doc).await.unwrap();

        assert!(
            store
                .find_completed_duplicate("user-1", &hash)
                .await
                .unwrap()
                .is_none()
        );

        for status in [
            DocumentStatus::Uploading,
            DocumentStatus::Uploaded,
            DocumentStatus::Parsing,
            DocumentStatus::Chunking,
            DocumentStatus::Vectorizing,
            DocumentStatus::Completed,
        ] {
            store.transition(id, status).await.unwrap();
        }

        let duplicate = store
            .find_completed_duplicate("user-1", &hash)
            .await
            .unwrap();
        assert_eq!(duplicate.unwrap().id, id);
    }

    #[tokio::test]
    async fn active_key_is_most_recent_active() {
        let now = OffsetDateTime::now_utc();
        let store = MemoryDocumentStore::with_keys(vec![
            EncryptionKey {
                id: "key-old".into(),
                key_status: "active".into(),
                created_at: now - time::Duration::days(7),
            },
            EncryptionKey {
                id: "key-retired".into(),
                key_status: "retired".into(),
                created_at: now,
            },
            EncryptionKey {
                id: "key-new".into(),
                key_status: "active".into(),
                created_at: now - time::Duration::days(1),
            },
        ]);
        assert_eq!(store.active_encryption_key().await.unwrap(), "key-new");
    }
}
