//! Batched embedding with quota-aware degradation.
//!
//! Chunks are embedded in fixed-size concurrent batches; batches run strictly
//! sequentially so chunk-index persistence stays ordered and progress stays
//! monotonic. Every chunk produces exactly one record: embedding failures degrade
//! to a tagged placeholder record instead of leaving index gaps.

use crate::document::{Document, DocumentStatus, DocumentStore, ErrorClass};
use crate::embedding::{Availability, EmbeddingClient};
use crate::notify::ProgressNotifier;
use crate::pipeline::types::{PipelineError, PipelineSettings};
use crate::vectors::{ChunkMetadata, EmbeddingOutcome, VectorRecord, VectorStoreService};
use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome summary of one embedding run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingRunReport {
    /// Chunks persisted with a real embedding vector.
    pub embedded: usize,
    /// Chunks persisted on the degraded placeholder path.
    pub degraded: usize,
}

/// Embeds chunk batches and persists the resulting records.
pub struct EmbeddingBatchProcessor {
    store: Arc<dyn DocumentStore>,
    vectors: Arc<VectorStoreService>,
    primary: Arc<dyn EmbeddingClient>,
    fallback: Option<Arc<dyn EmbeddingClient>>,
    notifier: ProgressNotifier,
    settings: PipelineSettings,
}

impl EmbeddingBatchProcessor {
    /// Build a processor over the given collaborators.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        vectors: Arc<VectorStoreService>,
        primary: Arc<dyn EmbeddingClient>,
        fallback: Option<Arc<dyn EmbeddingClient>>,
        notifier: ProgressNotifier,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            vectors,
            primary,
            fallback,
            notifier,
            settings,
        }
    }

    /// Embed and persist all chunks for a document, then mark it `completed`.
    ///
    /// Per-chunk embedding failures are contained (the chunk degrades); a failure
    /// while persisting a completed batch is fatal for the run, since partial batch
    /// persistence risks chunk-index gaps.
    pub async fn process(
        &self,
        document: &Document,
        chunks: Vec<String>,
        extraction_method: &str,
    ) -> Result<EmbeddingRunReport, PipelineError> {
        let total = chunks.len();
        self.store
            .transition(document.id, DocumentStatus::Vectorizing)
            .await?;
        self.store.set_total_chunks(document.id, total).await?;
        self.notifier.notify(
            &document.owner_id,
            document.id,
            DocumentStatus::Vectorizing,
            DocumentStatus::Vectorizing.progress_milestone(),
            None,
        );

        let key_id = self.store.active_encryption_key().await?;
        let availability = self.primary.check_availability().await;

        let report = match availability {
            Availability::Unavailable(reason) => {
                tracing::warn!(
                    document_id = %document.id,
                    reason = %reason,
                    "Embedding provider unavailable; storing placeholder vectors"
                );
                self.persist_all_degraded(document, &chunks, extraction_method, &key_id, &reason)
                    .await?
            }
            Availability::Available => {
                self.run_batches(document, &chunks, extraction_method, &key_id)
                    .await?
            }
        };

        self.store
            .transition(document.id, DocumentStatus::Completed)
            .await?;
        if report.degraded > 0 {
            let warning = format!(
                "{} of {} chunks stored without embeddings; semantic search is degraded, text search remains available",
                report.degraded, total
            );
            self.store.set_warning(document.id, &warning).await?;
        }
        self.notifier.notify(
            &document.owner_id,
            document.id,
            DocumentStatus::Completed,
            100,
            Some(json!({ "embedded": report.embedded, "degraded": report.degraded })),
        );
        tracing::info!(
            document_id = %document.id,
            embedded = report.embedded,
            degraded = report.degraded,
            "Embedding run completed"
        );
        Ok(report)
    }

    async fn persist_all_degraded(
        &self,
        document: &Document,
        chunks: &[String],
        extraction_method: &str,
        key_id: &str,
        reason: &str,
    ) -> Result<EmbeddingRunReport, PipelineError> {
        let records: Vec<VectorRecord> = chunks
            .iter()
            .enumerate()
            .map(|(index, text)| {
                self.build_record(
                    document,
                    index,
                    chunks.len(),
                    text.clone(),
                    EmbeddingOutcome::Unembedded {
                        reason: reason.to_string(),
                    },
                    "degraded",
                    extraction_method,
                    key_id,
                )
            })
            .collect();

        self.persist_batch(document, &records).await?;
        self.store
            .add_chunk_counts(document.id, 0, records.len())
            .await?;
        Ok(EmbeddingRunReport {
            embedded: 0,
            degraded: records.len(),
        })
    }

    async fn run_batches(
        &self,
        document: &Document,
        chunks: &[String],
        extraction_method: &str,
        key_id: &str,
    ) -> Result<EmbeddingRunReport, PipelineError> {
        let total = chunks.len();
        let quota_hit = AtomicBool::new(false);
        let mut report = EmbeddingRunReport::default();
        let mut persisted = 0usize;

        for (batch_index, batch) in chunks.chunks(self.settings.embedding_batch_size).enumerate() {
            let base_index = batch_index * self.settings.embedding_batch_size;
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|text| self.embed_one(text, &quota_hit)),
            )
            .await;

            let mut batch_embedded = 0usize;
            let mut batch_degraded = 0usize;
            let records: Vec<VectorRecord> = outcomes
                .into_iter()
                .enumerate()
                .map(|(offset, (outcome, method))| {
                    if outcome.is_degraded() {
                        batch_degraded += 1;
                    } else {
                        batch_embedded += 1;
                    }
                    self.build_record(
                        document,
                        base_index + offset,
                        total,
                        batch[offset].clone(),
                        outcome,
                        method,
                        extraction_method,
                        key_id,
                    )
                })
                .collect();

            self.persist_batch(document, &records).await?;
            self.store
                .add_chunk_counts(document.id, batch_embedded, batch_degraded)
                .await?;

            persisted += records.len();
            report.embedded += batch_embedded;
            report.degraded += batch_degraded;

            let progress = batch_progress(persisted, total);
            self.store.set_progress(document.id, progress).await?;
            self.notifier.notify(
                &document.owner_id,
                document.id,
                DocumentStatus::Vectorizing,
                progress,
                None,
            );
        }

        Ok(report)
    }

    /// Embed a single chunk, degrading through the fallback provider when the
    /// primary has reported quota exhaustion during this run.
    async fn embed_one(
        &self,
        text: &str,
        quota_hit: &AtomicBool,
    ) -> (EmbeddingOutcome, &'static str) {
        if !quota_hit.load(Ordering::SeqCst) {
            match self.primary.embed(text).await {
                Ok(vector) => return (EmbeddingOutcome::Embedded(vector), "primary"),
                Err(err) if err.is_quota() => {
                    tracing::warn!(error = %err, "Primary embedding provider quota exhausted mid-run");
                    quota_hit.store(true, Ordering::SeqCst);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Chunk embedding failed; storing placeholder");
                    return (
                        EmbeddingOutcome::Unembedded {
                            reason: err.to_string(),
                        },
                        "degraded",
                    );
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            match fallback.embed(text).await {
                Ok(vector) => return (EmbeddingOutcome::Embedded(vector), "fallback"),
                Err(err) => {
                    tracing::warn!(error = %err, "Fallback embedding provider failed; storing placeholder");
                    return (
                        EmbeddingOutcome::Unembedded {
                            reason: err.to_string(),
                        },
                        "degraded",
                    );
                }
            }
        }

        (
            EmbeddingOutcome::Unembedded {
                reason: "embedding quota exceeded".to_string(),
            },
            "degraded",
        )
    }

    async fn persist_batch(
        &self,
        document: &Document,
        records: &[VectorRecord],
    ) -> Result<(), PipelineError> {
        if let Err(err) = self
            .vectors
            .insert_records(records, self.settings.embedding_dimension)
            .await
        {
            // Partial batch persistence risks chunk-index gaps; fail the run.
            self.store
                .record_failure(
                    document.id,
                    ErrorClass::DatabaseError,
                    "vectorizing",
                    "failed to persist chunk records",
                    &err.to_string(),
                )
                .await?;
            return Err(err.into());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        document: &Document,
        index: usize,
        total: usize,
        text: String,
        outcome: EmbeddingOutcome,
        method: &str,
        extraction_method: &str,
        key_id: &str,
    ) -> VectorRecord {
        let chunk_length = text.chars().count();
        VectorRecord {
            document_id: document.id,
            owner_id: document.owner_id.clone(),
            chunk_index: index,
            text,
            outcome,
            encryption_key_id: key_id.to_string(),
            metadata: ChunkMetadata {
                filename: document.filename.clone(),
                extraction_method: extraction_method.to_string(),
                embedding_method: method.to_string(),
                chunk_length,
                total_chunks: total,
                processed_at: crate::document::current_timestamp_rfc3339(),
            },
        }
    }
}

/// Progress for the vectorizing stage: anchored at 70, capped at 95 until the run
/// fully completes.
pub fn batch_progress(persisted: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    let scaled = 70.0 + (persisted as f64 / total as f64) * 25.0;
    (scaled.round() as u8).min(95)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocumentStore;
    use crate::embedding::EmbeddingClientError;
    use async_trait::async_trait;
    use httpmock::{Method::PUT, MockServer};
    use std::sync::atomic::AtomicUsize;

    struct ScriptedEmbedder {
        vector: Vec<f32>,
        quota_after: Option<usize>,
        calls: AtomicUsize,
        available: bool,
    }

    impl ScriptedEmbedder {
        fn healthy(dimension: usize) -> Self {
            Self {
                vector: vec![0.5; dimension],
                quota_after: None,
                calls: AtomicUsize::new(0),
                available: true,
            }
        }

        fn exhausted(dimension: usize) -> Self {
            Self {
                vector: vec![0.5; dimension],
                quota_after: Some(0),
                calls: AtomicUsize::new(0),
                available: false,
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for ScriptedEmbedder {
        async fn check_availability(&self) -> Availability {
            if self.available {
                Availability::Available
            } else {
                Availability::Unavailable("quota exceeded (429)".into())
            }
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.quota_after
                && call >= limit
            {
                return Err(EmbeddingClientError::Quota("quota".into()));
            }
            Ok(self.vector.clone())
        }
    }

    async fn chunking_document(store: &MemoryDocumentStore) -> Document {
        let document = Document::new(
            "user-1".into(),
            "notes.txt".into(),
            "text/plain".into(),
            100,
            "hash".into(),
        );
        store.insert(document.clone()).await.unwrap();
        for status in [
            DocumentStatus::Uploading,
            DocumentStatus::Uploaded,
            DocumentStatus::Parsing,
            DocumentStatus::Chunking,
        ] {
            store.transition(document.id, status).await.unwrap();
        }
        store.get(document.id).await.unwrap()
    }

    fn vector_service(server: &MockServer) -> Arc<VectorStoreService> {
        Arc::new(VectorStoreService::new(&server.base_url(), None, "chunks").expect("service"))
    }

    fn processor(
        store: Arc<MemoryDocumentStore>,
        vectors: Arc<VectorStoreService>,
        primary: Arc<dyn EmbeddingClient>,
        fallback: Option<Arc<dyn EmbeddingClient>>,
    ) -> EmbeddingBatchProcessor {
        EmbeddingBatchProcessor::new(
            store,
            vectors,
            primary,
            fallback,
            ProgressNotifier::spawn(16, None),
            PipelineSettings::with_dimension(4),
        )
    }

    #[test]
    fn progress_formula_is_anchored_and_capped() {
        assert_eq!(batch_progress(0, 10), 70);
        assert_eq!(batch_progress(5, 10), 83);
        assert_eq!(batch_progress(10, 10), 95);
        assert_eq!(batch_progress(99, 100), 95);
    }

    #[tokio::test]
    async fn healthy_provider_completes_with_real_embeddings() {
        let server = MockServer::start_async().await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/chunks/points");
                then.status(200).json_body(serde_json::json!({"status": "ok"}));
            })
            .await;

        let store = Arc::new(MemoryDocumentStore::new());
        let document = chunking_document(&store).await;
        let processor = processor(
            store.clone(),
            vector_service(&server),
            Arc::new(ScriptedEmbedder::healthy(4)),
            None,
        );

        let chunks: Vec<String> = (0..7).map(|i| format!("chunk {i}")).collect();
        let report = processor
            .process(&document, chunks, "direct")
            .await
            .expect("report");

        assert_eq!(report.embedded, 7);
        assert_eq!(report.degraded, 0);
        // 7 chunks at batch size 5 means two sequential upserts.
        assert_eq!(upsert.hits_async().await, 2);

        let updated = store.get(document.id).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::Completed);
        assert_eq!(updated.progress, 100);
        assert_eq!(updated.total_chunks, Some(7));
        assert_eq!(updated.processed_chunks, 7);
        assert_eq!(updated.failed_chunks, 0);
        assert!(updated.warning.is_none());
    }

    #[tokio::test]
    async fn unavailable_provider_stores_placeholders_and_completes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/chunks/points");
                then.status(200).json_body(serde_json::json!({"status": "ok"}));
            })
            .await;

        let store = Arc::new(MemoryDocumentStore::new());
        let document = chunking_document(&store).await;
        let processor = processor(
            store.clone(),
            vector_service(&server),
            Arc::new(ScriptedEmbedder::exhausted(4)),
            None,
        );

        let chunks: Vec<String> = (0..3).map(|i| format!("chunk {i}")).collect();
        let report = processor
            .process(&document, chunks, "direct")
            .await
            .expect("report");

        assert_eq!(report.embedded, 0);
        assert_eq!(report.degraded, 3);

        let updated = store.get(document.id).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::Completed);
        assert_eq!(updated.failed_chunks, 3);
        assert!(updated.warning.is_some());
    }

    #[tokio::test]
    async fn mid_run_quota_switches_to_fallback_provider() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/chunks/points");
                then.status(200).json_body(serde_json::json!({"status": "ok"}));
            })
            .await;

        let store = Arc::new(MemoryDocumentStore::new());
        let document = chunking_document(&store).await;
        let primary = Arc::new(ScriptedEmbedder {
            vector: vec![0.5; 4],
            quota_after: Some(2),
            calls: AtomicUsize::new(0),
            available: true,
        });
        let fallback = Arc::new(ScriptedEmbedder::healthy(4));
        let processor = processor(
            store.clone(),
            vector_service(&server),
            primary,
            Some(fallback.clone()),
        );

        let chunks: Vec<String> = (0..6).map(|i| format!("chunk {i}")).collect();
        let report = processor
            .process(&document, chunks, "direct")
            .await
            .expect("report");

        // Every chunk still lands with a real vector: primary until quota, then fallback.
        assert_eq!(report.embedded, 6);
        assert_eq!(report.degraded, 0);
        assert!(fallback.calls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn persisted_records_cover_every_chunk_index_exactly_once() {
        let server = MockServer::start_async().await;
        let captured: Arc<std::sync::Mutex<Vec<serde_json::Value>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        server
            .mock_async(move |when, then| {
                when.method(PUT)
                    .path("/collections/chunks/points")
                    .matches(move |req: &httpmock::HttpMockRequest| {
                        let bytes = req.body_vec();
                        if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                            sink.lock().unwrap().push(body);
                        }
                        true
                    });
                then.status(200).json_body(serde_json::json!({"status": "ok"}));
            })
            .await;

        let store = Arc::new(MemoryDocumentStore::new());
        let document = chunking_document(&store).await;
        // Quota after two chunks and no fallback: the run mixes real embeddings
        // with degraded placeholders.
        let primary = Arc::new(ScriptedEmbedder {
            vector: vec![0.5; 4],
            quota_after: Some(2),
            calls: AtomicUsize::new(0),
            available: true,
        });
        let processor = processor(store.clone(), vector_service(&server), primary, None);

        let chunks: Vec<String> = (0..7).map(|i| format!("chunk {i}")).collect();
        let report = processor
            .process(&document, chunks, "direct")
            .await
            .expect("report");
        assert_eq!(report.embedded + report.degraded, 7);
        assert!(report.embedded > 0);
        assert!(report.degraded > 0);

        let mut indices: Vec<u64> = captured
            .lock()
            .unwrap()
            .iter()
            .flat_map(|body| {
                body["points"]
                    .as_array()
                    .expect("points array")
                    .iter()
                    .map(|point| {
                        point["payload"]["chunk_index"]
                            .as_u64()
                            .expect("chunk_index")
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..7).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn batch_persistence_failure_is_fatal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/chunks/points");
                then.status(500).body("disk full");
            })
            .await;

        let store = Arc::new(MemoryDocumentStore::new());
        let document = chunking_document(&store).await;
        let processor = processor(
            store.clone(),
            vector_service(&server),
            Arc::new(ScriptedEmbedder::healthy(4)),
            None,
        );

        let err = processor
            .process(&document, vec!["chunk".to_string()], "direct")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::VectorStore(_)));

        let updated = store.get(document.id).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::Failed);
        assert!(updated.error_message.is_some());
        assert!(!updated.error_details.is_empty());
    }
}
