//! Pipeline orchestration: wires the stages together behind one API surface.

use crate::config::get_config;
use crate::document::{Document, DocumentStatus, DocumentStore, ErrorClass, MemoryDocumentStore};
use crate::embedding::{EmbeddingClient, HttpEmbeddingClient};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::notify::ProgressNotifier;
use crate::pipeline::chunking::chunk_text;
use crate::pipeline::dispatch::{DispatchOutcome, HttpParserClient, ParserClient, ParsingDispatcher};
use crate::pipeline::embedder::EmbeddingBatchProcessor;
use crate::pipeline::types::{PipelineError, PipelineSettings, WebhookEvent};
use crate::pipeline::upload::{TransferUpdate, UploadCoordinator, UploadHandle, UploadRequest};
use crate::pipeline::webhook::{WebhookOutcome, WebhookRouter};
use crate::storage::{HttpObjectStore, ObjectStore};
use crate::vectors::VectorStoreService;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Operations exposed by the ingestion pipeline.
///
/// The HTTP surface depends on this trait rather than the concrete service, which
/// keeps handler tests free of real collaborators.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Validate and register a new upload, returning the transfer plan.
    async fn initiate_upload(&self, request: UploadRequest) -> Result<UploadHandle, PipelineError>;

    /// Record one byte-level transfer chunk; the final chunk triggers processing.
    async fn record_transfer_chunk(
        &self,
        document_id: Uuid,
        chunk_index: u32,
    ) -> Result<TransferUpdate, PipelineError>;

    /// Finalize a single-request upload and run processing.
    async fn complete_upload(&self, document_id: Uuid) -> Result<Document, PipelineError>;

    /// Route an inbound webhook delivery.
    async fn handle_webhook(&self, event: WebhookEvent) -> Result<(), PipelineError>;

    /// Fetch a document's current state.
    async fn document(&self, document_id: Uuid) -> Result<Document, PipelineError>;

    /// Current operational counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Concrete pipeline wiring every stage over shared collaborators.
#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    parser: Arc<dyn ParserClient>,
    primary: Arc<dyn EmbeddingClient>,
    fallback: Option<Arc<dyn EmbeddingClient>>,
    vectors: Arc<VectorStoreService>,
    notifier: ProgressNotifier,
    metrics: Arc<PipelineMetrics>,
    settings: PipelineSettings,
}

impl PipelineService {
    /// Assemble a service from explicit collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        parser: Arc<dyn ParserClient>,
        primary: Arc<dyn EmbeddingClient>,
        fallback: Option<Arc<dyn EmbeddingClient>>,
        vectors: Arc<VectorStoreService>,
        notifier: ProgressNotifier,
        metrics: Arc<PipelineMetrics>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            objects,
            parser,
            primary,
            fallback,
            vectors,
            notifier,
            metrics,
            settings,
        }
    }

    /// Assemble the service from the loaded global configuration.
    pub fn from_config() -> Result<Self, PipelineError> {
        let config = get_config();
        let settings = PipelineSettings::from_config(config);

        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let objects: Arc<dyn ObjectStore> =
            Arc::new(HttpObjectStore::new(config.storage_url.clone())?);
        let parser: Arc<dyn ParserClient> =
            Arc::new(HttpParserClient::new(config.parser_url.clone())?);
        let primary: Arc<dyn EmbeddingClient> = Arc::new(HttpEmbeddingClient::new(
            config.embedding_url.clone(),
            config.embedding_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
        )?);
        let fallback: Option<Arc<dyn EmbeddingClient>> = config
            .embedding_fallback_url
            .clone()
            .map(|url| {
                HttpEmbeddingClient::new(
                    url,
                    config.embedding_api_key.clone(),
                    config.embedding_model.clone(),
                    config.embedding_dimension,
                )
            })
            .transpose()?
            .map(|client| Arc::new(client) as Arc<dyn EmbeddingClient>);
        let vectors = Arc::new(VectorStoreService::new(
            &config.vector_store_url,
            config.vector_store_api_key.clone(),
            &config.vector_store_collection,
        )?);
        let notifier = ProgressNotifier::spawn(256, config.notify_sink_url.clone());

        Ok(Self::from_parts(
            store,
            objects,
            parser,
            primary,
            fallback,
            vectors,
            notifier,
            Arc::new(PipelineMetrics::new()),
            settings,
        ))
    }

    /// Startup preparation: ensure the vector store collection exists.
    pub async fn prepare(&self) -> Result<(), PipelineError> {
        self.vectors
            .ensure_collection(self.settings.embedding_dimension)
            .await?;
        Ok(())
    }

    fn uploads(&self) -> UploadCoordinator {
        UploadCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.objects),
            self.settings.clone(),
        )
    }

    fn embedder(&self) -> EmbeddingBatchProcessor {
        EmbeddingBatchProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.vectors),
            Arc::clone(&self.primary),
            self.fallback.clone(),
            self.notifier.clone(),
            self.settings.clone(),
        )
    }

    /// Run the post-upload stages for a fully received document.
    ///
    /// Ends either in the external parser's hands (a webhook continues the run) or
    /// at a terminal state.
    async fn process_uploaded(&self, document_id: Uuid) -> Result<Document, PipelineError> {
        let document = self.store.get(document_id).await?;
        self.notifier.notify(
            &document.owner_id,
            document.id,
            DocumentStatus::Uploaded,
            document.progress,
            None,
        );

        let dispatcher = ParsingDispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.objects),
            Arc::clone(&self.parser),
        );
        let outcome = match dispatcher.dispatch(&document).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fail(&document, "parsing", &err).await;
                return Err(err);
            }
        };

        match outcome {
            DispatchOutcome::ExternalParsing => {
                self.notifier.notify(
                    &document.owner_id,
                    document.id,
                    DocumentStatus::Parsing,
                    DocumentStatus::Parsing.progress_milestone(),
                    None,
                );
                self.store.get(document_id).await.map_err(Into::into)
            }
            DispatchOutcome::DirectText(text) => {
                let document = match self.enter_chunking(&document, "direct").await {
                    Ok(document) => document,
                    Err(err) => {
                        self.fail(&document, "chunking", &err).await;
                        return Err(err);
                    }
                };
                self.chunk_and_embed(document, text, "direct").await
            }
        }
    }

    async fn enter_chunking(
        &self,
        document: &Document,
        method: &str,
    ) -> Result<Document, PipelineError> {
        self.store
            .set_extraction(
                document.id,
                crate::document::ExtractionStats {
                    method: method.to_string(),
                    page_count: None,
                    image_count: None,
                },
            )
            .await?;
        let document = self
            .store
            .transition(document.id, DocumentStatus::Chunking)
            .await?;
        self.notifier.notify(
            &document.owner_id,
            document.id,
            DocumentStatus::Chunking,
            DocumentStatus::Chunking.progress_milestone(),
            None,
        );
        Ok(document)
    }

    /// Chunk extracted text and run the embedding stage to a terminal state.
    async fn chunk_and_embed(
        &self,
        document: Document,
        text: String,
        extraction_method: &str,
    ) -> Result<Document, PipelineError> {
        if text.trim().is_empty() {
            let err = PipelineError::Validation("document produced no extractable text".into());
            self.fail(&document, "chunking", &err).await;
            return Err(err);
        }

        let chunks = match chunk_text(&text, self.settings.chunk_size, self.settings.chunk_overlap)
        {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => {
                let err = PipelineError::Validation("document produced no extractable text".into());
                self.fail(&document, "chunking", &err).await;
                return Err(err);
            }
            Err(err) => {
                let err = PipelineError::Validation(err.to_string());
                self.fail(&document, "chunking", &err).await;
                return Err(err);
            }
        };
        tracing::info!(
            document_id = %document.id,
            chunks = chunks.len(),
            extraction_method,
            "Text chunked"
        );

        match self
            .embedder()
            .process(&document, chunks, extraction_method)
            .await
        {
            Ok(report) => {
                self.metrics
                    .record_completed(report.embedded as u64, report.degraded as u64);
                self.store.get(document.id).await.map_err(Into::into)
            }
            Err(err) => {
                self.fail(&document, "vectorizing", &err).await;
                Err(err)
            }
        }
    }

    /// Record a stage failure once; re-entry on an already-failed document only
    /// updates metrics and notifies.
    async fn fail(&self, document: &Document, stage: &str, err: &PipelineError) {
        let already_failed = matches!(
            self.store.get(document.id).await,
            Ok(current) if current.status == DocumentStatus::Failed
        );
        if !already_failed
            && let Err(record_err) = self
                .store
                .record_failure(
                    document.id,
                    err.class(),
                    stage,
                    &user_facing_message(err),
                    &err.to_string(),
                )
                .await
        {
            tracing::error!(
                document_id = %document.id,
                error = %record_err,
                "Failed to record document failure"
            );
        }
        self.metrics.record_failed();
        self.notifier.notify(
            &document.owner_id,
            document.id,
            DocumentStatus::Failed,
            document.progress,
            Some(json!({ "stage": stage, "error": user_facing_message(err) })),
        );
    }
}

/// Short message safe to show to end users; raw provider errors stay in the
/// structured error history.
fn user_facing_message(err: &PipelineError) -> String {
    match err {
        PipelineError::Validation(message) => message.clone(),
        PipelineError::Duplicate { .. } => "duplicate of an already processed document".into(),
        PipelineError::NotFound(_) => "document not found".into(),
        PipelineError::NoCorrelation => "callback could not be matched to a document".into(),
        PipelineError::ParserDispatch(_) => "document parsing failed".into(),
        PipelineError::Embedding(_) => "embedding failed".into(),
        PipelineError::Storage(_) => "file storage failed".into(),
        PipelineError::VectorStore(_) => "failed to persist document chunks".into(),
        PipelineError::Store(_) => "internal storage failure".into(),
    }
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn initiate_upload(&self, request: UploadRequest) -> Result<UploadHandle, PipelineError> {
        let handle = self.uploads().initiate(request).await?;
        let document = self.store.get(handle.document_id).await?;
        self.notifier.notify(
            &document.owner_id,
            document.id,
            DocumentStatus::Pending,
            document.progress,
            None,
        );
        Ok(handle)
    }

    async fn record_transfer_chunk(
        &self,
        document_id: Uuid,
        chunk_index: u32,
    ) -> Result<TransferUpdate, PipelineError> {
        let update = self
            .uploads()
            .record_transfer_chunk(document_id, chunk_index)
            .await?;
        if update.upload_complete {
            self.process_uploaded(document_id).await?;
        }
        Ok(update)
    }

    async fn complete_upload(&self, document_id: Uuid) -> Result<Document, PipelineError> {
        self.uploads().complete(document_id).await?;
        self.process_uploaded(document_id).await
    }

    async fn handle_webhook(&self, event: WebhookEvent) -> Result<(), PipelineError> {
        let router = WebhookRouter::new(Arc::clone(&self.store), self.notifier.clone());
        match router.route(event).await? {
            WebhookOutcome::ParsedText { document, text } => {
                self.chunk_and_embed(document, text, "external_parser")
                    .await?;
                Ok(())
            }
            WebhookOutcome::Handled => Ok(()),
        }
    }

    async fn document(&self, document_id: Uuid) -> Result<Document, PipelineError> {
        match self.store.get(document_id).await {
            Ok(document) => Ok(document),
            Err(crate::document::StoreError::NotFound(id)) => Err(PipelineError::NotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
