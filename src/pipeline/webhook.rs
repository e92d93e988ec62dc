//! Webhook classification and correlation.
//!
//! All callback sources share one inbound endpoint and one payload shape. Parser
//! callbacks are recognized by shape (they carry extracted content) because the
//! external parser never echoes a caller-supplied reference; every other source
//! must identify its document explicitly.

use crate::document::{Document, DocumentStatus, DocumentStore, ErrorClass, ExtractionStats};
use crate::notify::ProgressNotifier;
use crate::pipeline::types::{ParsedPage, PipelineError, WebhookEvent, WebhookSource};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of routing one webhook delivery.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// A parser callback delivered text; the document is in `chunking` and the
    /// caller must continue with chunking and embedding.
    ParsedText {
        /// The correlated document, as of the `chunking` transition.
        document: Document,
        /// Extracted text assembled from the callback payload.
        text: String,
    },
    /// The delivery was fully handled in place (failure recorded, duplicate
    /// ignored, or informational event acknowledged).
    Handled,
}

/// A payload is treated as a parser callback when it carries extracted content,
/// regardless of any source tag.
pub fn is_parser_payload(event: &WebhookEvent) -> bool {
    event.text.is_some() || event.markdown.is_some() || event.pages.is_some()
}

/// Assemble the extracted text from a parser callback.
///
/// Preference order: the top-level `text` field, then pages joined with blank
/// lines (each page contributing its text or, failing that, its markdown), then
/// the top-level `markdown` field.
pub fn extract_text(event: &WebhookEvent) -> Option<String> {
    if let Some(text) = &event.text
        && !text.trim().is_empty()
    {
        return Some(text.clone());
    }

    if let Some(pages) = &event.pages {
        let joined = pages
            .iter()
            .filter_map(page_text)
            .collect::<Vec<_>>()
            .join("\n\n");
        if !joined.trim().is_empty() {
            return Some(joined);
        }
    }

    event
        .markdown
        .as_ref()
        .filter(|markdown| !markdown.trim().is_empty())
        .cloned()
}

fn page_text(page: &ParsedPage) -> Option<String> {
    page.text
        .as_ref()
        .filter(|text| !text.trim().is_empty())
        .or(page.markdown.as_ref())
        .filter(|text| !text.trim().is_empty())
        .cloned()
}

/// Routes inbound webhook deliveries to the document they describe.
pub struct WebhookRouter {
    store: Arc<dyn DocumentStore>,
    notifier: ProgressNotifier,
}

impl WebhookRouter {
    /// Build a router over the given store and notifier.
    pub fn new(store: Arc<dyn DocumentStore>, notifier: ProgressNotifier) -> Self {
        Self { store, notifier }
    }

    /// Route one delivery.
    ///
    /// An uncorrelatable delivery returns [`PipelineError::NoCorrelation`]; a
    /// tagged delivery naming an unknown document returns
    /// [`PipelineError::NotFound`]. Neither mutates document state.
    pub async fn route(&self, event: WebhookEvent) -> Result<WebhookOutcome, PipelineError> {
        if is_parser_payload(&event) || event.source == Some(WebhookSource::ExternalParser) {
            return self.route_parser(event).await;
        }
        self.route_tagged(event).await
    }

    async fn route_parser(&self, event: WebhookEvent) -> Result<WebhookOutcome, PipelineError> {
        let document = self.correlate_parser(&event).await?;
        let Some(document) = document else {
            return Ok(WebhookOutcome::Handled);
        };

        if event.status.as_deref() == Some("failed") {
            let detail = event.error.as_deref().unwrap_or("no error detail provided");
            self.store
                .record_failure(
                    document.id,
                    ErrorClass::ApiError,
                    "parsing",
                    "external parser reported failure",
                    detail,
                )
                .await?;
            self.notifier.notify(
                &document.owner_id,
                document.id,
                DocumentStatus::Failed,
                document.progress,
                Some(json!({ "error": "external parser reported failure" })),
            );
            return Ok(WebhookOutcome::Handled);
        }

        let Some(text) = extract_text(&event) else {
            // A completed callback with no usable content fails the document.
            self.store
                .record_failure(
                    document.id,
                    ErrorClass::ValidationError,
                    "parsing",
                    "document produced no extractable text",
                    "parser callback carried no text, markdown, or page content",
                )
                .await?;
            return Ok(WebhookOutcome::Handled);
        };

        let stats = ExtractionStats {
            method: "external_parser".to_string(),
            page_count: event.pages.as_ref().map(Vec::len),
            image_count: image_count(&event),
        };
        self.store.set_extraction(document.id, stats).await?;
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
        Ok(WebhookOutcome::ParsedText { document, text })
    }

    /// Correlate a parser callback to an in-flight document.
    ///
    /// A token the parser echoes back wins; otherwise the claim falls back to the
    /// recency heuristic in the store. `Ok(None)` means the delivery is a
    /// duplicate of one already consumed.
    async fn correlate_parser(
        &self,
        event: &WebhookEvent,
    ) -> Result<Option<Document>, PipelineError> {
        if let Some(token) = &event.task_id
            && let Some(document) = self.store.find_by_parser_task(token).await?
        {
            if document.status == DocumentStatus::Parsing {
                return Ok(Some(document));
            }
            tracing::info!(
                document_id = %document.id,
                token,
                "Duplicate parser callback for an already-advanced document; ignoring"
            );
            return Ok(None);
        }

        let token = event
            .task_id
            .clone()
            .unwrap_or_else(|| format!("claim-{}", Uuid::new_v4()));
        match self.store.claim_parser_candidate(&token).await? {
            Some(document) => {
                tracing::info!(
                    document_id = %document.id,
                    token,
                    "Parser callback correlated by recency"
                );
                Ok(Some(document))
            }
            None => Err(PipelineError::NoCorrelation),
        }
    }

    /// Non-parser sources carry an explicit document reference; recency never
    /// applies to them.
    async fn route_tagged(&self, event: WebhookEvent) -> Result<WebhookOutcome, PipelineError> {
        let source = event.source.ok_or(PipelineError::NoCorrelation)?;
        let document = self.find_tagged(&event).await?;

        if event.status.as_deref() == Some("failed") {
            let detail = event.error.as_deref().unwrap_or("no error detail provided");
            let stage = match source {
                WebhookSource::Storage => "uploading",
                WebhookSource::Embedding => "vectorizing",
                WebhookSource::Internal | WebhookSource::ExternalParser => "parsing",
            };
            self.store
                .record_failure(
                    document.id,
                    ErrorClass::ApiError,
                    stage,
                    "external service reported failure",
                    detail,
                )
                .await?;
            self.notifier.notify(
                &document.owner_id,
                document.id,
                DocumentStatus::Failed,
                document.progress,
                Some(json!({ "error": "external service reported failure" })),
            );
            return Ok(WebhookOutcome::Handled);
        }

        tracing::debug!(
            document_id = %document.id,
            source = ?source,
            status = event.status.as_deref().unwrap_or("unknown"),
            "Acknowledged informational webhook"
        );
        Ok(WebhookOutcome::Handled)
    }

    async fn find_tagged(&self, event: &WebhookEvent) -> Result<Document, PipelineError> {
        if let Some(id) = event.document_id {
            // The sender named a specific document; its absence is a lookup
            // failure, not a correlation miss.
            return match self.store.get(id).await {
                Ok(document) => Ok(document),
                Err(crate::document::StoreError::NotFound(id)) => {
                    Err(PipelineError::NotFound(id))
                }
                Err(err) => Err(err.into()),
            };
        }
        if let Some(token) = &event.task_id
            && let Some(document) = self.store.find_by_parser_task(token).await?
        {
            return Ok(document);
        }
        Err(PipelineError::NoCorrelation)
    }
}

fn image_count(event: &WebhookEvent) -> Option<usize> {
    let document_level = event.images.as_ref().map(Vec::len);
    let page_level = event
        .pages
        .as_ref()
        .map(|pages| pages.iter().map(|page| page.images.len()).sum::<usize>());
    match (document_level, page_level) {
        (None, None) => None,
        (doc, pages) => Some(doc.unwrap_or(0) + pages.unwrap_or(0)),
    }
}
