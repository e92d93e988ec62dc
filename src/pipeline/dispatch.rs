//! Per-media-type parsing dispatch: external parser or direct extraction.

use crate::document::{Document, DocumentStatus, DocumentStore};
use crate::pipeline::types::PipelineError;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Media types that require the external parsing service.
const EXTERNAL_PARSER_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Whether a media type must go through the external parsing service.
pub fn needs_external_parser(media_type: &str) -> bool {
    EXTERNAL_PARSER_TYPES.contains(&media_type)
}

/// Submission handed to the external parsing service.
///
/// The parser's API accepts no client reference, which is why callbacks must be
/// correlated by recency later (see the webhook module).
#[derive(Debug, Clone)]
pub struct ParseSubmission {
    /// Object storage path of the raw file.
    pub storage_path: String,
    /// Original filename.
    pub filename: String,
    /// Declared media type.
    pub content_type: String,
}

/// Interface to the external parsing service.
#[async_trait]
pub trait ParserClient: Send + Sync {
    /// Submit a document for parsing; completion arrives later via webhook.
    async fn submit(&self, submission: ParseSubmission) -> Result<(), PipelineError>;
}

/// HTTP client for the parsing service.
///
/// No request timeout beyond reqwest defaults is enforced; a hung parser is only
/// detected by its callback never arriving.
pub struct HttpParserClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpParserClient {
    /// Construct a client for the given parser endpoint.
    pub fn new(base_url: String) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .user_agent("docpipe/0.2")
            .build()
            .map_err(|err| PipelineError::ParserDispatch(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ParserClient for HttpParserClient {
    async fn submit(&self, submission: ParseSubmission) -> Result<(), PipelineError> {
        let body = json!({
            "path": submission.storage_path,
            "filename": submission.filename,
            "content_type": submission.content_type,
        });
        let response = self
            .client
            .post(format!("{}/parse", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::ParserDispatch(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(PipelineError::ParserDispatch(format!("{status}: {text}")))
        }
    }
}

/// Result of a dispatch decision.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The document was handed to the external parser; a webhook will follow.
    ExternalParsing,
    /// Text was extracted directly and is ready for chunking.
    DirectText(String),
}

/// Routes a fully uploaded document into the parsing stage.
pub struct ParsingDispatcher {
    store: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    parser: Arc<dyn ParserClient>,
}

impl ParsingDispatcher {
    /// Build a dispatcher over the given collaborators.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        parser: Arc<dyn ParserClient>,
    ) -> Self {
        Self {
            store,
            objects,
            parser,
        }
    }

    /// Transition the document into `parsing` and route by media type.
    ///
    /// External dispatch failures fall back once to direct extraction before the
    /// error is surfaced to the caller.
    pub async fn dispatch(&self, document: &Document) -> Result<DispatchOutcome, PipelineError> {
        self.store
            .transition(document.id, DocumentStatus::Parsing)
            .await?;

        if !needs_external_parser(&document.media_type) {
            let text = self.direct_extract(document).await?;
            return Ok(DispatchOutcome::DirectText(text));
        }

        let storage_path = document
            .storage_path
            .clone()
            .ok_or_else(|| PipelineError::Validation("document has no storage path".into()))?;
        let submission = ParseSubmission {
            storage_path,
            filename: document.filename.clone(),
            content_type: document.media_type.clone(),
        };

        match self.parser.submit(submission).await {
            Ok(()) => {
                tracing::info!(document_id = %document.id, "Dispatched to external parser");
                Ok(DispatchOutcome::ExternalParsing)
            }
            Err(err) => {
                tracing::warn!(
                    document_id = %document.id,
                    error = %err,
                    "Parser dispatch failed; falling back to direct extraction"
                );
                let text = self.direct_extract(document).await?;
                Ok(DispatchOutcome::DirectText(text))
            }
        }
    }

    async fn direct_extract(&self, document: &Document) -> Result<String, PipelineError> {
        let storage_path = document
            .storage_path
            .as_deref()
            .ok_or_else(|| PipelineError::Validation("document has no storage path".into()))?;
        let bytes = self.objects.download(storage_path).await?;
        String::from_utf8(bytes).map_err(|_| {
            PipelineError::Validation("file is not valid UTF-8 text".into())
        })
    }
}
