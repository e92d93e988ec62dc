use crate::document::ErrorClass;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider reported a rate or billing limit (HTTP 429).
    #[error("embedding quota exceeded: {0}")]
    Quota(String),
    /// Provider rejected the request as a client error (4xx).
    #[error("embedding provider error ({status}): {body}")]
    Api {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// HTTP layer failed before a response was received.
    #[error("embedding request failed: {0}")]
    Network(String),
    /// Provider returned a payload the client could not use.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbeddingClientError {
    /// Classify the error for the pipeline's taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Quota(_) => ErrorClass::QuotaExceeded,
            Self::Api { .. } | Self::Malformed(_) => ErrorClass::ApiError,
            Self::Network(_) => ErrorClass::NetworkError,
        }
    }

    /// Whether the provider signalled quota exhaustion.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }
}

/// Result of the provider availability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Provider accepted the probe (or failed in a way that does not imply exhaustion).
    Available,
    /// Provider reported quota exhaustion or rejected authentication.
    Unavailable(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Issue a minimal probe call to detect quota or auth exhaustion.
    ///
    /// Only 429 and 401 map to [`Availability::Unavailable`]; every other outcome,
    /// including transient network errors, reports available so degradation is not
    /// over-triggered.
    async fn check_availability(&self) -> Availability;

    /// Produce an embedding vector for one chunk of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError>;
}

/// HTTP embedding client speaking the `{input, model, dimensions}` contract.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    /// Construct a client for the given provider endpoint.
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    ) -> Result<Self, EmbeddingClientError> {
        let client = reqwest::Client::builder()
            .user_agent("docpipe/0.2")
            .build()
            .map_err(|err| EmbeddingClientError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
        })
    }

    async fn request(&self, input: &str) -> Result<reqwest::Response, EmbeddingClientError> {
        let body = json!({
            "input": input,
            "model": self.model,
            "dimensions": self.dimensions,
        });
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.bearer_auth(api_key);
        }
        request
            .send()
            .await
            .map_err(|err| EmbeddingClientError::Network(err.to_string()))
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn check_availability(&self) -> Availability {
        match self.request("ping").await {
            Ok(response) => match response.status() {
                StatusCode::TOO_MANY_REQUESTS => {
                    Availability::Unavailable("quota exceeded (429)".to_string())
                }
                StatusCode::UNAUTHORIZED => {
                    Availability::Unavailable("authentication failed (401)".to_string())
                }
                status => {
                    if !status.is_success() {
                        tracing::debug!(%status, "Probe returned non-success; treating provider as available");
                    }
                    Availability::Available
                }
            },
            Err(err) => {
                tracing::debug!(error = %err, "Probe request failed; treating provider as available");
                Availability::Available
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let response = self.request(text).await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::Quota(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::Api { status, body });
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingClientError::Malformed(err.to_string()))?;
        let vector = payload
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| EmbeddingClientError::Malformed("empty data array".to_string()))?;
        if vector.len() != self.dimensions {
            return Err(EmbeddingClientError::Malformed(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(vector)
    }
}
