//! HTTP client wrapper for the vector store.

use crate::vectors::payload::{build_payload, generate_point_id};
use crate::vectors::types::{VectorRecord, VectorStoreError};
use reqwest::{Client, Method, StatusCode};
use serde_json::json;

/// Lightweight HTTP client for vector store operations.
pub struct VectorStoreService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl VectorStoreService {
    /// Construct a new client for the given endpoint and collection.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        collection: &str,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder().user_agent("docpipe/0.2").build()?;
        let base_url = normalize_base_url(base_url).map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(url = %base_url, collection, "Initialized vector store HTTP client");
        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.to_string(),
        })
    }

    /// Create the collection only when it is missing.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<(), VectorStoreError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        tracing::debug!(collection = %self.collection, vector_size, "Creating collection");
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))?
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection ensured/created");
        })
        .await
    }

    /// Persist a completed batch of chunk records.
    ///
    /// The upsert is a single request: the whole batch lands or the call fails,
    /// so chunk-index gaps cannot be introduced by partial persistence.
    pub async fn insert_records(
        &self,
        records: &[VectorRecord],
        vector_size: usize,
    ) -> Result<usize, VectorStoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let serialized: Vec<_> = records
            .iter()
            .map(|record| {
                json!({
                    "id": generate_point_id(),
                    "vector": record.outcome.vector(vector_size),
                    "payload": build_payload(record),
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = point_count, "Chunk records persisted");
        })
        .await?;

        Ok(point_count)
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, VectorStoreError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Vector store request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::types::{ChunkMetadata, EmbeddingOutcome};
    use httpmock::{Method::PUT, MockServer};
    use uuid::Uuid;

    #[tokio::test]
    async fn insert_records_upserts_whole_batch() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/chunks/points")
                    .query_param("wait", "true");
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "result": { "operation_id": 1, "status": "completed" }
                }));
            })
            .await;

        let service =
            VectorStoreService::new(&server.base_url(), None, "chunks").expect("service");
        let document_id = Uuid::new_v4();
        let records: Vec<_> = (0..2)
            .map(|index| VectorRecord {
                document_id,
                owner_id: "user-1".into(),
                chunk_index: index,
                text: format!("chunk {index}"),
                outcome: EmbeddingOutcome::Embedded(vec![0.1, 0.2, 0.3]),
                encryption_key_id: "key-1".into(),
                metadata: ChunkMetadata {
                    filename: "notes.txt".into(),
                    extraction_method: "direct".into(),
                    embedding_method: "primary".into(),
                    chunk_length: 7,
                    total_chunks: 2,
                    processed_at: "2025-01-01T00:00:00Z".into(),
                },
            })
            .collect();

        let inserted = service.insert_records(&records, 3).await.expect("insert");
        mock.assert();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn insert_failure_surfaces_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/chunks/points");
                then.status(500).body("disk full");
            })
            .await;

        let service =
            VectorStoreService::new(&server.base_url(), None, "chunks").expect("service");
        let records = vec![VectorRecord {
            document_id: Uuid::new_v4(),
            owner_id: "user-1".into(),
            chunk_index: 0,
            text: "chunk".into(),
            outcome: EmbeddingOutcome::Unembedded {
                reason: "quota".into(),
            },
            encryption_key_id: "key-1".into(),
            metadata: ChunkMetadata {
                filename: "notes.txt".into(),
                extraction_method: "direct".into(),
                embedding_method: "degraded".into(),
                chunk_length: 5,
                total_chunks: 1,
                processed_at: "2025-01-01T00:00:00Z".into(),
            },
        }];

        let err = service.insert_records(&records, 3).await.unwrap_err();
        match err {
            VectorStoreError::UnexpectedStatus { status, body } => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_batches_are_a_no_op() {
        let service =
            VectorStoreService::new("http://127.0.0.1:6333", None, "chunks").expect("service");
        assert_eq!(service.insert_records(&[], 3).await.expect("no-op"), 0);
    }
}
