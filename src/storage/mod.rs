use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by the object storage service.
#[derive(Debug, Error)]
pub enum StorageError {
    /// HTTP layer failed before a response was received.
    #[error("storage request failed: {0}")]
    Network(String),
    /// Storage responded with an unexpected status code.
    #[error("unexpected storage response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the storage service.
        status: reqwest::StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// No object exists at the requested path.
    #[error("object not found: {0}")]
    NotFound(String),
}

/// Signed destination a client can upload raw bytes to.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedDestination {
    /// Upload URL, valid until expiry.
    pub url: String,
    /// Seconds until the URL expires.
    pub expires_in: u64,
}

/// Interface to the object storage service.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Allocate a signed upload destination for the given path.
    async fn create_signed_upload_destination(
        &self,
        path: &str,
    ) -> Result<SignedDestination, StorageError>;

    /// Fetch the raw bytes stored at the given path.
    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove the object at the given path.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// HTTP client for the storage service.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Construct a client for the given storage endpoint.
    pub fn new(base_url: String) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .user_agent("docpipe/0.2")
            .build()
            .map_err(|err| StorageError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn create_signed_upload_destination(
        &self,
        path: &str,
    ) -> Result<SignedDestination, StorageError> {
        let response = self
            .client
            .post(format!("{}/sign", self.base_url))
            .json(&json!({ "path": path }))
            .send()
            .await
            .map_err(|err| StorageError::Network(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::UnexpectedStatus { status, body });
        }
        response
            .json()
            .await
            .map_err(|err| StorageError::Network(err.to_string()))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(format!("{}/objects/{}", self.base_url, path))
            .send()
            .await
            .map_err(|err| StorageError::Network(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|err| StorageError::Network(err.to_string()))?
                .to_vec()),
            reqwest::StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StorageError::UnexpectedStatus { status, body })
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .delete(format!("{}/objects/{}", self.base_url, path))
            .send()
            .await
            .map_err(|err| StorageError::Network(err.to_string()))?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StorageError::UnexpectedStatus { status, body })
        }
    }
}

/// In-memory object store used in tests and local runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place bytes at a path, as an out-of-band upload would.
    pub async fn put(&self, path: &str, bytes: Vec<u8>) {
        self.objects.write().await.insert(path.to_string(), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_signed_upload_destination(
        &self,
        path: &str,
    ) -> Result<SignedDestination, StorageError> {
        Ok(SignedDestination {
            url: format!("memory://{path}"),
            expires_in: 3600,
        })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(path);
        Ok(())
    }
}
