use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docpipe server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL of the vector store that persists chunk records.
    pub vector_store_url: String,
    /// Name of the vector store collection used for chunk records.
    pub vector_store_collection: String,
    /// Optional API key required by the vector store.
    pub vector_store_api_key: Option<String>,
    /// Base URL of the primary embedding provider.
    pub embedding_url: String,
    /// Optional API key for the embedding provider.
    pub embedding_api_key: Option<String>,
    /// Optional base URL of a secondary embedding provider tried on quota exhaustion.
    pub embedding_fallback_url: Option<String>,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of concurrent embedding requests per batch.
    pub embedding_batch_size: Option<usize>,
    /// Base URL of the external parsing service.
    pub parser_url: String,
    /// Base URL of the object storage service.
    pub storage_url: String,
    /// Optional URL of the progress notification sink.
    pub notify_sink_url: Option<String>,
    /// Hard cap on declared upload size in bytes.
    pub max_upload_bytes: Option<u64>,
    /// Fixed size of a byte-level transfer chunk.
    pub transfer_chunk_bytes: Option<u64>,
    /// Maximum text chunk size in characters.
    pub chunk_size: Option<usize>,
    /// Character overlap between adjacent text chunks.
    pub chunk_overlap: Option<usize>,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            vector_store_url: load_env("VECTOR_STORE_URL")?,
            vector_store_collection: load_env("VECTOR_STORE_COLLECTION")?,
            vector_store_api_key: load_env_optional("VECTOR_STORE_API_KEY"),
            embedding_url: load_env("EMBEDDING_URL")?,
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY"),
            embedding_fallback_url: load_env_optional("EMBEDDING_FALLBACK_URL"),
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            embedding_batch_size: parse_optional("EMBEDDING_BATCH_SIZE")?,
            parser_url: load_env("PARSER_URL")?,
            storage_url: load_env("STORAGE_URL")?,
            notify_sink_url: load_env_optional("NOTIFY_SINK_URL"),
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?,
            transfer_chunk_bytes: parse_optional("TRANSFER_CHUNK_BYTES")?,
            chunk_size: parse_optional("CHUNK_SIZE")?,
            chunk_overlap: parse_optional("CHUNK_OVERLAP")?,
            server_port: parse_optional("SERVER_PORT")?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        vector_store_url = %config.vector_store_url,
        collection = %config.vector_store_collection,
        embedding_url = %config.embedding_url,
        parser_url = %config.parser_url,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
