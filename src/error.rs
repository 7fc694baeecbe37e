use thiserror::Error;

/// Errors surfaced by the commerce engine and its adapters.
///
/// Each variant is terminal for the request that produced it; the engine
/// never retries on its own.
#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Precondition failed: {0}")]
    PreconditionError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Signature verification failed: {0}")]
    SignatureError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl CommerceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionError(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::ProviderError(msg.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        Self::SignatureError(msg.into())
    }
}

impl From<reqwest::Error> for CommerceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CommerceError::ProviderError(format!("provider call timed out: {}", err))
        } else {
            CommerceError::ProviderError(err.to_string())
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CommerceError {
    fn from(err: rocksdb::Error) -> Self {
        CommerceError::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
