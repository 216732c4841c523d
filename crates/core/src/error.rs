//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload length: {0}")]
    InvalidLength(String),

    #[error("invalid upload metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),

    #[error("upload session error: {0}")]
    UploadSession(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
