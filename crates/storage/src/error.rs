//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("upload already in progress or committed: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] chunklog_core::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("chunk {missing} of {chunk_count} missing under {prefix}")]
    Truncated {
        prefix: String,
        chunk_count: u64,
        missing: u64,
    },

    #[error("size mismatch: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("upload stream failed: {0}")]
    Transport(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
