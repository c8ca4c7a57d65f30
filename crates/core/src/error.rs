//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid log id: {0}")]
    InvalidLogId(String),

    #[error("invalid log type: {0}")]
    InvalidLogType(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unsupported log format: {0}")]
    UnsupportedFormat(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
