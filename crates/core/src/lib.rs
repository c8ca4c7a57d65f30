//! Core domain types and shared logic for chunklog.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload identifiers, log types and timestamp buckets
//! - The persisted key layout (index keys, chunk keys, the latest pointer)
//! - Index records and their logical expiry
//! - Watch event encodings
//! - Service configuration

pub mod config;
pub mod error;
pub mod format;
pub mod hash;
pub mod index;
pub mod layout;

pub use error::{Error, Result};
pub use format::{WATCH_EVENT_NAME, WatchFormat};
pub use hash::{ContentHash, ContentHasher};
pub use index::IndexRecord;
pub use layout::{KeyPrefix, LATEST_LOG_KEY, LogId, LogType, UploadTimestamp, index_key};

/// Default logical retention of an upload: 1 day.
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Default TTL of the latest-upload pointer: 1 hour.
pub const DEFAULT_POINTER_TTL_SECS: u64 = 60 * 60;

/// Store-level TTL multiplier applied on top of the logical retention.
pub const DEFAULT_STORAGE_TTL_FACTOR: u32 = 2;

/// The payload encoding accepted by default.
pub const DEFAULT_LOG_FORMAT: &str = "pb-zst";
