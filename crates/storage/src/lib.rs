//! Key-value store abstraction, adapters and chunked log storage for chunklog.
//!
//! This crate provides:
//! - The `KeyValueStore` trait: atomic compare-and-set, TTL on write, prefix
//!   scans, key watches and an at-least-once queue
//! - Adapters: in-process memory and SQLite
//! - `ChunkStore`: streamed ingest into bounded chunks and ordered reassembly
//! - `IndexManager`: exactly-once index commits and expiry-aware lookups
//! - `PointerPublisher` / `PointerHandle`: the latest-upload pointer

pub mod backends;
pub mod chunks;
pub mod error;
pub mod index;
pub mod pointer;
pub mod traits;

pub use backends::{memory::MemoryBackend, sqlite::SqliteBackend};
pub use chunks::{ChunkStore, ChunkStream, IngestOutcome, PendingUpload};
pub use error::{StorageError, StorageResult};
pub use index::{CommitOutcome, IndexManager};
pub use pointer::{PointerHandle, PointerPublisher, PointerStream};
pub use traits::{
    AtomicWrite, Check, CommitResult, Entry, KeyValueStore, Mutation, QueueMessage, QueueStream,
    Versionstamp, WatchEvent, WatchStream,
};

use chunklog_core::config::StorageConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a key-value store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn KeyValueStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Memory {
            queue_visibility_timeout_secs,
        } => Ok(Arc::new(MemoryBackend::with_visibility_timeout(
            Duration::from_secs(*queue_visibility_timeout_secs),
        ))),
        StorageConfig::Sqlite {
            path,
            watch_poll_interval_ms,
            queue_visibility_timeout_secs,
        } => {
            let backend = SqliteBackend::new(
                path,
                Duration::from_millis(*watch_poll_interval_ms),
                Duration::from_secs(*queue_visibility_timeout_secs),
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
