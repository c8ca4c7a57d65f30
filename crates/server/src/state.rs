//! Application state shared across handlers.

use crate::cache::ResponseCache;
use crate::fanout::WatchFanout;
use chunklog_core::config::AppConfig;
use chunklog_storage::{ChunkStore, IndexManager, KeyValueStore, PointerHandle};
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Key-value store adapter.
    pub store: Arc<dyn KeyValueStore>,
    /// Chunked payload reads and writes.
    pub chunks: ChunkStore,
    /// Index record commit and lookup.
    pub index: IndexManager,
    /// Watch subscriptions on the latest-upload pointer.
    pub fanout: WatchFanout,
    /// Completed retrieval responses.
    pub cache: ResponseCache,
}

impl AppState {
    /// Create the application state.
    ///
    /// `pointer` is the handle of the process's pointer publisher.
    pub fn new(config: AppConfig, store: Arc<dyn KeyValueStore>, pointer: PointerHandle) -> Self {
        let chunks = ChunkStore::new(Arc::clone(&store), config.logs.storage_ttl());
        let index = IndexManager::from_config(Arc::clone(&store), &config.logs);
        let cache = ResponseCache::from_config(&config.cache);

        Self {
            config: Arc::new(config),
            store,
            chunks,
            index,
            fanout: WatchFanout::new(pointer),
            cache,
        }
    }
}
