//! Response cache for completed retrievals.
//!
//! Entries are keyed by the SHA-256 digest of the request identity (method,
//! path and query) and hold the full response body with its content type.
//! Eviction is moka's: a weighted byte capacity plus a time-to-live.

use axum::http::{Method, Uri};
use bytes::Bytes;
use chunklog_core::ContentHash;
use chunklog_core::config::CacheConfig;
use moka::future::Cache;

/// A complete response, as served on a miss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub content_type: String,
}

/// Identity of a cacheable request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    pub fn for_request(method: &Method, uri: &Uri) -> Self {
        let mut hasher = ContentHash::hasher();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(uri.path().as_bytes());
        if let Some(query) = uri.query() {
            hasher.update(b"?");
            hasher.update(query.as_bytes());
        }
        Self(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Content-addressed cache of retrieval responses.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Option<Cache<CacheKey, CachedResponse>>,
    max_entry_bytes: u64,
}

impl ResponseCache {
    pub fn from_config(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let inner = Cache::builder()
            .max_capacity(config.max_capacity_bytes)
            .weigher(|_key: &CacheKey, value: &CachedResponse| {
                u32::try_from(value.body.len()).unwrap_or(u32::MAX)
            })
            .time_to_live(config.time_to_live())
            .build();

        Self {
            inner: Some(inner),
            max_entry_bytes: config.max_entry_bytes,
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            max_entry_bytes: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Whether a response of `size` bytes would be stored.
    pub fn admits(&self, size: u64) -> bool {
        self.is_enabled() && size <= self.max_entry_bytes
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        match &self.inner {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    /// Store a complete response. Oversized responses are ignored.
    pub async fn insert(&self, key: CacheKey, response: CachedResponse) {
        if let Some(cache) = &self.inner
            && response.body.len() as u64 <= self.max_entry_bytes
        {
            tracing::debug!(cache_key = %key, size = response.body.len(), "caching response");
            cache.insert(key, response).await;
        }
    }

    /// Entries currently held, for tests and diagnostics.
    pub async fn entry_count(&self) -> u64 {
        match &self.inner {
            Some(cache) => {
                cache.run_pending_tasks().await;
                cache.entry_count()
            }
            None => 0,
        }
    }
}
