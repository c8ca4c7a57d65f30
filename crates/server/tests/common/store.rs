//! Store wrappers for observing what the server asks of its store.

use async_trait::async_trait;
use bytes::Bytes;
use chunklog_storage::{
    AtomicWrite, CommitResult, Entry, KeyValueStore, QueueStream, StorageError, StorageResult,
    Versionstamp, WatchStream,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Delegating store that counts point reads and injects failures.
#[allow(dead_code)]
pub struct CountingStore {
    inner: Arc<dyn KeyValueStore>,
    gets: AtomicUsize,
    unreachable: AtomicBool,
    failing_sets: AtomicBool,
    /// Atomic writes that enqueue (index commits) still to fail.
    failing_commits: AtomicUsize,
}

#[allow(dead_code)]
impl CountingStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gets: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
            failing_sets: AtomicBool::new(false),
            failing_commits: AtomicUsize::new(0),
        })
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.gets.store(0, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make every plain `set` (chunk writes) fail.
    pub fn fail_sets(&self, fail: bool) {
        self.failing_sets.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` index commits.
    pub fn fail_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }
}

fn injected(message: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(message.to_string()))
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> StorageResult<Versionstamp> {
        if self.failing_sets.load(Ordering::SeqCst) {
            return Err(injected("injected write failure"));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn atomic(&self, write: AtomicWrite) -> StorageResult<CommitResult> {
        if !write.enqueues.is_empty()
            && self
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(injected("injected commit failure"));
        }
        self.inner.atomic(write).await
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Entry>> {
        self.inner.list_prefix(prefix).await
    }

    async fn watch(&self, keys: Vec<String>) -> StorageResult<WatchStream> {
        self.inner.watch(keys).await
    }

    async fn enqueue(&self, payload: Bytes) -> StorageResult<()> {
        self.inner.enqueue(payload).await
    }

    async fn listen_queue(&self) -> StorageResult<QueueStream> {
        self.inner.listen_queue().await
    }

    async fn ack(&self, id: u64) -> StorageResult<()> {
        self.inner.ack(id).await
    }

    async fn purge_expired(&self) -> StorageResult<u64> {
        self.inner.purge_expired().await
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }

    async fn health_check(&self) -> StorageResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(injected("store unreachable"));
        }
        self.inner.health_check().await
    }
}
