use async_trait::async_trait;
use bytes::Bytes;
use chunklog_storage::error::{StorageError, StorageResult};
use chunklog_storage::traits::{
    AtomicWrite, CommitResult, Entry, KeyValueStore, QueueStream, Versionstamp, WatchStream,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Store wrapper that counts operations and can inject write failures.
///
/// Used to verify which store calls a code path makes, and how it behaves
/// when the store fails mid-upload.
#[allow(dead_code)]
pub struct InstrumentedStore {
    inner: Arc<dyn KeyValueStore>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub atomics: AtomicUsize,
    /// Fail every `set` once this many have succeeded.
    fail_sets_after: Option<usize>,
    /// Atomic writes that enqueue (index commits) still to fail.
    failing_commits: AtomicUsize,
}

#[allow(dead_code)]
impl InstrumentedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            atomics: AtomicUsize::new(0),
            fail_sets_after: None,
            failing_commits: AtomicUsize::new(0),
        })
    }

    pub fn failing_sets_after(inner: Arc<dyn KeyValueStore>, successes: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            atomics: AtomicUsize::new(0),
            fail_sets_after: Some(successes),
            failing_commits: AtomicUsize::new(0),
        })
    }

    /// Fail the next `count` index commits.
    pub fn failing_commits(inner: Arc<dyn KeyValueStore>, count: usize) -> Arc<Self> {
        let store = Self::new(inner);
        store.failing_commits.store(count, Ordering::SeqCst);
        store
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for InstrumentedStore {
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
        let previous = self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_sets_after.is_some_and(|limit| previous >= limit) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn atomic(&self, write: AtomicWrite) -> StorageResult<CommitResult> {
        self.atomics.fetch_add(1, Ordering::SeqCst);
        if !write.enqueues.is_empty()
            && self
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StorageError::Io(std::io::Error::other(
                "injected commit failure",
            )));
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
        "instrumented"
    }
}
