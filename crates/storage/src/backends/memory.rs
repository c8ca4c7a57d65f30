//! In-process key-value store.
//!
//! Suitable for a single instance and for tests. Nothing survives a restart.

use crate::error::StorageResult;
use crate::traits::{
    AtomicWrite, CommitResult, Entry, KeyValueStore, Mutation, QueueMessage, QueueStream,
    Versionstamp, WatchEvent, WatchStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::Instant;
use tracing::instrument;

/// Buffered key-change notifications per watcher before it must rescan.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Default lease of a delivered queue message.
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct StoredEntry {
    value: Bytes,
    versionstamp: Versionstamp,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

struct QueuedMessage {
    id: u64,
    payload: Bytes,
    leased_until: Option<Instant>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, StoredEntry>,
    version: u64,
    queue: VecDeque<QueuedMessage>,
    next_message_id: u64,
}

impl State {
    fn live(&self, key: &str, now: Instant) -> Option<&StoredEntry> {
        self.entries.get(key).filter(|entry| entry.is_live(now))
    }

    fn next_versionstamp(&mut self) -> Versionstamp {
        self.version += 1;
        Versionstamp::new(self.version)
    }

    fn write(&mut self, key: String, value: Bytes, ttl: Option<Duration>, vs: Versionstamp) {
        let now = Instant::now();
        self.entries.insert(
            key,
            StoredEntry {
                value,
                versionstamp: vs,
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
            },
        );
    }

    fn push_message(&mut self, payload: Bytes) {
        self.next_message_id += 1;
        self.queue.push_back(QueuedMessage {
            id: self.next_message_id,
            payload,
            leased_until: None,
        });
    }
}

enum Lease {
    Message(QueueMessage),
    Wait(Duration),
}

struct Inner {
    state: Mutex<State>,
    changes: broadcast::Sender<String>,
    queue_ready: Notify,
    visibility_timeout: Duration,
}

impl Inner {
    async fn versionstamp_of(&self, key: &str) -> Option<Versionstamp> {
        let state = self.state.lock().await;
        state
            .live(key, Instant::now())
            .map(|entry| entry.versionstamp)
    }

    /// Lease the oldest deliverable message, or report how long to wait.
    async fn lease_next(&self) -> Lease {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut next_expiry: Option<Instant> = None;

        for message in state.queue.iter_mut() {
            match message.leased_until {
                Some(until) if until > now => {
                    next_expiry = Some(next_expiry.map_or(until, |at| at.min(until)));
                }
                _ => {
                    message.leased_until = Some(now + self.visibility_timeout);
                    return Lease::Message(QueueMessage {
                        id: message.id,
                        payload: message.payload.clone(),
                    });
                }
            }
        }

        Lease::Wait(
            next_expiry
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(self.visibility_timeout),
        )
    }

    fn notify_changed(&self, keys: impl IntoIterator<Item = String>) {
        for key in keys {
            // No receivers is fine.
            let _ = self.changes.send(key);
        }
    }
}

/// In-memory key-value store.
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty store with the default queue visibility timeout.
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Create an empty store whose unacked queue messages are redelivered
    /// after `visibility_timeout`.
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        let (changes, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changes,
                queue_ready: Notify::new(),
                visibility_timeout,
            }),
        }
    }

    /// Number of queue messages not yet acked.
    pub async fn pending_messages(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryBackend {
    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>> {
        let state = self.inner.state.lock().await;
        Ok(state.live(key, Instant::now()).map(|entry| Entry {
            key: key.to_string(),
            value: entry.value.clone(),
            versionstamp: entry.versionstamp,
        }))
    }

    #[instrument(skip(self, value), fields(backend = "memory", size = value.len()))]
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> StorageResult<Versionstamp> {
        let mut state = self.inner.state.lock().await;
        let vs = state.next_versionstamp();
        state.write(key.to_string(), value, ttl, vs);
        self.inner.notify_changed([key.to_string()]);
        Ok(vs)
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut state = self.inner.state.lock().await;
        if state.entries.remove(key).is_some() {
            state.next_versionstamp();
            self.inner.notify_changed([key.to_string()]);
        }
        Ok(())
    }

    #[instrument(
        skip(self, write),
        fields(
            backend = "memory",
            checks = write.checks.len(),
            mutations = write.mutations.len(),
            enqueues = write.enqueues.len()
        )
    )]
    async fn atomic(&self, write: AtomicWrite) -> StorageResult<CommitResult> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;

        for check in &write.checks {
            let current = state.live(&check.key, now).map(|entry| entry.versionstamp);
            if current != check.versionstamp {
                return Ok(CommitResult::CheckFailed);
            }
        }

        let vs = state.next_versionstamp();
        let mut changed = Vec::with_capacity(write.mutations.len());
        for mutation in write.mutations {
            changed.push(mutation.key().to_string());
            match mutation {
                Mutation::Set { key, value, ttl } => state.write(key, value, ttl, vs),
                Mutation::Delete { key } => {
                    state.entries.remove(&key);
                }
            }
        }

        let enqueued = !write.enqueues.is_empty();
        for payload in write.enqueues {
            state.push_message(payload);
        }
        drop(state);

        self.inner.notify_changed(changed);
        if enqueued {
            self.inner.queue_ready.notify_waiters();
        }
        Ok(CommitResult::Committed(vs))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Entry>> {
        let now = Instant::now();
        let state = self.inner.state.lock().await;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| Entry {
                key: key.clone(),
                value: entry.value.clone(),
                versionstamp: entry.versionstamp,
            })
            .collect())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn watch(&self, keys: Vec<String>) -> StorageResult<WatchStream> {
        // Subscribe before the initial read so no change can slip between them.
        let mut changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);

        let stream = async_stream::try_stream! {
            let mut seen: HashMap<String, Option<Versionstamp>> = HashMap::new();
            for key in &keys {
                let versionstamp = inner.versionstamp_of(key).await;
                seen.insert(key.clone(), versionstamp);
                yield WatchEvent { key: key.clone(), versionstamp };
            }

            loop {
                let candidates = match changes.recv().await {
                    Ok(key) if keys.contains(&key) => vec![key],
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "watcher lagged, rescanning watched keys");
                        keys.clone()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                for key in candidates {
                    let versionstamp = inner.versionstamp_of(&key).await;
                    if seen.get(&key) != Some(&versionstamp) {
                        seen.insert(key.clone(), versionstamp);
                        yield WatchEvent { key, versionstamp };
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, payload), fields(backend = "memory", size = payload.len()))]
    async fn enqueue(&self, payload: Bytes) -> StorageResult<()> {
        self.inner.state.lock().await.push_message(payload);
        self.inner.queue_ready.notify_waiters();
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn listen_queue(&self) -> StorageResult<QueueStream> {
        let inner = Arc::clone(&self.inner);

        let stream = async_stream::try_stream! {
            loop {
                let notified = inner.queue_ready.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match inner.lease_next().await {
                    Lease::Message(message) => yield message,
                    Lease::Wait(wait) => {
                        let _ = tokio::time::timeout(wait, notified).await;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn ack(&self, id: u64) -> StorageResult<()> {
        let mut state = self.inner.state.lock().await;
        state.queue.retain(|message| message.id != id);
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn purge_expired(&self) -> StorageResult<u64> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        Ok((before - state.entries.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
