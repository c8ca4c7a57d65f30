//! Key-value store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

/// A boxed stream of change notifications for watched keys.
pub type WatchStream = Pin<Box<dyn Stream<Item = StorageResult<WatchEvent>> + Send>>;

/// A boxed stream of queue deliveries.
pub type QueueStream = Pin<Box<dyn Stream<Item = StorageResult<QueueMessage>> + Send>>;

/// Monotonic version assigned to every committed write.
///
/// Versionstamps are totally ordered within one store; a later commit always
/// carries a larger stamp.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Versionstamp(u64);

impl Versionstamp {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Versionstamp({:020})", self.0)
    }
}

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

/// A live key-value entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    pub versionstamp: Versionstamp,
}

/// One precondition of an atomic write.
///
/// `versionstamp: None` asserts the key is absent (or expired).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Check {
    pub key: String,
    pub versionstamp: Option<Versionstamp>,
}

/// One mutation of an atomic write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Set {
        key: String,
        value: Bytes,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

impl Mutation {
    pub fn key(&self) -> &str {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

/// An all-or-nothing batch of checks, mutations and queue enqueues.
///
/// If any check fails nothing is applied. Otherwise every mutation and
/// enqueue becomes visible at once under a single new versionstamp.
#[derive(Clone, Debug, Default)]
pub struct AtomicWrite {
    pub checks: Vec<Check>,
    pub mutations: Vec<Mutation>,
    pub enqueues: Vec<Bytes>,
}

impl AtomicWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to currently hold `versionstamp` (`None` = absent).
    pub fn check(mut self, key: impl Into<String>, versionstamp: Option<Versionstamp>) -> Self {
        self.checks.push(Check {
            key: key.into(),
            versionstamp,
        });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: Bytes, ttl: Option<Duration>) -> Self {
        self.mutations.push(Mutation::Set {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.mutations.push(Mutation::Delete { key: key.into() });
        self
    }

    pub fn enqueue(mut self, payload: Bytes) -> Self {
        self.enqueues.push(payload);
        self
    }
}

/// Outcome of an atomic write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitResult {
    Committed(Versionstamp),
    CheckFailed,
}

impl CommitResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitResult::Committed(_))
    }
}

/// A change observed on a watched key.
///
/// Carries the versionstamp the key held when the change was observed
/// (`None` when absent). Consumers re-read the key for its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub versionstamp: Option<Versionstamp>,
}

/// A message delivered from the side-channel queue.
///
/// Delivery is at-least-once: a message that is not acked within the
/// visibility timeout is delivered again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: u64,
    pub payload: Bytes,
}

/// Ordered key-value store with atomic compare-and-set, TTL on write,
/// prefix scans, key watches and an at-least-once queue.
///
/// Entries whose TTL has elapsed must read as absent from every operation
/// even before `purge_expired` reclaims them.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a live entry.
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>>;

    /// Unconditionally write a value.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>)
    -> StorageResult<Versionstamp>;

    /// Unconditionally remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Apply an atomic write.
    async fn atomic(&self, write: AtomicWrite) -> StorageResult<CommitResult>;

    /// List live entries whose key starts with `prefix`, in key order.
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Entry>>;

    /// Watch a set of keys.
    ///
    /// The stream first yields the current state of every watched key, then
    /// one event per observed change. Changes may be coalesced; the stream
    /// never yields the same versionstamp twice for one key.
    async fn watch(&self, keys: Vec<String>) -> StorageResult<WatchStream>;

    /// Enqueue a message on the side-channel queue.
    async fn enqueue(&self, payload: Bytes) -> StorageResult<()>;

    /// Consume the side-channel queue.
    async fn listen_queue(&self) -> StorageResult<QueueStream>;

    /// Acknowledge a delivered message. Acking twice is not an error.
    async fn ack(&self, id: u64) -> StorageResult<()>;

    /// Physically remove expired entries, returning how many were removed.
    async fn purge_expired(&self) -> StorageResult<u64>;

    /// Get the name of this store adapter.
    ///
    /// Used for metrics, logging and the health endpoint.
    fn backend_name(&self) -> &'static str;

    /// Verify the store is reachable.
    ///
    /// The default implementation returns Ok(()), suitable for in-process
    /// adapters.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
