//! Chunked payload storage.
//!
//! An upload is written as ordered chunks `{key_prefix}/1..=n`, one per unit
//! read from the transport. Before the first chunk, the prefix key itself is
//! reserved with a create-only write so two uploads can never interleave
//! writes under the same chunk keys.
//!
//! The reservation outlives a successful commit, so the chunks of a published
//! record are never rewritten. An upload that never commits gives it back.

use crate::error::{StorageError, StorageResult};
use crate::traits::{AtomicWrite, CommitResult, KeyValueStore, Versionstamp};
use bytes::Bytes;
use chunklog_core::{KeyPrefix, LogId, LogType, UploadTimestamp, index_key};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// Lazy, ordered sequence of an upload's chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// What an ingest wrote. The caller turns this into an index record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestOutcome {
    pub size: u64,
    pub chunk_count: u64,
    pub key_prefix: KeyPrefix,
}

/// Chunks written but not yet published, with the prefix reservation held.
///
/// Call [`PendingUpload::hold`] once the index record is committed, or
/// [`PendingUpload::release`] when it will not be. Dropping it releases the
/// reservation in the background.
#[must_use = "dropping a pending upload releases its prefix reservation"]
pub struct PendingUpload {
    pub outcome: IngestOutcome,
    reservation: Reservation,
}

impl std::fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUpload")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl PendingUpload {
    /// Keep the prefix reserved until its TTL.
    pub fn hold(self) -> IngestOutcome {
        self.reservation.hold();
        self.outcome
    }

    pub async fn release(self) {
        self.reservation.release().await;
    }
}

/// Create-only claim on an upload's key prefix.
struct Reservation {
    store: Arc<dyn KeyValueStore>,
    key: String,
    index_key: String,
    versionstamp: Option<Versionstamp>,
    runtime_handle: Option<tokio::runtime::Handle>,
}

impl Reservation {
    fn hold(mut self) {
        self.versionstamp = None;
    }

    async fn release(mut self) {
        if let Some(versionstamp) = self.versionstamp.take() {
            release_reservation(self.store.as_ref(), &self.key, &self.index_key, versionstamp)
                .await;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(versionstamp) = self.versionstamp.take() else {
            return;
        };
        match &self.runtime_handle {
            Some(handle) => {
                let store = Arc::clone(&self.store);
                let key = std::mem::take(&mut self.key);
                let index_key = std::mem::take(&mut self.index_key);
                handle.spawn(async move {
                    release_reservation(store.as_ref(), &key, &index_key, versionstamp).await;
                });
            }
            None => tracing::warn!(
                prefix = %self.key,
                "upload reservation dropped outside a runtime; it expires with its TTL"
            ),
        }
    }
}

/// Drop a reservation unless it was replaced or its id has been committed.
///
/// A committed index keeps the prefix reserved even when the commit was made
/// by a caller that later failed, so published chunks are never rewritten.
async fn release_reservation(
    store: &dyn KeyValueStore,
    key: &str,
    index_key: &str,
    versionstamp: Versionstamp,
) {
    let write = AtomicWrite::new()
        .check(key, Some(versionstamp))
        .check(index_key, None)
        .delete(key);
    match store.atomic(write).await {
        Ok(CommitResult::Committed(_)) => {
            tracing::debug!(prefix = %key, "upload reservation released");
        }
        Ok(CommitResult::CheckFailed) => {
            tracing::debug!(prefix = %key, "upload reservation kept");
        }
        Err(e) => {
            tracing::warn!(prefix = %key, error = %e, "failed to release upload reservation");
        }
    }
}

/// Writes and reads chunked payloads.
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn KeyValueStore>,
    chunk_ttl: Duration,
}

impl ChunkStore {
    /// `chunk_ttl` must be at least as long as the index TTL.
    pub fn new(store: Arc<dyn KeyValueStore>, chunk_ttl: Duration) -> Self {
        Self { store, chunk_ttl }
    }

    /// Stream `body` into chunks under the upload's key prefix.
    ///
    /// Never commits an index record. On failure, chunks already written are
    /// left for the store TTL to reclaim and the prefix reservation is
    /// released so the upload can be retried.
    #[instrument(
        skip(self, id, log_type, timestamp, body),
        fields(log_id = %id, log_type = %log_type, timestamp = %timestamp)
    )]
    pub async fn ingest<S, E>(
        &self,
        id: &LogId,
        log_type: &LogType,
        timestamp: &UploadTimestamp,
        body: S,
    ) -> StorageResult<PendingUpload>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let key_prefix = KeyPrefix::new(timestamp, log_type, id);
        let reservation = self.reserve(&key_prefix, id).await?;

        match self.write_chunks(&key_prefix, body).await {
            Ok((size, chunk_count)) => {
                tracing::debug!(size, chunk_count, prefix = %key_prefix, "chunks written");
                Ok(PendingUpload {
                    outcome: IngestOutcome {
                        size,
                        chunk_count,
                        key_prefix,
                    },
                    reservation,
                })
            }
            Err(e) => {
                reservation.release().await;
                Err(e)
            }
        }
    }

    async fn reserve(&self, key_prefix: &KeyPrefix, id: &LogId) -> StorageResult<Reservation> {
        let key = key_prefix.to_key();
        let attempt = Uuid::new_v4();
        let write = AtomicWrite::new().check(key.as_str(), None).set(
            key.as_str(),
            Bytes::from(attempt.to_string()),
            Some(self.chunk_ttl),
        );

        match self.store.atomic(write).await? {
            CommitResult::Committed(vs) => Ok(Reservation {
                store: Arc::clone(&self.store),
                key,
                index_key: index_key(id),
                versionstamp: Some(vs),
                runtime_handle: tokio::runtime::Handle::try_current().ok(),
            }),
            CommitResult::CheckFailed => Err(StorageError::AlreadyExists(key)),
        }
    }

    async fn write_chunks<S, E>(&self, key_prefix: &KeyPrefix, body: S) -> StorageResult<(u64, u64)>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut size = 0u64;
        let mut chunk_count = 0u64;

        while let Some(unit) = body.next().await {
            let unit = unit.map_err(|e| StorageError::Transport(e.to_string()))?;
            if unit.is_empty() {
                continue;
            }

            chunk_count += 1;
            size += unit.len() as u64;
            self.store
                .set(&key_prefix.chunk_key(chunk_count), unit, Some(self.chunk_ttl))
                .await?;
        }

        Ok((size, chunk_count))
    }

    /// Read one chunk. A missing chunk inside the record's range is a
    /// truncation.
    async fn read_chunk(
        store: &dyn KeyValueStore,
        key_prefix: &KeyPrefix,
        n: u64,
        chunk_count: u64,
    ) -> StorageResult<Bytes> {
        match store.get(&key_prefix.chunk_key(n)).await? {
            Some(entry) => Ok(entry.value),
            None => Err(StorageError::Truncated {
                prefix: key_prefix.to_key(),
                chunk_count,
                missing: n,
            }),
        }
    }

    /// Reassemble a committed upload.
    ///
    /// The first chunk is read before this returns, so a missing or failing
    /// first chunk surfaces as an error instead of an empty stream. Remaining
    /// chunks are read lazily in order. The stream ends with
    /// `StorageError::SizeMismatch` if the bytes read differ from `size`.
    #[instrument(skip(self, key_prefix), fields(prefix = %key_prefix))]
    pub async fn retrieve(
        &self,
        key_prefix: &KeyPrefix,
        size: u64,
        chunk_count: u64,
    ) -> StorageResult<ChunkStream> {
        let first = if chunk_count > 0 {
            Some(Self::read_chunk(self.store.as_ref(), key_prefix, 1, chunk_count).await?)
        } else {
            None
        };

        let store = Arc::clone(&self.store);
        let key_prefix = key_prefix.clone();

        let stream = async_stream::try_stream! {
            let mut total = 0u64;
            if let Some(first) = first {
                total += first.len() as u64;
                yield first;
            }

            for n in 2..=chunk_count {
                let chunk = Self::read_chunk(store.as_ref(), &key_prefix, n, chunk_count).await?;
                total += chunk.len() as u64;
                yield chunk;
            }

            if total != size {
                tracing::error!(
                    prefix = %key_prefix,
                    expected = size,
                    actual = total,
                    "reassembled size does not match index record"
                );
                Err::<(), _>(StorageError::SizeMismatch {
                    expected: size,
                    actual: total,
                })?;
            }
        };

        Ok(Box::pin(stream))
    }
}
