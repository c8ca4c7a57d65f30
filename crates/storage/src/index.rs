//! Index record commits and lookups.

use crate::chunks::IngestOutcome;
use crate::error::StorageResult;
use crate::traits::{AtomicWrite, CommitResult, KeyValueStore};
use bytes::Bytes;
use chunklog_core::config::LogsConfig;
use chunklog_core::{IndexRecord, LogId, index_key};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// Result of an index commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Another upload already owns this id. Never retried.
    AlreadyExists,
}

/// Owns the exactly-once publication of index records.
#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn KeyValueStore>,
    retention: time::Duration,
    storage_ttl: Duration,
}

impl IndexManager {
    pub fn new(store: Arc<dyn KeyValueStore>, retention: time::Duration, storage_ttl: Duration) -> Self {
        Self {
            store,
            retention,
            storage_ttl,
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &LogsConfig) -> Self {
        Self::new(store, config.retention(), config.storage_ttl())
    }

    /// Build the record for a finished ingest, expiring one retention from now.
    pub fn record_for(&self, id: LogId, outcome: IngestOutcome) -> IndexRecord {
        IndexRecord::new(
            id,
            outcome.size,
            outcome.chunk_count,
            outcome.key_prefix,
            OffsetDateTime::now_utc() + self.retention,
        )
    }

    /// Publish a record.
    ///
    /// In one atomic write: create `logs/{id}` only if absent and enqueue the
    /// record for the pointer publisher. Of N concurrent commits for one id,
    /// exactly one returns `Committed`.
    #[instrument(skip(self, record), fields(log_id = %record.id, size = record.size))]
    pub async fn commit(&self, record: &IndexRecord) -> StorageResult<CommitOutcome> {
        let key = index_key(&record.id);
        let json = Bytes::from(record.to_json()?);

        let write = AtomicWrite::new()
            .check(key.as_str(), None)
            .set(key.as_str(), json.clone(), Some(self.storage_ttl))
            .enqueue(json);

        match self.store.atomic(write).await? {
            CommitResult::Committed(vs) => {
                tracing::debug!(versionstamp = %vs, "index record committed");
                Ok(CommitOutcome::Committed)
            }
            CommitResult::CheckFailed => Ok(CommitOutcome::AlreadyExists),
        }
    }

    /// Read a record. Absent and logically expired records both read as `None`.
    #[instrument(skip(self), fields(log_id = %id))]
    pub async fn lookup(&self, id: &LogId) -> StorageResult<Option<IndexRecord>> {
        let Some(entry) = self.store.get(&index_key(id)).await? else {
            return Ok(None);
        };

        let record = IndexRecord::from_json(&entry.value)?;
        if record.is_expired() {
            tracing::debug!(expires_at = %record.expires_at, "index record expired");
            return Ok(None);
        }
        Ok(Some(record))
    }
}
