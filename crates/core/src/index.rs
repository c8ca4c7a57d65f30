//! Index records: the sole reader-visible proof of a complete upload.

use crate::layout::{KeyPrefix, LogId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Metadata committed once per accepted upload.
///
/// Never mutated after commit. Readers must treat a record whose `expires_at`
/// has passed exactly like a missing one, even if the store still holds it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Upload identifier.
    pub id: LogId,
    /// Total payload size in bytes.
    pub size: u64,
    /// Number of chunks stored under `key_prefix`.
    pub chunk_count: u64,
    /// Prefix of the chunk keys `{key_prefix}/{1..=chunk_count}`.
    pub key_prefix: KeyPrefix,
    /// Logical expiry deadline.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl IndexRecord {
    pub fn new(
        id: LogId,
        size: u64,
        chunk_count: u64,
        key_prefix: KeyPrefix,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            size,
            chunk_count,
            key_prefix,
            expires_at,
        }
    }

    /// Whether the record is logically absent at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }

    /// Whether the record is logically absent now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Serialize to the stored JSON form.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Parse the stored JSON form.
    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}
