//! The latest-upload pointer.
//!
//! Committed index records are enqueued on the store's side-channel queue.
//! A single [`PointerPublisher`] per process drains that queue into the
//! `logs/latest` key; any number of [`PointerHandle`]s observe it.

use crate::error::{StorageError, StorageResult};
use crate::traits::{KeyValueStore, QueueMessage};
use bytes::Bytes;
use chunklog_core::{IndexRecord, LATEST_LOG_KEY};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Ordered pointer states as observed by one subscriber.
pub type PointerStream = Pin<Box<dyn Stream<Item = StorageResult<IndexRecord>> + Send>>;

/// Delay before re-opening the queue after a storage failure.
const QUEUE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Republishes committed records into the latest-upload pointer.
pub struct PointerPublisher {
    store: Arc<dyn KeyValueStore>,
    pointer_ttl: Duration,
}

impl PointerPublisher {
    pub fn new(store: Arc<dyn KeyValueStore>, pointer_ttl: Duration) -> Self {
        Self { store, pointer_ttl }
    }

    /// A read-only handle on the pointer this publisher maintains.
    pub fn handle(&self) -> PointerHandle {
        PointerHandle::new(Arc::clone(&self.store))
    }

    /// Run the publisher on its own task until aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Drain the queue forever.
    pub async fn run(self) {
        tracing::info!(
            backend = self.store.backend_name(),
            pointer_ttl_secs = self.pointer_ttl.as_secs(),
            "pointer publisher started"
        );

        loop {
            if let Err(e) = self.drain().await {
                tracing::error!(error = %e, "pointer publisher queue failed, reconnecting");
            }
            tokio::time::sleep(QUEUE_RECONNECT_DELAY).await;
        }
    }

    async fn drain(&self) -> StorageResult<()> {
        let mut queue = self.store.listen_queue().await?;
        while let Some(message) = queue.next().await {
            self.publish(message?).await?;
        }
        Ok(())
    }

    /// Write one queued record into the pointer, then ack it.
    ///
    /// The message is only acked after the pointer write succeeds, so a
    /// failed write is redelivered after the visibility timeout.
    pub async fn publish(&self, message: QueueMessage) -> StorageResult<()> {
        match IndexRecord::from_json(&message.payload) {
            Ok(record) => {
                self.store
                    .set(LATEST_LOG_KEY, message.payload.clone(), Some(self.pointer_ttl))
                    .await?;
                tracing::info!(
                    log_id = %record.id,
                    size = record.size,
                    prefix = %record.key_prefix,
                    "latest upload pointer updated"
                );
            }
            Err(e) => {
                // Redelivering a payload that never parses would loop forever.
                tracing::warn!(message_id = message.id, error = %e, "dropping malformed queue message");
            }
        }

        self.store.ack(message.id).await
    }
}

/// Cloneable read access to the latest-upload pointer.
#[derive(Clone)]
pub struct PointerHandle {
    store: Arc<dyn KeyValueStore>,
}

impl PointerHandle {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The current pointer, if one is live.
    pub async fn current(&self) -> StorageResult<Option<IndexRecord>> {
        let Some(entry) = self.store.get(LATEST_LOG_KEY).await? else {
            return Ok(None);
        };
        Ok(Some(IndexRecord::from_json(&entry.value)?))
    }

    /// Subscribe to pointer changes.
    ///
    /// The store watch is opened before this returns. The stream first yields
    /// the current pointer (if any), then every later state it observes.
    /// Absent pointers are skipped.
    pub async fn subscribe(&self) -> StorageResult<PointerStream> {
        let mut changes = self.store.watch(vec![LATEST_LOG_KEY.to_string()]).await?;
        let handle = self.clone();

        let stream = async_stream::try_stream! {
            while let Some(event) = changes.next().await {
                if event?.versionstamp.is_none() {
                    continue;
                }
                match handle.current().await {
                    Ok(Some(record)) => yield record,
                    Ok(None) => {}
                    Err(StorageError::Core(e)) => {
                        tracing::warn!(error = %e, "ignoring unreadable latest upload pointer");
                    }
                    Err(e) => Err::<(), _>(e)?,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Overwrite the pointer directly. Intended for tools and tests; the
    /// publisher is the only writer in a running service.
    pub async fn overwrite(&self, record: &IndexRecord, ttl: Duration) -> StorageResult<()> {
        self.store
            .set(LATEST_LOG_KEY, Bytes::from(record.to_json()?), Some(ttl))
            .await?;
        Ok(())
    }
}
