//! Live push of upload notifications.
//!
//! Each subscriber gets its own watch on the latest-upload pointer, so
//! delivery is multicast: every subscriber sees every pointer state it
//! observes, in commit order, and a slow or departing subscriber affects no
//! one else.

use crate::metrics;
use chunklog_core::WatchFormat;
use chunklog_storage::{PointerHandle, StorageResult};
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// Rendered event payloads for one subscriber.
pub type EventStream = Pin<Box<dyn Stream<Item = StorageResult<String>> + Send>>;

/// Hands out pointer subscriptions rendered in a chosen format.
#[derive(Clone)]
pub struct WatchFanout {
    pointer: PointerHandle,
}

impl WatchFanout {
    pub fn new(pointer: PointerHandle) -> Self {
        Self { pointer }
    }

    /// Open a subscription. The underlying store watch is live when this
    /// returns; dropping the stream closes it.
    pub async fn subscribe(&self, format: WatchFormat) -> StorageResult<EventStream> {
        let mut updates = self.pointer.subscribe().await?;
        let guard = SubscriberGuard::new(format);

        let stream = async_stream::stream! {
            let _guard = guard;
            while let Some(update) = updates.next().await {
                match update {
                    Ok(record) => {
                        tracing::debug!(log_id = %record.id, "pushing upload event");
                        metrics::WATCH_EVENTS_SENT.inc();
                        yield Ok(format.render(&record));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "watch subscription failed");
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Tracks one connected subscriber for its lifetime.
struct SubscriberGuard {
    format: WatchFormat,
}

impl SubscriberGuard {
    fn new(format: WatchFormat) -> Self {
        metrics::WATCH_SUBSCRIBERS.inc();
        tracing::debug!(format = format.as_str(), "watch subscriber connected");
        Self { format }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        metrics::WATCH_SUBSCRIBERS.dec();
        tracing::debug!(format = self.format.as_str(), "watch subscriber disconnected");
    }
}
