//! SQLite-backed key-value store.
//!
//! Several processes on one host may share a database file. Watches and the
//! queue listener are woken immediately by writes from this process and poll
//! for writes made by others.

use crate::error::StorageResult;
use crate::traits::{
    AtomicWrite, CommitResult, Entry, KeyValueStore, Mutation, QueueMessage, QueueStream,
    Versionstamp, WatchEvent, WatchStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Notify, broadcast};
use tracing::instrument;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// SQLite-backed key-value store.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<String>,
    queue_ready: Arc<Notify>,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(
        path: impl AsRef<Path>,
        poll_interval: Duration,
        visibility_timeout: Duration,
    ) -> StorageResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Another process may hold the write lock briefly.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // Serializes this process's transactions.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        let (changes, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);

        tracing::info!(
            path = %path.display(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "opened SQLite key-value store"
        );

        Ok(Self {
            pool,
            changes,
            queue_ready: Arc::new(Notify::new()),
            poll_interval,
            visibility_timeout,
        })
    }

    fn notify_changed(&self, keys: impl IntoIterator<Item = String>) {
        for key in keys {
            let _ = self.changes.send(key);
        }
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn expiry_millis(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

fn to_versionstamp(value: i64) -> Versionstamp {
    Versionstamp::new(value.max(0) as u64)
}

async fn next_versionstamp(conn: &mut SqliteConnection) -> StorageResult<i64> {
    let value: i64 =
        sqlx::query_scalar("UPDATE kv_sequence SET value = value + 1 WHERE id = 1 RETURNING value")
            .fetch_one(&mut *conn)
            .await?;
    Ok(value)
}

async fn upsert(
    conn: &mut SqliteConnection,
    key: &str,
    value: &[u8],
    versionstamp: i64,
    expires_at: Option<i64>,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO kv_entries (key, value, versionstamp, expires_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            versionstamp = excluded.versionstamp,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(versionstamp)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn live_versionstamp(
    conn: &mut SqliteConnection,
    key: &str,
    now: i64,
) -> StorageResult<Option<Versionstamp>> {
    let value: Option<i64> = sqlx::query_scalar(
        "SELECT versionstamp FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(key)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(value.map(to_versionstamp))
}

#[async_trait]
impl KeyValueStore for SqliteBackend {
    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>> {
        let row: Option<(Vec<u8>, i64)> = sqlx::query_as(
            "SELECT value, versionstamp FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value, versionstamp)| Entry {
            key: key.to_string(),
            value: Bytes::from(value),
            versionstamp: to_versionstamp(versionstamp),
        }))
    }

    #[instrument(skip(self, value), fields(backend = "sqlite", size = value.len()))]
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> StorageResult<Versionstamp> {
        let mut tx = self.pool.begin().await?;
        let vs = next_versionstamp(&mut tx).await?;
        upsert(&mut tx, key, &value, vs, expiry_millis(now_millis(), ttl)).await?;
        tx.commit().await?;

        self.notify_changed([key.to_string()]);
        Ok(to_versionstamp(vs))
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            self.notify_changed([key.to_string()]);
        }
        Ok(())
    }

    #[instrument(
        skip(self, write),
        fields(
            backend = "sqlite",
            checks = write.checks.len(),
            mutations = write.mutations.len(),
            enqueues = write.enqueues.len()
        )
    )]
    async fn atomic(&self, write: AtomicWrite) -> StorageResult<CommitResult> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        for check in &write.checks {
            let current = live_versionstamp(&mut tx, &check.key, now).await?;
            if current != check.versionstamp {
                tx.rollback().await?;
                return Ok(CommitResult::CheckFailed);
            }
        }

        let vs = next_versionstamp(&mut tx).await?;
        let mut changed = Vec::with_capacity(write.mutations.len());
        for mutation in &write.mutations {
            match mutation {
                Mutation::Set { key, value, ttl } => {
                    upsert(&mut tx, key, value, vs, expiry_millis(now, *ttl)).await?;
                }
                Mutation::Delete { key } => {
                    sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            changed.push(mutation.key().to_string());
        }

        for payload in &write.enqueues {
            sqlx::query("INSERT INTO kv_queue (payload, enqueued_at) VALUES (?, ?)")
                .bind(&payload[..])
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.notify_changed(changed);
        if !write.enqueues.is_empty() {
            self.queue_ready.notify_waiters();
        }
        Ok(CommitResult::Committed(to_versionstamp(vs)))
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<Entry>> {
        let rows: Vec<(String, Vec<u8>, i64)> = sqlx::query_as(
            r#"
            SELECT key, value, versionstamp FROM kv_entries
            WHERE substr(key, 1, length(?1)) = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .bind(now_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value, versionstamp)| Entry {
                key,
                value: Bytes::from(value),
                versionstamp: to_versionstamp(versionstamp),
            })
            .collect())
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn watch(&self, keys: Vec<String>) -> StorageResult<WatchStream> {
        let mut changes = self.changes.subscribe();
        let pool = self.pool.clone();
        let poll_interval = self.poll_interval;

        let stream = async_stream::try_stream! {
            let mut seen: HashMap<String, Option<Versionstamp>> = HashMap::new();
            loop {
                for key in &keys {
                    let mut conn = pool.acquire().await?;
                    let versionstamp = live_versionstamp(&mut conn, key, now_millis()).await?;
                    drop(conn);
                    if seen.get(key) != Some(&versionstamp) {
                        seen.insert(key.clone(), versionstamp);
                        yield WatchEvent { key: key.clone(), versionstamp };
                    }
                }

                tokio::select! {
                    received = changes.recv() => {
                        if let Err(broadcast::error::RecvError::Closed) = received {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, payload), fields(backend = "sqlite", size = payload.len()))]
    async fn enqueue(&self, payload: Bytes) -> StorageResult<()> {
        sqlx::query("INSERT INTO kv_queue (payload, enqueued_at) VALUES (?, ?)")
            .bind(&payload[..])
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        self.queue_ready.notify_waiters();
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn listen_queue(&self) -> StorageResult<QueueStream> {
        let pool = self.pool.clone();
        let queue_ready = Arc::clone(&self.queue_ready);
        let poll_interval = self.poll_interval;
        let visibility_ms = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);

        let stream = async_stream::try_stream! {
            loop {
                let notified = queue_ready.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let now = now_millis();
                let leased: Option<(i64, Vec<u8>)> = sqlx::query_as(
                    r#"
                    UPDATE kv_queue SET leased_until = ?1
                    WHERE message_id = (
                        SELECT message_id FROM kv_queue
                        WHERE leased_until IS NULL OR leased_until <= ?2
                        ORDER BY message_id
                        LIMIT 1
                    )
                    RETURNING message_id, payload
                    "#,
                )
                .bind(now.saturating_add(visibility_ms))
                .bind(now)
                .fetch_optional(&pool)
                .await?;

                match leased {
                    Some((id, payload)) => {
                        yield QueueMessage { id: id.max(0) as u64, payload: Bytes::from(payload) };
                    }
                    None => {
                        let _ = tokio::time::timeout(poll_interval, notified).await;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn ack(&self, id: u64) -> StorageResult<()> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(());
        };
        sqlx::query("DELETE FROM kv_queue WHERE message_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "sqlite"))]
    async fn purge_expired(&self) -> StorageResult<u64> {
        let result =
            sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_millis())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// SQL schema for the SQLite store.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    versionstamp INTEGER NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_kv_entries_expires_at ON kv_entries(expires_at);

CREATE TABLE IF NOT EXISTS kv_sequence (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO kv_sequence (id, value) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS kv_queue (
    message_id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL,
    leased_until INTEGER
);
"#;
