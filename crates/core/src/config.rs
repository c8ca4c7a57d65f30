//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Interval between SSE keep-alive comments on idle watch streams.
    #[serde(default = "default_watch_keep_alive_secs")]
    pub watch_keep_alive_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_watch_keep_alive_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            watch_keep_alive_secs: default_watch_keep_alive_secs(),
        }
    }
}

impl ServerConfig {
    pub fn watch_keep_alive(&self) -> Duration {
        Duration::from_secs(self.watch_keep_alive_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.watch_keep_alive_secs == 0 {
            return Err("server.watch_keep_alive_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Key-value store adapter configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process store. Contents are lost on restart and not shared between
    /// instances.
    Memory {
        /// Lease duration of a delivered queue message before redelivery.
        #[serde(default = "default_queue_visibility_timeout_secs")]
        queue_visibility_timeout_secs: u64,
    },
    /// SQLite database shared by every instance on the same host.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// How often watchers poll for changes made by other processes.
        #[serde(default = "default_watch_poll_interval_ms")]
        watch_poll_interval_ms: u64,
        /// Lease duration of a delivered queue message before redelivery.
        #[serde(default = "default_queue_visibility_timeout_secs")]
        queue_visibility_timeout_secs: u64,
    },
}

fn default_watch_poll_interval_ms() -> u64 {
    250
}

fn default_queue_visibility_timeout_secs() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory {
            queue_visibility_timeout_secs: default_queue_visibility_timeout_secs(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Memory {
                queue_visibility_timeout_secs,
            } => validate_visibility(*queue_visibility_timeout_secs),
            StorageConfig::Sqlite {
                path,
                watch_poll_interval_ms,
                queue_visibility_timeout_secs,
            } => {
                if path.as_os_str().is_empty() {
                    return Err("storage.path must not be empty".to_string());
                }
                if *watch_poll_interval_ms == 0 {
                    return Err("storage.watch_poll_interval_ms must be greater than 0".to_string());
                }
                validate_visibility(*queue_visibility_timeout_secs)
            }
        }
    }
}

fn validate_visibility(secs: u64) -> Result<(), String> {
    if secs == 0 {
        return Err("storage.queue_visibility_timeout_secs must be greater than 0".to_string());
    }
    Ok(())
}

/// Log retention and upload acceptance configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Logical lifetime of an upload, after which it reads as not found.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Store-level TTL of index and chunk keys as a multiple of the retention.
    /// Must be at least 1 so a reader never sees chunks vanish before the index.
    #[serde(default = "default_storage_ttl_factor")]
    pub storage_ttl_factor: u32,
    /// TTL of the latest-upload pointer.
    #[serde(default = "default_pointer_ttl_secs")]
    pub pointer_ttl_secs: u64,
    /// The single accepted `x-format` value.
    #[serde(default = "default_accepted_format")]
    pub accepted_format: String,
    /// Interval of the expired-entry purge sweep.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_retention_secs() -> u64 {
    crate::DEFAULT_RETENTION_SECS
}

fn default_storage_ttl_factor() -> u32 {
    crate::DEFAULT_STORAGE_TTL_FACTOR
}

fn default_pointer_ttl_secs() -> u64 {
    crate::DEFAULT_POINTER_TTL_SECS
}

fn default_accepted_format() -> String {
    crate::DEFAULT_LOG_FORMAT.to_string()
}

fn default_purge_interval_secs() -> u64 {
    300
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            storage_ttl_factor: default_storage_ttl_factor(),
            pointer_ttl_secs: default_pointer_ttl_secs(),
            accepted_format: default_accepted_format(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl LogsConfig {
    /// Logical retention as a signed duration for deadline arithmetic.
    pub fn retention(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.retention_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Store-level TTL for index and chunk keys.
    pub fn storage_ttl(&self) -> Duration {
        Duration::from_secs(
            self.retention_secs
                .saturating_mul(u64::from(self.storage_ttl_factor)),
        )
    }

    pub fn pointer_ttl(&self) -> Duration {
        Duration::from_secs(self.pointer_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retention_secs == 0 {
            return Err("logs.retention_secs must be greater than 0".to_string());
        }
        if self.storage_ttl_factor == 0 {
            return Err("logs.storage_ttl_factor must be at least 1".to_string());
        }
        if self.pointer_ttl_secs == 0 {
            return Err("logs.pointer_ttl_secs must be greater than 0".to_string());
        }
        if self.purge_interval_secs == 0 {
            return Err("logs.purge_interval_secs must be greater than 0".to_string());
        }
        if self.accepted_format.trim().is_empty() {
            return Err("logs.accepted_format must not be empty".to_string());
        }
        Ok(())
    }
}

/// Retrieval response cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the response cache.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Total bytes of cached response bodies.
    #[serde(default = "default_max_capacity_bytes")]
    pub max_capacity_bytes: u64,
    /// Responses larger than this are served but never cached.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    /// Time-to-live of a cached response.
    #[serde(default = "default_time_to_live_secs")]
    pub time_to_live_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_max_capacity_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_max_entry_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_time_to_live_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_capacity_bytes: default_max_capacity_bytes(),
            max_entry_bytes: default_max_entry_bytes(),
            time_to_live_secs: default_time_to_live_secs(),
        }
    }
}

impl CacheConfig {
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_entry_bytes > self.max_capacity_bytes {
            return Err(format!(
                "cache.max_entry_bytes ({}) must not exceed cache.max_capacity_bytes ({})",
                self.max_entry_bytes, self.max_capacity_bytes
            ));
        }
        if self.time_to_live_secs == 0 {
            return Err("cache.time_to_live_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Full application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Store adapter configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Retention and upload acceptance.
    #[serde(default)]
    pub logs: LogsConfig,
    /// Retrieval response cache.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the in-memory store.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.logs.validate()?;
        self.cache.validate()
    }
}
