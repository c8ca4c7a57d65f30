//! Persisted key layout.
//!
//! ```text
//! logs/{id}                                  -> index record
//! logs/idx1/{date}/{dateTs}/{type}/{id}      -> upload reservation
//! logs/idx1/{date}/{dateTs}/{type}/{id}/{n}  -> chunk n (1-based)
//! logs/latest                                -> latest upload pointer
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '/';

/// Root namespace of every key written by the service.
pub const LOGS_NAMESPACE: &str = "logs";

/// Version segment of the chunk layout.
pub const CHUNK_LAYOUT_VERSION: &str = "idx1";

/// Key of the latest-upload pointer.
pub const LATEST_LOG_KEY: &str = "logs/latest";

/// Maximum length of a single key segment.
const MAX_SEGMENT_LEN: usize = 256;

/// Ids that would alias a fixed key under `logs/`.
const RESERVED_IDS: &[&str] = &["latest", CHUNK_LAYOUT_VERSION];

fn validate_segment(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("must not be empty".to_string());
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(format!(
            "length {} exceeds maximum {}",
            value.len(),
            MAX_SEGMENT_LEN
        ));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(format!("must not contain '{KEY_SEPARATOR}'"));
    }
    if value.chars().any(char::is_control) {
        return Err("must not contain control characters".to_string());
    }
    Ok(())
}

/// Caller-supplied upload identifier (typically a UUID).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogId(String);

impl LogId {
    /// Parse and validate an upload id.
    pub fn parse(s: &str) -> crate::Result<Self> {
        validate_segment(s).map_err(|e| crate::Error::InvalidLogId(format!("{s:?}: {e}")))?;
        if RESERVED_IDS.contains(&s) {
            return Err(crate::Error::InvalidLogId(format!("{s:?} is reserved")));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LogId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<LogId> for String {
    fn from(value: LogId) -> Self {
        value.0
    }
}

impl fmt::Debug for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogId({})", self.0)
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-form log type tag (e.g. `build`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogType(String);

impl LogType {
    pub fn parse(s: &str) -> crate::Result<Self> {
        validate_segment(s).map_err(|e| crate::Error::InvalidLogType(format!("{s:?}: {e}")))?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two-part timestamp bucket in `{date}-{dateTimestamp}` form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadTimestamp {
    date: String,
    date_ts: String,
}

impl UploadTimestamp {
    /// Parse `{date}-{dateTimestamp}`. Exactly one `-` is allowed.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        let [date, date_ts] = parts.as_slice() else {
            return Err(crate::Error::InvalidTimestamp(format!(
                "{s:?}: expected {{date}}-{{dateTimestamp}}"
            )));
        };
        for part in [date, date_ts] {
            validate_segment(part)
                .map_err(|e| crate::Error::InvalidTimestamp(format!("{s:?}: {e}")))?;
        }
        Ok(Self {
            date: date.to_string(),
            date_ts: date_ts.to_string(),
        })
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn date_ts(&self) -> &str {
        &self.date_ts
    }
}

impl fmt::Display for UploadTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.date, self.date_ts)
    }
}

/// Ordered key segments under which an upload's chunks live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPrefix(Vec<String>);

impl KeyPrefix {
    /// Build the chunk prefix for an upload.
    pub fn new(timestamp: &UploadTimestamp, log_type: &LogType, id: &LogId) -> Self {
        Self(vec![
            LOGS_NAMESPACE.to_string(),
            CHUNK_LAYOUT_VERSION.to_string(),
            timestamp.date().to_string(),
            timestamp.date_ts().to_string(),
            log_type.as_str().to_string(),
            id.as_str().to_string(),
        ])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The prefix joined into a single key (also the reservation key).
    pub fn to_key(&self) -> String {
        self.0.join("/")
    }

    /// Key of chunk `n` (1-based).
    pub fn chunk_key(&self, n: u64) -> String {
        format!("{}/{}", self.to_key(), n)
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// Key of the index record for an upload id.
pub fn index_key(id: &LogId) -> String {
    format!("{LOGS_NAMESPACE}/{id}")
}
