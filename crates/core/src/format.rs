//! Watch event encodings.

use crate::index::IndexRecord;
use serde::{Deserialize, Serialize};

/// SSE event name carried by every upload notification.
pub const WATCH_EVENT_NAME: &str = "logupload";

/// Per-subscriber rendering of an upload notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchFormat {
    /// `{prefix} {size}` on one line.
    #[default]
    Text,
    /// A small HTML fragment for htmx swaps.
    Html,
}

impl WatchFormat {
    /// Strict parse of a `fmt` value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    /// Resolve a `fmt` query value; missing or unknown values fall back to text.
    pub fn from_query(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
        }
    }

    /// Render the event payload for a record.
    pub fn render(&self, record: &IndexRecord) -> String {
        let prefix = record.key_prefix.to_key();
        match self {
            Self::Text => format!("{} {}", prefix, record.size),
            Self::Html => format!(
                "<div><p class=\"\">Log uploaded: {}</p><p class=\"font-bold\">Size: {}</p></div>",
                escape_html(&prefix),
                record.size
            ),
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
