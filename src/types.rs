//! Core alert types
//!
//! Wire format is snake_case JSON for compatibility with existing
//! dashboards and webhook senders.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Default severity when a payload carries none
pub const DEFAULT_LEVEL: &str = "info";

/// A single accepted alert
///
/// Identity is assigned by the store from a monotonic counter. Fields
/// are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Monotonic identifier assigned on `add`
    pub id: u64,

    /// Creation time (UTC)
    pub created_at: DateTime<Utc>,

    /// Free-text origin tag (e.g. `bot:ops:chat:42`)
    pub source: String,

    /// Free-text severity tag
    pub level: String,

    /// Short headline
    pub title: String,

    /// Body text
    pub message: String,
}

impl Alert {
    /// Build an alert stamped with the current time
    pub fn new(
        id: u64,
        source: impl Into<String>,
        level: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            source: source.into(),
            level: level.into(),
            title: title.into(),
            message: message.into(),
        }
    }

    /// Record key used by key-value backends
    pub fn key(id: u64) -> String {
        format!("alert:{}", id)
    }

    /// Creation time in Unix milliseconds, used as the timeline score
    pub fn timestamp_millis(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    /// Whether this alert came from the given chat (`chat:<tag>` in source)
    pub fn belongs_to_chat(&self, chat_tag: &str) -> bool {
        self.source.contains(&format!("chat:{}", chat_tag))
    }

    /// Case-insensitive substring match over title, message, and source
    pub fn matches_text(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let haystack = format!("{} {} {}", self.title, self.message, self.source).to_lowercase();
        haystack.contains(&query.to_lowercase())
    }

    /// Creation time formatted as RFC3339 with second precision
    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Sort newest-first; identical timestamps fall back to descending id
pub fn sort_newest_first(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Normalize a level or source value for index lookups
pub fn index_value(value: &str) -> String {
    value.to_lowercase()
}

/// Secondary index families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Level,
    Source,
}

impl IndexKind {
    /// Key prefix used by key-value backends
    pub fn prefix(&self) -> &'static str {
        match self {
            IndexKind::Level => "alerts:level:",
            IndexKind::Source => "alerts:source:",
        }
    }

    /// Full index key for a (normalized) value
    pub fn key(&self, value: &str) -> String {
        format!("{}{}", self.prefix(), index_value(value))
    }
}

/// Response body for a successful webhook ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub id: u64,
    pub created_at: String,
}

impl From<&Alert> for IngestResponse {
    fn from(alert: &Alert) -> Self {
        Self {
            status: "ok".to_string(),
            id: alert.id,
            created_at: alert.created_at_rfc3339(),
        }
    }
}

/// Response body for list and search queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertList {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

impl From<Vec<Alert>> for AlertList {
    fn from(alerts: Vec<Alert>) -> Self {
        let count = alerts.len();
        Self { alerts, count }
    }
}

/// Which alerts a purge removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeScope {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "chat-specific")]
    ChatSpecific,
}

/// Response body for a purge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub scope: PurgeScope,
    /// Alerts removed, reported for chat-specific purges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purged: Option<usize>,
}
