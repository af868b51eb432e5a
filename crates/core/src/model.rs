// Notification data model
//
// NotificationRecord is the durable shape shared with the notification
// store; ToastNotification is the transient alert owned by the toast queue.
// Wire names follow the store's JSON (url, timestamp).

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default time a toast stays visible
pub const DEFAULT_TOAST_TTL: Duration = Duration::from_millis(5000);

/// Maximum number of toasts held at once
pub const DEFAULT_TOAST_CAPACITY: usize = 10;

/// Maximum number of records held in the history cache
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Target used when a source does not supply one
pub const DEFAULT_TARGET_URL: &str = "/";

// ============================================================================
// NotificationRecord
// ============================================================================

/// Durable notification as stored in the history cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Source-assigned or synthesized identifier; identity of the record
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    /// Where the UI navigates when the record is opened
    #[serde(rename = "url", default = "default_target_url")]
    pub target_url: String,
    #[serde(rename = "timestamp")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

fn default_target_url() -> String {
    DEFAULT_TARGET_URL.to_string()
}

impl NotificationRecord {
    /// Create an unread record occurring now
    pub fn new(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            target_url: default_target_url(),
            occurred_at: Utc::now(),
            read: false,
        }
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = url.into();
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }
}

// ============================================================================
// Toasts
// ============================================================================

/// Toast severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Success,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => f.pad("info"),
            Self::Warning => f.pad("warning"),
            Self::Success => f.pad("success"),
            Self::Error => f.pad("error"),
        }
    }
}

/// Transient alert held by the toast queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToastNotification {
    /// Locally generated, unique within the process
    pub id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Zero means the toast never expires on its own
    #[serde(rename = "ttl_ms", serialize_with = "serialize_millis")]
    pub ttl: Duration,
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Input accepted by the toast queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToastInput {
    pub title: String,
    pub message: String,
    pub severity: Option<Severity>,
    pub ttl: Option<Duration>,
}

impl ToastInput {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: None,
            ttl: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// `Duration::ZERO` keeps the toast until it is dismissed
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Lifecycle state of the stream connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    Errored,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Observable health of the stream connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    /// Message of the most recent transport error, cleared on open
    pub last_error: Option<String>,
    /// Consecutive failed attempts since the last successful open
    pub retry_count: u32,
}

// ============================================================================
// Identifiers
// ============================================================================

/// Generate a locally unique id: base-36 wall-clock millis + random suffix
///
/// The time prefix keeps ids roughly ordered, the suffix keeps ids minted
/// within the same millisecond apart.
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}{}", to_base36(millis), suffix)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
