// Error types for the notification pipeline
//
// Most failures in the pipeline are non-fatal: transport errors feed the
// reconnect loop, parse errors degrade to raw payloads, and store
// confirmation failures are logged. NotifyError is what those paths carry
// around internally and what the few fallible public calls return.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur in the notification pipeline
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connection-level failure (drop, refused, bad status, stream ended)
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Durable store answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Payload was not well-formed JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Durable store error that is not an HTTP status
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NotifyError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        NotifyError::Transport(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        NotifyError::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        NotifyError::Configuration(msg.into())
    }

    /// Whether the reconnect loop should treat this as a transport failure
    pub fn is_transport(&self) -> bool {
        matches!(self, NotifyError::Transport(_) | NotifyError::Http(_))
    }
}
