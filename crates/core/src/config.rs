// Pipeline configuration
//
// Decision: one serde-friendly struct with builder methods and an env
// loader. Durations are carried as milliseconds on the wire and in env vars.
// Configuration is via TIDINGS_* env vars; unset vars keep the defaults.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::{duration_millis, BackoffPolicy};
use crate::error::{NotifyError, Result};
use crate::model::{DEFAULT_HISTORY_CAPACITY, DEFAULT_TOAST_CAPACITY, DEFAULT_TOAST_TTL};
use crate::poller::PollerConfig;
use crate::stream::StreamConfig;

pub const ENV_SSE_URL: &str = "TIDINGS_SSE_URL";
pub const ENV_API_URL: &str = "TIDINGS_API_URL";
pub const ENV_STREAM_ENABLED: &str = "TIDINGS_STREAM_ENABLED";
pub const ENV_STREAM_CHANNELS: &str = "TIDINGS_STREAM_CHANNELS";
pub const ENV_TOAST_TTL_MS: &str = "TIDINGS_TOAST_TTL_MS";
pub const ENV_BACKOFF_BASE_MS: &str = "TIDINGS_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_CAP_MS: &str = "TIDINGS_BACKOFF_CAP_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "TIDINGS_POLL_INTERVAL_MS";

/// Configuration for a notification center
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Event stream endpoint; empty disables the live stream
    pub sse_url: String,
    /// Base URL of the notification API (durable store)
    pub api_url: String,
    pub stream_enabled: bool,
    /// Named sub-channels delivered besides the default channel
    pub channels: Vec<String>,
    #[serde(rename = "toast_ttl_ms", with = "duration_millis")]
    pub toast_ttl: Duration,
    pub toast_capacity: usize,
    pub history_capacity: usize,
    pub backoff: BackoffPolicy,
    pub poll: PollerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sse_url: String::new(),
            api_url: String::new(),
            stream_enabled: true,
            channels: Vec::new(),
            toast_ttl: DEFAULT_TOAST_TTL,
            toast_capacity: DEFAULT_TOAST_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            backoff: BackoffPolicy::default(),
            poll: PollerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sse_url(mut self, url: impl Into<String>) -> Self {
        self.sse_url = url.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_stream_enabled(mut self, enabled: bool) -> Self {
        self.stream_enabled = enabled;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_toast_ttl(mut self, ttl: Duration) -> Self {
        self.toast_ttl = ttl;
        self
    }

    pub fn with_toast_capacity(mut self, capacity: usize) -> Self {
        self.toast_capacity = capacity;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll = self.poll.with_interval(interval);
        self
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_SSE_URL) {
            config.sse_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = url;
        }
        if let Some(enabled) = lookup(ENV_STREAM_ENABLED) {
            config.stream_enabled = parse_bool(ENV_STREAM_ENABLED, &enabled)?;
        }
        if let Some(channels) = lookup(ENV_STREAM_CHANNELS) {
            config.channels = channels
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = lookup(ENV_TOAST_TTL_MS) {
            config.toast_ttl = Duration::from_millis(parse_number(ENV_TOAST_TTL_MS, &ms)?);
        }
        if let Some(ms) = lookup(ENV_BACKOFF_BASE_MS) {
            config.backoff = config
                .backoff
                .with_base(Duration::from_millis(parse_number(ENV_BACKOFF_BASE_MS, &ms)?));
        }
        if let Some(ms) = lookup(ENV_BACKOFF_CAP_MS) {
            config.backoff = config
                .backoff
                .with_cap(Duration::from_millis(parse_number(ENV_BACKOFF_CAP_MS, &ms)?));
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            config.poll = config
                .poll
                .with_interval(Duration::from_millis(parse_number(ENV_POLL_INTERVAL_MS, &ms)?));
        }

        Ok(config)
    }

    /// Check URLs and capacities
    pub fn validate(&self) -> Result<()> {
        if !self.sse_url.is_empty() {
            validate_url("sse_url", &self.sse_url)?;
        }
        if !self.api_url.is_empty() {
            validate_url("api_url", &self.api_url)?;
        }
        if self.toast_capacity == 0 {
            return Err(NotifyError::config("toast_capacity must be greater than 0"));
        }
        if self.history_capacity == 0 {
            return Err(NotifyError::config("history_capacity must be greater than 0"));
        }
        if self.backoff.base > self.backoff.cap {
            return Err(NotifyError::config(format!(
                "backoff base ({}ms) exceeds cap ({}ms)",
                self.backoff.base.as_millis(),
                self.backoff.cap.as_millis()
            )));
        }
        Ok(())
    }

    /// Stream target for the given authentication state
    pub fn stream_config(&self, authenticated: bool) -> StreamConfig {
        StreamConfig::new(self.sse_url.clone())
            .with_enabled(self.stream_enabled && authenticated)
            .with_channels(self.channels.clone())
    }

    pub fn poller_config(&self) -> PollerConfig {
        self.poll.clone()
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| NotifyError::config(format!("{field} is not a valid URL ({value}): {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(NotifyError::config(format!(
            "{field} must use http or https, got {scheme}"
        ))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(NotifyError::config(format!("{key}: expected a boolean, got {value}"))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| NotifyError::config(format!("{key}: {e} ({value})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.toast_ttl, Duration::from_millis(5000));
        assert_eq!(config.toast_capacity, 10);
        assert_eq!(config.history_capacity, 50);
        assert!(config.stream_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_SSE_URL, "https://example.com/events"),
            (ENV_API_URL, "https://example.com/api"),
            (ENV_STREAM_ENABLED, "false"),
            (ENV_STREAM_CHANNELS, "alerts, builds,"),
            (ENV_TOAST_TTL_MS, "0"),
            (ENV_BACKOFF_BASE_MS, "500"),
            (ENV_BACKOFF_CAP_MS, "8000"),
            (ENV_POLL_INTERVAL_MS, "60000"),
        ]))
        .unwrap();

        assert_eq!(config.sse_url, "https://example.com/events");
        assert!(!config.stream_enabled);
        assert_eq!(config.channels, vec!["alerts", "builds"]);
        assert_eq!(config.toast_ttl, Duration::ZERO);
        assert_eq!(config.backoff.base, Duration::from_millis(500));
        assert_eq!(config.backoff.cap, Duration::from_millis(8000));
        assert_eq!(config.poll.interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_TOAST_TTL_MS, "soon")])).unwrap_err();
        assert!(err.to_string().contains(ENV_TOAST_TTL_MS));

        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_STREAM_ENABLED, "maybe")])).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(PipelineConfig::new().with_sse_url("not a url").validate().is_err());
        assert!(PipelineConfig::new()
            .with_api_url("ftp://example.com")
            .validate()
            .is_err());
        assert!(PipelineConfig::new().with_toast_capacity(0).validate().is_err());
        assert!(PipelineConfig::new()
            .with_backoff(
                BackoffPolicy::default()
                    .with_base(Duration::from_secs(60))
                    .with_cap(Duration::from_secs(1))
            )
            .validate()
            .is_err());
    }

    #[test]
    fn test_stream_config_requires_authentication() {
        let config = PipelineConfig::new()
            .with_sse_url("https://example.com/events")
            .with_channels(vec!["alerts".into()]);

        assert!(config.stream_config(true).is_active());
        assert!(!config.stream_config(false).is_active());
        assert!(!config
            .with_stream_enabled(false)
            .stream_config(true)
            .is_active());
    }

    #[test]
    fn test_serde_partial() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"sse_url": "https://x.test/sse", "toast_ttl_ms": 2500}"#)
                .unwrap();
        assert_eq!(config.toast_ttl, Duration::from_millis(2500));
        assert_eq!(config.history_capacity, 50);
    }
}
