// Background history refresh
//
// Periodically merges the durable store's records into the history cache so
// that records missed by the live stream (dropped connection, another
// device) still show up, without dropping what the stream already delivered.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backoff::duration_millis;
use crate::history::HistoryCache;

/// Default refresh interval; matches how long fetched history is considered fresh
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between two refreshes
    #[serde(rename = "interval_ms", with = "duration_millis")]
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refresh interval (at least 1ms)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }
}

/// Periodic history refresher
pub struct HistoryPoller {
    cache: HistoryCache,
    config: PollerConfig,
    shutdown: CancellationToken,
}

impl HistoryPoller {
    pub fn new(cache: HistoryCache, config: PollerConfig, shutdown: CancellationToken) -> Self {
        Self {
            cache,
            config,
            shutdown,
        }
    }

    /// Run the refresh loop on a new task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Refresh every interval until shutdown; the first refresh happens
    /// one interval from now
    #[instrument(skip(self), fields(interval_ms = self.config.interval.as_millis() as u64))]
    pub async fn run(self) {
        loop {
            if self.wait().await {
                debug!("History poller stopped");
                return;
            }
            self.poll_once().await;
        }
    }

    /// Merge the store's records into the cache once; failures are logged
    /// and swallowed
    pub async fn poll_once(&self) {
        match self.cache.refresh().await {
            Ok(added) if added > 0 => debug!(added, "Background refresh found new notifications"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Background history refresh failed"),
        }
    }

    /// Wait for the interval; returns true if shutdown was signaled
    async fn wait(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.interval) => false,
        }
    }
}
