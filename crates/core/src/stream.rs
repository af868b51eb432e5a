// Stream connection manager
//
// Owns one long-lived event stream subscription and keeps it alive across
// network flaps.
//
// State machine:
//
//            connect()            open signal
// ┌────────┐ ─────────► ┌────────────┐ ──────────► ┌──────┐
// │ Closed │            │ Connecting │             │ Open │
// └────────┘ ◄───┐      └────────────┘ ◄──┐        └──────┘
//      ▲         │             │           │            │
//      │ close() │       error │     timer │      error │
//      │ / reconfigure         ▼           │            ▼
//      └──────────────── ┌─────────┐ ──────┘ ◄──────────┘
//                        │ Errored │
//                        └─────────┘
//
// Every configuration gets its own generation. The connection task of a
// generation checks it under the state lock before each transition, so a
// torn-down connection can never write state or dispatch messages after a
// reconfiguration.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::NotifyError;
use crate::model::{ConnectionHealth, ConnectionState};
use crate::observer::{Observers, Subscription};
use crate::transport::{EventTransport, StreamEvent, DEFAULT_CHANNEL};

/// Target of the stream connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// Event stream endpoint; empty means "nothing to connect to"
    pub url: String,
    pub enabled: bool,
    /// Named sub-channels delivered in addition to the default channel
    pub channels: Vec<String>,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            enabled: true,
            channels: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    /// Whether this configuration asks for a live connection
    pub fn is_active(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }

    fn accepts(&self, channel: &str) -> bool {
        channel == DEFAULT_CHANNEL || self.channels.iter().any(|c| c == channel)
    }
}

/// Payload handed to consumers
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Payload parsed as JSON
    Json(Value),
    /// Payload that failed to parse, passed through untouched
    Raw(String),
}

impl Payload {
    fn parse(data: &str) -> (Self, Option<serde_json::Error>) {
        match serde_json::from_str(data) {
            Ok(value) => (Payload::Json(value), None),
            Err(e) => (Payload::Raw(data.to_string()), Some(e)),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}

/// Message dispatched to stream consumers
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub channel: String,
    pub payload: Payload,
}

/// Manager for a single logical event stream subscription
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

/// Tears the connection down once the last handle is dropped; the
/// connection task itself keeps `Inner` alive.
struct Owner {
    inner: Arc<Inner>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        let mut run = self.inner.run.lock();
        run.teardown();
        run.generation += 1;
    }
}

struct Inner {
    transport: Arc<dyn EventTransport>,
    backoff: BackoffPolicy,
    health: watch::Sender<ConnectionHealth>,
    consumers: Observers<StreamMessage>,
    run: Mutex<RunState>,
}

#[derive(Default)]
struct RunState {
    config: StreamConfig,
    generation: u64,
    retry_count: u32,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl RunState {
    /// Stop the current connection task, if any
    fn teardown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl StreamConnection {
    /// Create a closed connection manager
    pub fn new(transport: Arc<dyn EventTransport>, backoff: BackoffPolicy) -> Self {
        let (health, _) = watch::channel(ConnectionHealth::default());
        let inner = Arc::new(Inner {
            transport,
            backoff,
            health,
            consumers: Observers::new(),
            run: Mutex::new(RunState::default()),
        });
        Self {
            _owner: Arc::new(Owner {
                inner: Arc::clone(&inner),
            }),
            inner,
        }
    }

    /// Register a consumer for parsed (or raw) messages
    pub fn subscribe<F>(&self, consumer: F) -> Subscription
    where
        F: Fn(&StreamMessage) + Send + Sync + 'static,
    {
        self.inner.consumers.subscribe(consumer)
    }

    /// Current health snapshot
    pub fn health(&self) -> ConnectionHealth {
        self.inner.health.borrow().clone()
    }

    /// Observe health changes
    pub fn watch_health(&self) -> watch::Receiver<ConnectionHealth> {
        self.inner.health.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> StreamConfig {
        self.inner.run.lock().config.clone()
    }

    /// Replace the configuration
    ///
    /// Tears down the current connection (pending reconnect included),
    /// resets the retry counter and, if the new configuration is active,
    /// starts a fresh connection. Must be called within a tokio runtime.
    pub fn configure(&self, config: StreamConfig) {
        {
            let mut run = self.inner.run.lock();
            run.teardown();
            run.generation += 1;
            run.retry_count = 0;
            run.config = config;
            self.inner.publish_closed(&run);
        }
        self.connect();
    }

    /// Start connecting if the configuration is active and nothing is running
    pub fn connect(&self) {
        let mut run = self.inner.run.lock();
        if !run.config.is_active() {
            return;
        }
        match &run.task {
            Some(task) if !task.is_finished() => return,
            Some(_) => {
                // A consumer panic takes the connection task down with it
                warn!(url = %run.config.url, "Connection task ended unexpectedly, restarting");
                run.teardown();
            }
            None => {}
        }

        let cancel = CancellationToken::new();
        let generation = run.generation;
        let config = run.config.clone();

        info!(url = %config.url, generation, "Opening event stream");
        run.cancel = Some(cancel.clone());
        run.task = Some(tokio::spawn(run_connection(
            Arc::clone(&self.inner),
            generation,
            config,
            cancel,
        )));
    }

    /// Close the connection for the current configuration
    ///
    /// Cancels a pending reconnect and releases the transport. Not an error;
    /// `connect()` or `configure()` start again.
    pub fn close(&self) {
        let mut run = self.inner.run.lock();
        run.teardown();
        run.generation += 1;
        run.retry_count = 0;
        self.inner.publish_closed(&run);
        debug!(url = %run.config.url, "Event stream closed");
    }
}

impl Inner {
    fn publish_closed(&self, run: &RunState) {
        self.health.send_replace(ConnectionHealth {
            state: ConnectionState::Closed,
            last_error: None,
            retry_count: run.retry_count,
        });
    }

    /// Apply `f` if `generation` is still current; false means "stop"
    fn transition<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&mut RunState, &mut ConnectionHealth),
    {
        let mut run = self.run.lock();
        if run.generation != generation {
            return false;
        }
        self.health.send_modify(|health| f(&mut *run, health));
        true
    }

    fn enter_connecting(&self, generation: u64) -> bool {
        self.transition(generation, |run, health| {
            health.state = ConnectionState::Connecting;
            health.retry_count = run.retry_count;
        })
    }

    fn enter_open(&self, generation: u64) -> bool {
        self.transition(generation, |run, health| {
            run.retry_count = 0;
            health.state = ConnectionState::Open;
            health.last_error = None;
            health.retry_count = 0;
        })
    }

    /// Record a failure; returns the reconnect delay if still current
    fn enter_errored(&self, generation: u64, failure: &NotifyError) -> Option<std::time::Duration> {
        let mut delay = None;
        let current = self.transition(generation, |run, health| {
            delay = Some(self.backoff.delay_for_attempt(run.retry_count));
            run.retry_count = run.retry_count.saturating_add(1);
            health.state = ConnectionState::Errored;
            health.last_error = Some(failure.to_string());
            health.retry_count = run.retry_count;
        });
        if current {
            delay
        } else {
            None
        }
    }

    fn dispatch(&self, generation: u64, config: &StreamConfig, event: StreamEvent) {
        if !config.accepts(&event.channel) {
            debug!(channel = %event.channel, "Ignoring event on unsubscribed channel");
            return;
        }
        if self.run.lock().generation != generation {
            return;
        }

        let (payload, parse_error) = Payload::parse(&event.data);
        if let Some(e) = parse_error {
            error!(channel = %event.channel, error = %e, "Failed to parse stream message");
        }

        self.consumers.notify(&StreamMessage {
            channel: event.channel,
            payload,
        });
    }
}

/// Connection loop for one generation
///
/// Connecting → Open → (error) → Errored → (delay) → Connecting → ...
/// until the generation is cancelled.
async fn run_connection(
    inner: Arc<Inner>,
    generation: u64,
    config: StreamConfig,
    cancel: CancellationToken,
) {
    loop {
        if !inner.enter_connecting(generation) {
            return;
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = inner.transport.connect(&config.url) => result,
        };

        let failure = match connected {
            Ok(mut events) => {
                if !inner.enter_open(generation) {
                    return;
                }
                info!(url = %config.url, "Event stream open");

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = events.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => inner.dispatch(generation, &config, event),
                        Some(Err(e)) => break e,
                        None => break NotifyError::transport("Event stream ended"),
                    }
                }
            }
            Err(e) => e,
        };

        let Some(delay) = inner.enter_errored(generation, &failure) else {
            return;
        };
        let delay_ms = delay.as_millis() as u64;
        if failure.is_transport() {
            warn!(
                url = %config.url,
                error = %failure,
                delay_ms,
                "Event stream connection failed, retrying"
            );
        } else {
            // Not a connection problem; likely a transport implementation bug
            error!(
                url = %config.url,
                error = %failure,
                delay_ms,
                "Event stream failed unexpectedly, retrying"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("config", &self.config())
            .field("health", &self.health())
            .finish()
    }
}
