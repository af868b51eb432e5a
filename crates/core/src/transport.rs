// Event transport
//
// The stream connection manager only knows how to open a connection and
// read events off it. EventTransport is that seam; SseTransport is the
// production implementation speaking server-sent events over HTTP.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;

use crate::error::{NotifyError, Result};
use crate::session::SessionProvider;

/// Name of the channel events without an explicit `event:` field arrive on
pub const DEFAULT_CHANNEL: &str = "message";

/// One event read off a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// SSE event name (`message` when the server sends none)
    pub channel: String,
    /// Raw payload text
    pub data: String,
    /// SSE event id, empty when absent
    pub id: String,
}

impl StreamEvent {
    /// Event on the default channel
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            data: data.into(),
            id: String::new(),
        }
    }

    /// Event on a named channel
    pub fn named(channel: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            data: data.into(),
            id: String::new(),
        }
    }
}

/// Events of one open connection; an `Err` item or the end of the stream
/// means the connection dropped
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Trait for opening event stream connections
///
/// Implementations can:
/// - Speak SSE over HTTP (SseTransport)
/// - Replay scripted connections for tests (memory::ScriptedTransport)
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open a connection; returning `Ok` is the transport's open signal
    async fn connect(&self, url: &str) -> Result<EventStream>;
}

/// Server-sent events over reqwest
#[derive(Clone)]
pub struct SseTransport {
    client: Client,
    session: Option<Arc<dyn SessionProvider>>,
}

impl SseTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            session: None,
        }
    }

    /// Attach the signed-in user's bearer token to every connection
    pub fn with_session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn connect(&self, url: &str) -> Result<EventStream> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        if let Some(user) = self.session.as_ref().and_then(|s| s.current_user()) {
            request = request.bearer_auth(user.token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::transport(format!("Failed to connect: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::transport(format!(
                "Event stream rejected ({}): {}",
                status, body
            )));
        }

        let events = response.bytes_stream().eventsource().map(|result| match result {
            Ok(event) => Ok(StreamEvent {
                channel: if event.event.is_empty() {
                    DEFAULT_CHANNEL.to_string()
                } else {
                    event.event
                },
                data: event.data,
                id: event.id,
            }),
            Err(e) => Err(NotifyError::transport(format!("Stream error: {}", e))),
        });

        Ok(Box::pin(events))
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("authenticated", &self.session.is_some())
            .finish()
    }
}
