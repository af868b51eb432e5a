// Notification center
//
// Decision: the pipeline has no process-wide singletons. A center is built
// explicitly from its collaborators (transport, store, session) and owns the
// stream connection, toast queue, history cache, delivery bridge and the
// background poll. The UI layer talks to the pipeline only through it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::{BridgeHandle, DeliveryBridge, PushPayload};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::history::HistoryCache;
use crate::model::ConnectionHealth;
use crate::poller::HistoryPoller;
use crate::session::SessionProvider;
use crate::store::{HttpNotificationStore, NotificationStore};
use crate::stream::StreamConnection;
use crate::toast::ToastQueue;
use crate::transport::{EventTransport, SseTransport};

/// Composition root of the notification pipeline
pub struct NotificationCenter {
    config: PipelineConfig,
    session: Arc<dyn SessionProvider>,
    stream: StreamConnection,
    toasts: ToastQueue,
    history: HistoryCache,
    bridge: DeliveryBridge,
    running: Mutex<Option<Running>>,
}

/// Resources that only exist between `start` and `shutdown`
struct Running {
    bridge: BridgeHandle,
    poll_shutdown: CancellationToken,
    poller: JoinHandle<()>,
}

impl NotificationCenter {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn EventTransport>,
        store: Arc<dyn NotificationStore>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let toasts = ToastQueue::with_settings(config.toast_capacity, config.toast_ttl);
        let history = HistoryCache::with_capacity(store, config.history_capacity);
        let stream = StreamConnection::new(transport, config.backoff);
        let bridge = DeliveryBridge::new(toasts.clone(), history.clone());

        Self {
            config,
            session,
            stream,
            toasts,
            history,
            bridge,
            running: Mutex::new(None),
        }
    }

    /// Center talking to a notification server over HTTP
    ///
    /// Validates the configuration, then wires an SSE transport and an HTTP
    /// store that both authenticate with the session's token.
    pub fn with_http(config: PipelineConfig, session: Arc<dyn SessionProvider>) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::new();
        let transport =
            SseTransport::with_client(client.clone()).with_session(Arc::clone(&session));
        let store = HttpNotificationStore::new(&config.api_url)
            .with_client(client)
            .with_session(Arc::clone(&session));

        Ok(Self::new(config, Arc::new(transport), Arc::new(store), session))
    }

    /// Start the pipeline
    ///
    /// Loads the initial history (a failure is logged, the poll retries
    /// later), attaches the bridge to the stream and the optional push
    /// channel, opens the stream for a signed-in user and starts the
    /// background poll. Calling `start` twice is a no-op.
    pub async fn start(&self, push: Option<mpsc::Receiver<PushPayload>>) {
        if self.is_running() {
            warn!("Notification center already started");
            return;
        }

        if let Err(e) = self.history.load().await {
            warn!(error = %e, "Initial history load failed");
        }

        let poll_shutdown = CancellationToken::new();
        let running = Running {
            bridge: self.bridge.attach(&self.stream, push),
            poll_shutdown: poll_shutdown.clone(),
            poller: HistoryPoller::new(
                self.history.clone(),
                self.config.poller_config(),
                poll_shutdown,
            )
            .spawn(),
        };

        let raced = self.running.lock().replace(running);
        if let Some(other) = raced {
            other.stop_now();
        }

        self.refresh_session();
        info!(
            history = self.history.len(),
            authenticated = self.session.is_authenticated(),
            "Notification center started"
        );
    }

    /// Re-evaluate the stream target after a login or logout
    pub fn refresh_session(&self) {
        let authenticated = self.session.is_authenticated();
        let config = self.config.stream_config(authenticated && self.is_running());
        if config != self.stream.config() {
            self.stream.configure(config);
        }
    }

    /// Stop everything started by `start` and cancel pending toast timers
    pub async fn shutdown(&self) {
        self.stream.close();
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.poll_shutdown.cancel();
            running.bridge.shutdown().await;
            let _ = running.poller.await;
        }
        self.toasts.shutdown();
        info!("Notification center stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn dismiss_toast(&self, id: &str) {
        self.toasts.dismiss(id);
    }

    pub async fn mark_notification_read(&self, id: &str) {
        self.history.mark_read(id).await;
    }

    pub async fn mark_all_read(&self) {
        self.history.mark_all_read().await;
    }

    pub async fn clear_history(&self) {
        self.history.clear_all().await;
    }

    /// Reload history from the store
    pub async fn refresh_history(&self) -> Result<()> {
        self.history.load().await
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionHealth> {
        self.stream.watch_health()
    }

    pub fn stream(&self) -> &StreamConnection {
        &self.stream
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Running {
    fn stop_now(self) {
        self.poll_shutdown.cancel();
        self.poller.abort();
        drop(self.bridge);
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.stop_now();
        }
    }
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("running", &self.is_running())
            .field("toasts", &self.toasts.len())
            .field("history", &self.history.len())
            .finish()
    }
}
