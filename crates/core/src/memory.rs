// In-memory implementations for demos and testing
//
// These implementations keep all data in memory, making them useful for:
// - Unit and integration tests (scripted connections, injected failures)
// - Running the CLI without a notification API

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{NotifyError, Result};
use crate::model::NotificationRecord;
use crate::store::NotificationStore;
use crate::transport::{EventStream, EventTransport, StreamEvent};

// ============================================================================
// InMemoryNotificationStore - Stores records in memory
// ============================================================================

/// In-memory notification store
///
/// Records are kept newest-first. Failures can be switched on to exercise
/// the cache's no-rollback behavior.
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    records: Mutex<Vec<NotificationRecord>>,
    failing: AtomicBool,
    mark_read_calls: Mutex<Vec<String>>,
    clear_calls: AtomicUsize,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with records (useful for testing)
    pub fn seed(&self, records: Vec<NotificationRecord>) {
        *self.records.lock() = records;
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of stored records
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.records.lock().clone()
    }

    /// Ids passed to `mark_read`, in call order
    pub fn mark_read_calls(&self) -> Vec<String> {
        self.mark_read_calls.lock().clone()
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::store("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn list(&self) -> Result<Vec<NotificationRecord>> {
        self.check()?;
        Ok(self.records())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        self.mark_read_calls.lock().push(id.to_string());
        self.check()?;
        if let Some(record) = self.records.lock().iter_mut().find(|r| r.id == id) {
            record.read = true;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.records.lock().clear();
        Ok(())
    }
}

// ============================================================================
// ScriptedTransport - Replays scripted connection outcomes
// ============================================================================

enum ScriptedConnection {
    Fail(String),
    Open(mpsc::UnboundedReceiver<Result<StreamEvent>>),
}

/// Event transport driven by a script of connection outcomes
///
/// Each `connect` consumes the next scripted outcome. When the script is
/// exhausted the connection attempt never completes, which parks the
/// manager in `Connecting`.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedConnection>>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a failed connection attempt
    pub fn fail(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(ScriptedConnection::Fail(message.into()));
    }

    /// Script a successful connection; events (or an error) are fed
    /// through the returned sender, dropping it ends the stream
    pub fn open(&self) -> mpsc::UnboundedSender<Result<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().push_back(ScriptedConnection::Open(rx));
        tx
    }

    /// Number of connection attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// URLs of every connection attempt, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<EventStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());

        let next = self.script.lock().pop_front();
        match next {
            Some(ScriptedConnection::Fail(message)) => Err(NotifyError::transport(message)),
            Some(ScriptedConnection::Open(rx)) => {
                let events = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(Box::pin(events))
            }
            None => std::future::pending().await,
        }
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("attempts", &self.attempts())
            .field("remaining", &self.script.lock().len())
            .finish()
    }
}
