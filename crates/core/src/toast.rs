// Ephemeral notification queue
//
// Bounded, newest-first list of toasts. Each toast with a non-zero TTL gets
// its own expiry task keyed by the toast id, so expiry removes exactly that
// toast no matter how the queue shifted in the meantime.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::model::{
    generate_id, ToastInput, ToastNotification, DEFAULT_TOAST_CAPACITY, DEFAULT_TOAST_TTL,
};
use crate::observer::{Observers, Subscription};

/// Shared handle to the toast queue
///
/// Cloning yields another handle to the same queue. Pending expiry timers
/// are cancelled when the last handle is dropped.
#[derive(Clone)]
pub struct ToastQueue {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    default_ttl: Duration,
    state: Mutex<QueueState>,
    observers: Observers<[ToastNotification]>,
}

#[derive(Default)]
struct QueueState {
    /// Newest first
    toasts: Vec<ToastNotification>,
    timers: HashMap<String, AbortHandle>,
}

impl QueueState {
    fn cancel_timer(&mut self, id: &str) {
        if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

impl ToastQueue {
    /// Queue with the default capacity (10) and TTL (5s)
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_TOAST_CAPACITY, DEFAULT_TOAST_TTL)
    }

    pub fn with_settings(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                default_ttl,
                state: Mutex::new(QueueState::default()),
                observers: Observers::new(),
            }),
        }
    }

    /// Add a toast in front of the queue and return its id
    ///
    /// Evicts the oldest toasts beyond capacity. Schedules expiry unless the
    /// effective TTL is zero. Must be called within a tokio runtime when the
    /// TTL is non-zero.
    pub fn push(&self, input: ToastInput) -> String {
        let toast = ToastNotification {
            id: generate_id(),
            title: input.title,
            message: input.message,
            severity: input.severity.unwrap_or_default(),
            ttl: input.ttl.unwrap_or(self.inner.default_ttl),
        };
        let id = toast.id.clone();
        let ttl = toast.ttl;

        let (version, snapshot) = {
            let mut state = self.inner.state.lock();
            state.toasts.insert(0, toast);

            if state.toasts.len() > self.inner.capacity {
                let evicted: Vec<ToastNotification> =
                    state.toasts.drain(self.inner.capacity..).collect();
                for toast in &evicted {
                    state.cancel_timer(&toast.id);
                }
                trace!(evicted = evicted.len(), "Toast queue over capacity");
            }

            if !ttl.is_zero() && state.toasts.iter().any(|t| t.id == id) {
                let timer = tokio::spawn(expire_after(
                    Arc::downgrade(&self.inner),
                    id.clone(),
                    ttl,
                ));
                state.timers.insert(id.clone(), timer.abort_handle());
            }

            (self.inner.observers.next_version(), state.toasts.clone())
        };

        debug!(toast_id = %id, ttl_ms = ttl.as_millis() as u64, "Toast queued");
        self.inner.observers.notify_snapshot(version, &snapshot);
        id
    }

    /// Remove the toast with `id`; no-op if it is already gone
    pub fn dismiss(&self, id: &str) {
        self.inner.remove(id);
    }

    /// Remove every toast and cancel their timers
    pub fn clear(&self) {
        let (version, snapshot) = {
            let mut state = self.inner.state.lock();
            state.cancel_all();
            if state.toasts.is_empty() {
                return;
            }
            state.toasts.clear();
            (self.inner.observers.next_version(), state.toasts.clone())
        };
        self.inner.observers.notify_snapshot(version, &snapshot);
    }

    /// Cancel every pending timer without touching the contents
    pub fn shutdown(&self) {
        self.inner.state.lock().cancel_all();
    }

    /// Current toasts, newest first
    pub fn snapshot(&self) -> Vec<ToastNotification> {
        self.inner.state.lock().toasts.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of scheduled expiry timers
    pub fn pending_timers(&self) -> usize {
        self.inner.state.lock().timers.len()
    }

    /// Receive a snapshot after every mutation
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[ToastNotification]) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn remove(&self, id: &str) -> bool {
        let (version, snapshot) = {
            let mut state = self.state.lock();
            state.cancel_timer(id);
            let before = state.toasts.len();
            state.toasts.retain(|t| t.id != id);
            if state.toasts.len() == before {
                return false;
            }
            (self.observers.next_version(), state.toasts.clone())
        };
        self.observers.notify_snapshot(version, &snapshot);
        true
    }

    fn expire(&self, id: &str) {
        let (version, snapshot) = {
            let mut state = self.state.lock();
            // Drop our own handle without aborting the running task
            state.timers.remove(id);
            let before = state.toasts.len();
            state.toasts.retain(|t| t.id != id);
            if state.toasts.len() == before {
                return;
            }
            (self.observers.next_version(), state.toasts.clone())
        };
        debug!(toast_id = %id, "Toast expired");
        self.observers.notify_snapshot(version, &snapshot);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().cancel_all();
    }
}

async fn expire_after(queue: Weak<Inner>, id: String, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    if let Some(queue) = queue.upgrade() {
        queue.expire(&id);
    }
}

impl std::fmt::Debug for ToastQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToastQueue")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Let woken timer tasks run after the clock moved
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_newest_first_with_defaults() {
        let queue = ToastQueue::new();
        queue.push(ToastInput::new("1", "first"));
        queue.push(ToastInput::new("2", "second").with_severity(Severity::Error));

        let toasts = queue.snapshot();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].title, "2");
        assert_eq!(toasts[0].severity, Severity::Error);
        assert_eq!(toasts[1].title, "1");
        assert_eq!(toasts[1].severity, Severity::Info);
        assert_eq!(toasts[1].ttl, Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let queue = ToastQueue::new();
        for i in 1..=11 {
            queue.push(ToastInput::new(format!("{i}"), "m"));
        }

        let titles: Vec<String> = queue.snapshot().into_iter().map(|t| t.title).collect();
        assert_eq!(titles.len(), 10);
        assert_eq!(titles[0], "11");
        assert_eq!(titles[9], "2");
        assert!(!titles.contains(&"1".to_string()));
        // The evicted toast's timer went with it
        assert_eq!(queue.pending_timers(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_exactly() {
        let queue = ToastQueue::new();
        queue.push(ToastInput::new("short", "m").with_ttl(Duration::from_millis(1000)));

        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(queue.len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(queue.is_empty());
        assert_eq!(queue.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_ttls_interleave() {
        let queue = ToastQueue::new();
        let slow = queue.push(ToastInput::new("slow", "m").with_ttl(Duration::from_millis(3000)));
        queue.push(ToastInput::new("fast", "m").with_ttl(Duration::from_millis(1000)));
        let sticky = queue.push(ToastInput::new("sticky", "m").with_ttl(Duration::ZERO));

        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        let ids: Vec<String> = queue.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![sticky.clone(), slow]);

        tokio::time::advance(Duration::from_millis(60_000)).await;
        settle().await;
        let ids: Vec<String> = queue.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![sticky]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_targets_id_not_position() {
        let queue = ToastQueue::new();
        let target = queue.push(ToastInput::new("target", "m").with_ttl(Duration::from_millis(500)));
        for i in 0..5 {
            queue.push(ToastInput::new(format!("later {i}"), "m").with_ttl(Duration::ZERO));
        }
        queue.dismiss(&queue.snapshot()[2].id.clone());

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        let toasts = queue.snapshot();
        assert_eq!(toasts.len(), 4);
        assert!(toasts.iter().all(|t| t.id != target));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_is_idempotent() {
        let queue = ToastQueue::new();
        let id = queue.push(ToastInput::new("a", "m"));

        queue.dismiss(&id);
        queue.dismiss(&id);
        queue.dismiss("missing");

        assert!(queue.is_empty());
        assert_eq!(queue.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_timers() {
        let queue = ToastQueue::new();
        queue.push(ToastInput::new("a", "m"));
        queue.push(ToastInput::new("b", "m"));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pending_timers(), 0);

        // A later toast is unaffected by the cleared ones' deadlines
        let keep = queue.push(ToastInput::new("c", "m").with_ttl(Duration::from_millis(8000)));
        tokio::time::advance(Duration::from_millis(6000)).await;
        settle().await;
        assert_eq!(queue.snapshot()[0].id, keep);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_every_mutation() {
        let queue = ToastQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let last_len = Arc::new(AtomicUsize::new(usize::MAX));

        let (c, l) = (Arc::clone(&calls), Arc::clone(&last_len));
        let _sub = queue.subscribe(move |toasts| {
            c.fetch_add(1, Ordering::SeqCst);
            l.store(toasts.len(), Ordering::SeqCst);
        });

        let id = queue.push(ToastInput::new("a", "m").with_ttl(Duration::from_millis(100)));
        queue.push(ToastInput::new("b", "m"));
        queue.dismiss(&id);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(last_len.load(Ordering::SeqCst), 1);

        // Expiry of an already dismissed toast is silent
        tokio::time::advance(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timers() {
        let queue = ToastQueue::new();
        queue.push(ToastInput::new("a", "m"));
        let weak = Arc::downgrade(&queue.inner);
        drop(queue);

        assert!(weak.upgrade().is_none());
        tokio::time::advance(Duration::from_millis(5000)).await;
        settle().await;
    }

    #[test]
    fn test_zero_ttl_needs_no_runtime() {
        let queue = ToastQueue::new();
        queue.push(ToastInput::new("sticky", "m").with_ttl(Duration::ZERO));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_timers(), 0);
    }
}
