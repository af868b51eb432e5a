// Observer registry
//
// Components that own mutable state (toast queue, history cache, stream
// manager) expose it through callbacks: register a callback, receive a
// snapshot on every mutation, unregister by dropping the Subscription.
// Callbacks run after the owner has released its lock, so a callback may
// call back into the component that notified it.
//
// Snapshots carry a version taken under the owner's lock. Deliveries are
// serialized and a snapshot older than the last delivered one is dropped,
// so concurrent writers can never leave a subscriber on a stale state.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// List of registered callbacks for values of type `T`
pub struct Observers<T: ?Sized> {
    inner: Arc<ObserverList<T>>,
}

struct ObserverList<T: ?Sized> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
    /// Last snapshot version handed out by `next_version`
    issued: AtomicU64,
    /// Last snapshot version delivered; re-entrant so a callback may mutate
    /// the owner and trigger a nested delivery
    delivered: ReentrantMutex<Cell<u64>>,
}

impl<T: ?Sized + 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObserverList {
                next_id: AtomicU64::new(1),
                callbacks: Mutex::new(Vec::new()),
                issued: AtomicU64::new(0),
                delivered: ReentrantMutex::new(Cell::new(0)),
            }),
        }
    }

    /// Register a callback; it stays registered until the returned
    /// Subscription is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks.lock().push((id, Arc::new(callback)));

        let list: Weak<ObserverList<T>> = Arc::downgrade(&self.inner);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(list) = list.upgrade() {
                    list.callbacks.lock().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`
    ///
    /// For events: every value is delivered. State owners publish through
    /// `notify_snapshot` instead.
    pub fn notify(&self, value: &T) {
        for callback in self.callbacks() {
            callback(value);
        }
    }

    /// Version for the next snapshot; call it while holding the lock that
    /// guards the state being snapshotted
    pub fn next_version(&self) -> u64 {
        self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Deliver a versioned snapshot
    ///
    /// Deliveries run one at a time. A snapshot whose version is not newer
    /// than the last delivered one is dropped, and a delivery stops early
    /// once a callback has re-entrantly published a newer snapshot.
    pub fn notify_snapshot(&self, version: u64, snapshot: &T) {
        let delivered = self.inner.delivered.lock();
        if version <= delivered.get() {
            return;
        }
        delivered.set(version);

        for callback in self.callbacks() {
            if delivered.get() != version {
                return;
            }
            callback(snapshot);
        }
    }

    fn callbacks(&self) -> Vec<Callback<T>> {
        self.inner
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.inner.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle; dropping it unregisters the callback
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregister the callback now
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_reaches_all_subscribers() {
        let observers: Observers<[u32]> = Observers::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = Arc::clone(&total);
        let _a = observers.subscribe(move |values: &[u32]| {
            t1.fetch_add(values.len(), Ordering::SeqCst);
        });
        let t2 = Arc::clone(&total);
        let _b = observers.subscribe(move |values: &[u32]| {
            t2.fetch_add(values.len(), Ordering::SeqCst);
        });

        observers.notify(&[1, 2, 3]);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let observers: Observers<u32> = Observers::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let subscription = observers.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(observers.len(), 1);

        observers.notify(&1);
        drop(subscription);
        observers.notify(&2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_explicit_unsubscribe_leaves_others() {
        let observers: Observers<u32> = Observers::new();
        let first = observers.subscribe(|_| {});
        let _second = observers.subscribe(|_| {});

        first.unsubscribe();
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_subscription_outlives_observers() {
        let observers: Observers<u32> = Observers::new();
        let subscription = observers.subscribe(|_| {});
        drop(observers);
        drop(subscription);
    }

    #[test]
    fn test_stale_snapshot_is_dropped() {
        let observers: Observers<u32> = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = observers.subscribe(move |v| s.lock().push(*v));

        let older = observers.next_version();
        let newer = observers.next_version();
        observers.notify_snapshot(newer, &2);
        observers.notify_snapshot(older, &1);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_snapshot_deliveries_are_serialized() {
        let observers: Arc<Observers<u32>> = Arc::new(Observers::new());
        let last = Arc::new(Mutex::new(0));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let l = Arc::clone(&last);
        let _sub = observers.subscribe(move |v: &u32| {
            if *v == 1 {
                let _ = entered_tx.send(());
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            *l.lock() = *v;
        });

        let first = observers.next_version();
        let second = observers.next_version();
        let writer = {
            let observers = Arc::clone(&observers);
            std::thread::spawn(move || observers.notify_snapshot(first, &1))
        };
        entered_rx.recv().unwrap();
        observers.notify_snapshot(second, &2);
        writer.join().unwrap();

        assert_eq!(*last.lock(), 2);
    }

    #[test]
    fn test_reentrant_snapshot_supersedes_outer_delivery() {
        let observers: Arc<Observers<u32>> = Arc::new(Observers::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::clone(&observers);
        let _republisher = observers.subscribe(move |v: &u32| {
            if *v == 1 {
                let version = inner.next_version();
                inner.notify_snapshot(version, &2);
            }
        });
        let s = Arc::clone(&seen);
        let _recorder = observers.subscribe(move |v: &u32| s.lock().push(*v));

        let version = observers.next_version();
        observers.notify_snapshot(version, &1);

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_callback_may_reenter() {
        let observers: Arc<Observers<u32>> = Arc::new(Observers::new());
        let inner = Arc::clone(&observers);
        let _s = observers.subscribe(move |_| {
            // Re-entrant read must not deadlock
            assert_eq!(inner.len(), 1);
        });
        observers.notify(&7);
    }
}
