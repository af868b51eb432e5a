// Notification history cache
//
// Deduplicated, newest-first collection of durable notification records.
// Records arrive from the live stream, the push channel and the background
// poll; `ingest` collapses repeated arrivals of the same id into the first
// one, and `refresh` merges the store's set without dropping live arrivals. Mark-read and clear-all are optimistic: the local change is applied
// and published first, the store confirms afterwards, and a failed
// confirmation is logged without rolling the local change back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{NotificationRecord, DEFAULT_HISTORY_CAPACITY};
use crate::observer::{Observers, Subscription};
use crate::store::NotificationStore;

/// Shared handle to the history cache
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct HistoryCache {
    inner: Arc<Inner>,
}

struct Inner {
    capacity: usize,
    store: Arc<dyn NotificationStore>,
    /// Newest first by arrival
    records: Mutex<Vec<NotificationRecord>>,
    observers: Observers<[NotificationRecord]>,
}

impl HistoryCache {
    /// Cache holding at most 50 records
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self::with_capacity(store, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn NotificationStore>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                store,
                records: Mutex::new(Vec::new()),
                observers: Observers::new(),
            }),
        }
    }

    /// Replace the contents with the store's current record set
    ///
    /// Used for initial population, manual refresh and the background poll.
    pub async fn load(&self) -> Result<()> {
        let fetched = self.inner.store.list().await?;

        let mut seen = HashSet::new();
        let records: Vec<NotificationRecord> = fetched
            .into_iter()
            .filter(|record| seen.insert(record.id.clone()))
            .take(self.inner.capacity)
            .collect();

        info!(count = records.len(), "Notification history loaded");
        self.inner.replace(records);
        Ok(())
    }

    /// Merge the store's current record set into the cache
    ///
    /// Used by the background poll. Cached records the store does not know
    /// (live stream and push arrivals) are kept, unknown ids are added as
    /// new arrivals, and a record read on either side stays read. Returns
    /// the number of records added.
    pub async fn refresh(&self) -> Result<usize> {
        let fetched = self.inner.store.list().await?;

        let mut added = 0;
        self.inner.update(|records| {
            let mut server_read: HashMap<String, bool> = HashMap::new();
            let mut fresh = Vec::new();
            for record in fetched {
                if server_read.contains_key(&record.id) {
                    continue;
                }
                server_read.insert(record.id.clone(), record.read);
                if !records.iter().any(|r| r.id == record.id) {
                    fresh.push(record);
                }
            }

            let mut changed = false;
            for record in records.iter_mut() {
                if !record.read && server_read.get(&record.id).copied().unwrap_or(false) {
                    record.read = true;
                    changed = true;
                }
            }

            added = fresh.len();
            if added > 0 {
                fresh.append(records);
                *records = fresh;
                records.truncate(self.inner.capacity);
                changed = true;
            }
            changed
        });

        debug!(added, "Notification history refreshed");
        Ok(added)
    }

    /// Merge one externally observed record
    ///
    /// A record whose id is already cached is ignored (first write wins and
    /// keeps its position). Returns whether the record was inserted.
    pub fn ingest(&self, record: NotificationRecord) -> bool {
        let id = record.id.clone();
        let inserted = self.inner.update(|records| {
            if records.iter().any(|r| r.id == record.id) {
                return false;
            }
            records.insert(0, record);
            records.truncate(self.inner.capacity);
            true
        });
        if !inserted {
            debug!(notification_id = %id, "Duplicate notification ignored");
        }
        inserted
    }

    /// Mark one record read locally, then confirm with the store
    ///
    /// The local flag stays set even if the store rejects the change.
    pub async fn mark_read(&self, id: &str) {
        let changed = self.inner.update(|records| {
            match records.iter_mut().find(|r| r.id == id && !r.read) {
                Some(record) => {
                    record.read = true;
                    true
                }
                None => false,
            }
        });
        if !changed {
            debug!(notification_id = %id, "Nothing to mark read");
        }

        self.inner.confirm_read(id).await;
    }

    /// Mark every unread record read, then confirm each with the store
    pub async fn mark_all_read(&self) {
        let mut unread = Vec::new();
        self.inner.update(|records| {
            for record in records.iter_mut().filter(|r| !r.read) {
                record.read = true;
                unread.push(record.id.clone());
            }
            !unread.is_empty()
        });

        if unread.is_empty() {
            return;
        }
        debug!(count = unread.len(), "Marking all notifications read");
        join_all(unread.iter().map(|id| self.inner.confirm_read(id))).await;
    }

    /// Empty the cache locally, then ask the store to clear
    pub async fn clear_all(&self) {
        self.inner.replace(Vec::new());

        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear notification history in store; keeping local state");
        }
    }

    /// Current records, newest first
    pub fn records(&self) -> Vec<NotificationRecord> {
        self.inner.records.lock().clone()
    }

    /// Number of unread records
    pub fn unread_count(&self) -> usize {
        self.inner.records.lock().iter().filter(|r| !r.read).count()
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive a snapshot after every mutation
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[NotificationRecord]) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(callback)
    }
}

impl Inner {
    fn replace(&self, records: Vec<NotificationRecord>) {
        self.update(|current| {
            *current = records;
            true
        });
    }

    /// Apply `f`; publish a snapshot if it reports a change
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<NotificationRecord>) -> bool,
    {
        let (version, snapshot) = {
            let mut records = self.records.lock();
            if !f(&mut records) {
                return false;
            }
            (self.observers.next_version(), records.clone())
        };
        self.observers.notify_snapshot(version, &snapshot);
        true
    }

    async fn confirm_read(&self, id: &str) {
        if let Err(e) = self.store.mark_read(id).await {
            warn!(
                notification_id = %id,
                error = %e,
                "Failed to confirm notification read; keeping local state"
            );
        }
    }
}

impl std::fmt::Debug for HistoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCache")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}
