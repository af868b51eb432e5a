// Delivery bridge
//
// Fans in events from the stream connection and the push side channel,
// normalizes both payload shapes into a NotificationRecord, and hands each
// record to the toast queue (always) and the history cache (deduplicated by
// id). The only transformations are shape normalization and id synthesis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::history::HistoryCache;
use crate::model::{generate_id, NotificationRecord, Severity, ToastInput, DEFAULT_TARGET_URL};
use crate::observer::Subscription;
use crate::stream::{Payload, StreamConnection, StreamMessage};
use crate::toast::ToastQueue;

/// Notification payload as sent over the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Unrecognized values fall back to the default severity
    #[serde(default, alias = "type", deserialize_with = "lenient_severity")]
    pub severity: Option<Severity>,
}

fn lenient_severity<'de, D>(deserializer: D) -> Result<Option<Severity>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Notification payload delivered by the push side channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PushPayload {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            message: message.into(),
            url: None,
            timestamp: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Event entering the bridge, tagged by source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Stream(StreamPayload),
    Push(PushPayload),
}

impl InboundEvent {
    fn source(&self) -> &'static str {
        match self {
            InboundEvent::Stream(_) => "stream",
            InboundEvent::Push(_) => "push",
        }
    }

    /// Normalize into the durable record shape plus the toast severity
    pub fn normalize(self) -> (NotificationRecord, Severity) {
        let (id, title, message, url, timestamp, severity) = match self {
            InboundEvent::Stream(p) => (
                p.id,
                p.title,
                p.message,
                p.url,
                p.timestamp,
                p.severity.unwrap_or_default(),
            ),
            InboundEvent::Push(p) => (p.id, p.title, p.message, p.url, p.timestamp, Severity::Info),
        };

        let record = NotificationRecord {
            id: id.filter(|id| !id.is_empty()).unwrap_or_else(generate_id),
            title,
            message,
            target_url: url.unwrap_or_else(|| DEFAULT_TARGET_URL.to_string()),
            occurred_at: timestamp.unwrap_or_else(Utc::now),
            read: false,
        };
        (record, severity)
    }
}

/// Fan-in point between the event sources and the queue/cache
#[derive(Clone, Debug)]
pub struct DeliveryBridge {
    toasts: ToastQueue,
    history: HistoryCache,
}

impl DeliveryBridge {
    pub fn new(toasts: ToastQueue, history: HistoryCache) -> Self {
        Self { toasts, history }
    }

    /// Deliver one event to both the toast queue and the history cache
    ///
    /// Returns the normalized record. Toasts are never deduplicated; the
    /// history cache keeps the first arrival of an id.
    pub fn deliver(&self, event: InboundEvent) -> NotificationRecord {
        let source = event.source();
        let (record, severity) = event.normalize();

        self.toasts.push(
            ToastInput::new(record.title.clone(), record.message.clone()).with_severity(severity),
        );
        let inserted = self.history.ingest(record.clone());

        debug!(
            notification_id = %record.id,
            source,
            inserted,
            "Notification delivered"
        );
        record
    }

    /// Deliver a stream message; raw or malformed payloads are skipped
    pub fn deliver_stream_message(&self, message: &StreamMessage) -> Option<NotificationRecord> {
        let value = match &message.payload {
            Payload::Json(value) => value.clone(),
            Payload::Raw(raw) => {
                warn!(channel = %message.channel, len = raw.len(), "Skipping unparsed stream payload");
                return None;
            }
        };

        match serde_json::from_value::<StreamPayload>(value) {
            Ok(payload) => Some(self.deliver(InboundEvent::Stream(payload))),
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "Skipping malformed notification payload");
                None
            }
        }
    }

    /// Start consuming the stream connection and the push channel
    ///
    /// The returned handle detaches both sources when shut down or dropped.
    pub fn attach(
        &self,
        stream: &StreamConnection,
        push: Option<mpsc::Receiver<PushPayload>>,
    ) -> BridgeHandle {
        let bridge = self.clone();
        let subscription = stream.subscribe(move |message| {
            bridge.deliver_stream_message(message);
        });

        let cancel = CancellationToken::new();
        let push_task = push.map(|rx| tokio::spawn(run_push_channel(self.clone(), rx, cancel.clone())));

        info!(push = push_task.is_some(), "Delivery bridge attached");
        BridgeHandle {
            subscription: Some(subscription),
            cancel,
            push_task,
        }
    }
}

async fn run_push_channel(
    bridge: DeliveryBridge,
    mut rx: mpsc::Receiver<PushPayload>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => return,
            payload = rx.recv() => payload,
        };
        match payload {
            Some(payload) => {
                bridge.deliver(InboundEvent::Push(payload));
            }
            None => {
                debug!("Push channel closed");
                return;
            }
        }
    }
}

/// Attached bridge; dropping it detaches from both sources
#[derive(Debug)]
pub struct BridgeHandle {
    subscription: Option<Subscription>,
    cancel: CancellationToken,
    push_task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Detach and wait for the push reader to finish
    pub async fn shutdown(mut self) {
        self.detach();
        if let Some(task) = self.push_task.take() {
            let _ = task.await;
        }
    }

    fn detach(&mut self) {
        self.subscription.take();
        self.cancel.cancel();
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.detach();
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNotificationStore;
    use serde_json::json;
    use std::sync::Arc;

    fn bridge() -> (DeliveryBridge, ToastQueue, HistoryCache) {
        let toasts = ToastQueue::new();
        let history = HistoryCache::new(Arc::new(InMemoryNotificationStore::new()));
        (
            DeliveryBridge::new(toasts.clone(), history.clone()),
            toasts,
            history,
        )
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let (record, severity) = InboundEvent::Push(PushPayload::new("t", "m")).normalize();
        assert!(!record.id.is_empty());
        assert_eq!(record.target_url, "/");
        assert!(!record.read);
        assert_eq!(severity, Severity::Info);
    }

    #[test]
    fn test_normalize_keeps_source_fields() {
        let payload: StreamPayload = serde_json::from_value(json!({
            "id": "evt-1",
            "title": "Build failed",
            "message": "main is red",
            "url": "/builds/9",
            "timestamp": "2024-03-01T12:00:00Z",
            "type": "error"
        }))
        .unwrap();

        let (record, severity) = InboundEvent::Stream(payload).normalize();
        assert_eq!(record.id, "evt-1");
        assert_eq!(record.target_url, "/builds/9");
        assert_eq!(record.occurred_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert_eq!(severity, Severity::Error);
    }

    #[test]
    fn test_empty_id_is_synthesized() {
        let (record, _) = InboundEvent::Push(PushPayload::new("t", "m").with_id("")).normalize();
        assert!(!record.id.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_feeds_queue_and_cache() {
        let (bridge, toasts, history) = bridge();
        let record = bridge.deliver(InboundEvent::Push(PushPayload::new("Hello", "World")));

        assert_eq!(toasts.snapshot()[0].title, "Hello");
        assert_eq!(history.records()[0].id, record.id);
    }

    #[tokio::test]
    async fn test_same_id_from_two_sources() {
        let (bridge, toasts, history) = bridge();
        bridge.deliver_stream_message(&StreamMessage {
            channel: "message".into(),
            payload: Payload::Json(json!({"id": "shared", "title": "from stream", "message": "m"})),
        });
        bridge.deliver(InboundEvent::Push(
            PushPayload::new("from push", "m").with_id("shared"),
        ));

        assert_eq!(toasts.len(), 2);
        let records = history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "from stream");
    }

    #[tokio::test]
    async fn test_raw_and_malformed_payloads_skipped() {
        let (bridge, toasts, history) = bridge();
        assert!(bridge
            .deliver_stream_message(&StreamMessage {
                channel: "message".into(),
                payload: Payload::Raw("hello".into()),
            })
            .is_none());
        assert!(bridge
            .deliver_stream_message(&StreamMessage {
                channel: "message".into(),
                payload: Payload::Json(json!({"title": 5})),
            })
            .is_none());
        assert!(bridge
            .deliver_stream_message(&StreamMessage {
                channel: "message".into(),
                payload: Payload::Json(json!(["not", "an", "object"])),
            })
            .is_none());

        assert!(toasts.is_empty());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_severity_delivered_as_info() {
        let (bridge, toasts, history) = bridge();
        let record = bridge.deliver_stream_message(&StreamMessage {
            channel: "message".into(),
            payload: Payload::Json(json!({"id": "c-1", "title": "Disk full", "type": "critical"})),
        });

        assert_eq!(record.map(|r| r.id).as_deref(), Some("c-1"));
        assert_eq!(toasts.snapshot()[0].severity, Severity::Info);
        assert_eq!(history.records()[0].title, "Disk full");
    }

    #[tokio::test]
    async fn test_missing_title_still_delivered() {
        let (bridge, toasts, history) = bridge();
        let record = bridge.deliver_stream_message(&StreamMessage {
            channel: "message".into(),
            payload: Payload::Json(json!({"id": "m-1", "message": "body only", "type": 3})),
        });

        assert!(record.is_some());
        assert_eq!(toasts.snapshot()[0].message, "body only");
        assert_eq!(toasts.snapshot()[0].severity, Severity::Info);
        assert_eq!(history.records()[0].title, "");
    }

    #[tokio::test]
    async fn test_push_channel_until_detached() {
        let (bridge, toasts, history) = bridge();
        let stream = StreamConnection::new(
            Arc::new(crate::memory::ScriptedTransport::new()),
            crate::BackoffPolicy::default(),
        );
        let (tx, rx) = mpsc::channel(8);
        let handle = bridge.attach(&stream, Some(rx));

        tx.send(PushPayload::new("one", "m").with_id("1")).await.unwrap();
        tx.send(PushPayload::new("one again", "m").with_id("1")).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(toasts.len(), 2);
        assert_eq!(history.len(), 1);

        handle.shutdown().await;
        assert!(tx.send(PushPayload::new("late", "m")).await.is_err());
        assert_eq!(toasts.len(), 2);
    }
}
