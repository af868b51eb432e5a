// Real-time notification pipeline
//
// This crate keeps a long-lived event stream alive across network flaps,
// shows short-lived toasts with timed eviction, and maintains a durable,
// deduplicated notification history fed by the live stream, a push side
// channel and a background poll.
//
// Key design decisions:
// - Explicit composition root (NotificationCenter) instead of global state
// - Traits (EventTransport, NotificationStore, SessionProvider) for pluggable backends
// - Observers are plain callbacks returning a Subscription guard
// - Timers are tokio tasks indexed by id, cancelled deterministically
// - Mutations of the history are optimistic; failed confirmations are logged

pub mod backoff;
pub mod bridge;
pub mod center;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod observer;
pub mod poller;
pub mod session;
pub mod store;
pub mod stream;
pub mod toast;
pub mod transport;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use backoff::BackoffPolicy;
pub use bridge::{BridgeHandle, DeliveryBridge, InboundEvent, PushPayload, StreamPayload};
pub use center::NotificationCenter;
pub use config::PipelineConfig;
pub use error::{NotifyError, Result};
pub use history::HistoryCache;
pub use model::{
    generate_id, ConnectionHealth, ConnectionState, NotificationRecord, Severity, ToastInput,
    ToastNotification,
};
pub use observer::{Observers, Subscription};
pub use poller::{HistoryPoller, PollerConfig};
pub use session::{AuthUser, SessionProvider, StaticSession};
pub use store::{HttpNotificationStore, NotificationStore};
pub use stream::{Payload, StreamConfig, StreamConnection, StreamMessage};
pub use toast::ToastQueue;
pub use transport::{EventStream, EventTransport, SseTransport, StreamEvent};

// Test doubles re-exports
pub use memory::{InMemoryNotificationStore, ScriptedTransport};
