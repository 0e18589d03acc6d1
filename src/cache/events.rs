//! Lifecycle notifications
//!
//! The engine publishes one [`CacheEvent`] per completed operation on a
//! tokio broadcast channel. Subscribers receive events in publish order;
//! dropping the receiver unsubscribes. A subscriber that falls more than
//! the channel capacity behind observes `RecvError::Lagged`.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{trace, warn};

// == Cache Event ==
/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    Set { key: String, value: Value },
    Get { key: String, value: Value },
    /// `value` is the last known value, when it could still be read
    Delete { key: String, value: Option<Value> },
    Expired { key: String, value: Option<Value> },
    Evicted { key: String, value: Option<Value> },
    Clear,
    /// Emitted once per sweep that removed at least one entry
    Cleanup { count: usize },
    /// A backend or codec failure that was degraded instead of propagated
    Error { key: Option<String>, message: String },
}

impl CacheEvent {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Set { .. } => "set",
            CacheEvent::Get { .. } => "get",
            CacheEvent::Delete { .. } => "delete",
            CacheEvent::Expired { .. } => "expired",
            CacheEvent::Evicted { .. } => "evicted",
            CacheEvent::Clear => "clear",
            CacheEvent::Cleanup { .. } => "cleanup",
            CacheEvent::Error { .. } => "error",
        }
    }

    /// The affected key, if the event concerns a single key.
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Set { key, .. }
            | CacheEvent::Get { key, .. }
            | CacheEvent::Delete { key, .. }
            | CacheEvent::Expired { key, .. }
            | CacheEvent::Evicted { key, .. } => Some(key),
            CacheEvent::Error { key, .. } => key.as_deref(),
            CacheEvent::Clear | CacheEvent::Cleanup { .. } => None,
        }
    }
}

// == Event Bus ==
/// Broadcast channel the engine publishes notifications on.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Publishes an event. Events with no subscribers are dropped.
    ///
    /// Logs a warning when the buffer is full, since the slowest subscriber
    /// then loses its oldest unread event.
    pub fn publish(&self, event: CacheEvent) {
        let kind = event.kind();
        let overflowing = self.tx.len() >= self.capacity;
        match self.tx.send(event) {
            Ok(receivers) if overflowing => warn!(
                event = kind,
                receivers,
                capacity = self.capacity,
                "Event buffer full; a lagging subscriber missed an event"
            ),
            Ok(receivers) => trace!(event = kind, receivers, "Published cache event"),
            Err(_) => trace!(event = kind, "No subscribers for cache event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
