//! Replicated Store Interface
//!
//! The only transport between participants. A store holds a JSON tree
//! addressed by `/`-separated paths and fans writes out to path-scoped
//! subscriptions. Nothing is assumed about delivery order: notifications
//! can arrive late, reordered or twice, and every consumer compares before
//! it mutates.
//!
//! Two implementations ship with the crate: [`MemoryStore`] (in-process,
//! used by tests, the demo and the relay itself) and [`RelayStore`]
//! (a client of the WebSocket relay).
//!
//! [`MemoryStore`]: crate::network::memory::MemoryStore
//! [`RelayStore`]: crate::network::client::RelayStore

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::core::clock::Millis;
use crate::network::protocol::{optional_payload, payload};

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Path is empty or has an empty segment.
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    /// A record could not be encoded or decoded.
    #[error("Record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The connection to the store is gone.
    #[error("Store connection closed")]
    Disconnected,

    /// Could not reach the relay.
    #[error("Relay connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// What a subscription reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeMode {
    /// The whole value at the path, on every change.
    Value,
    /// Per-child added/changed/removed.
    Children,
}

/// Write to perform when the writer's connection drops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectOp {
    /// Delete the value.
    Remove,
    /// Set an exact value.
    Set {
        /// Value to write.
        #[serde(with = "payload")]
        value: Value,
    },
}

/// One change observed by a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    /// Current value at a `Value` subscription (`None` when absent).
    Value {
        /// Subscribed path.
        path: String,
        /// Whole value.
        #[serde(with = "optional_payload")]
        value: Option<Value>,
    },
    /// New child under a `Children` subscription.
    ChildAdded {
        /// Subscribed path.
        path: String,
        /// Child key.
        key: String,
        /// Child value.
        #[serde(with = "payload")]
        value: Value,
    },
    /// Existing child changed.
    ChildChanged {
        /// Subscribed path.
        path: String,
        /// Child key.
        key: String,
        /// New child value.
        #[serde(with = "payload")]
        value: Value,
    },
    /// Child deleted.
    ChildRemoved {
        /// Subscribed path.
        path: String,
        /// Child key.
        key: String,
    },
}

impl Notification {
    /// Subscribed path this notification belongs to.
    pub fn path(&self) -> &str {
        match self {
            Notification::Value { path, .. }
            | Notification::ChildAdded { path, .. }
            | Notification::ChildChanged { path, .. }
            | Notification::ChildRemoved { path, .. } => path,
        }
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    mode: SubscribeMode,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    /// Wrap a notification channel.
    pub fn new(path: impl Into<String>, mode: SubscribeMode, rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self {
            path: path.into(),
            mode,
            rx,
        }
    }

    /// Subscribed path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Subscription mode.
    pub fn mode(&self) -> SubscribeMode {
        self.mode
    }

    /// Everything delivered so far, without waiting.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            out.push(n);
        }
        out
    }

    /// Wait for the next notification. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

/// The replicated store as seen by one participant connection.
///
/// Writes are fire-and-forget: a successful return means the write was
/// accepted for delivery, and its effects come back as notifications.
pub trait ReplicatedStore: Send {
    /// Subscribe to a path. The current state is delivered first.
    fn subscribe(&self, path: &str, mode: SubscribeMode) -> Result<Subscription, StoreError>;

    /// Set an exact value. `Value::Null` deletes.
    fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Atomically set several children of `path`.
    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append a child under a fresh unique key and return the key.
    fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    /// Delete a value.
    fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Register a write to run when this connection drops.
    fn on_disconnect(&self, path: &str, op: DisconnectOp) -> Result<(), StoreError>;

    /// Drop every disconnect write registered at or below `path`.
    fn cancel_on_disconnect(&self, path: &str) -> Result<(), StoreError>;

    /// Store-assigned timestamp.
    fn server_time(&self) -> Millis;
}

// =============================================================================
// PUSH KEYS
// =============================================================================

/// Generates push keys that sort by creation time and never collide
/// across connections.
#[derive(Clone, Debug)]
pub struct PushKeys {
    prefix: String,
    counter: u64,
    last_time: Millis,
}

impl PushKeys {
    /// Generator whose keys carry `prefix` to keep connections apart.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
            last_time: 0,
        }
    }

    /// Generator with a random prefix.
    pub fn random() -> Self {
        let id = uuid::Uuid::new_v4();
        Self::new(hex::encode(&id.as_bytes()[..6]))
    }

    /// Next key at `now`.
    pub fn next(&mut self, now: Millis) -> String {
        let now = now.max(self.last_time);
        self.last_time = now;
        self.counter += 1;
        format!("{:012x}-{:06x}-{}", now, self.counter, self.prefix)
    }
}

/// Deserialize a record from a notification value.
pub fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, StoreError> {
    Ok(T::deserialize(value)?)
}

/// Serialize a record for a write.
pub fn encode<T: Serialize>(record: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(record)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keys_sort_by_time_then_counter() {
        let mut keys = PushKeys::new("0001");
        let a = keys.next(1_000);
        let b = keys.next(1_000);
        let c = keys.next(2_000);
        // Clock going backwards does not reorder keys
        let d = keys.next(1_500);
        assert!(a < b && b < c && c < d);
        assert_ne!(PushKeys::random().next(0), PushKeys::random().next(0));
    }

    #[tokio::test]
    async fn test_subscription_drain_and_recv() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new("rooms/r/round", SubscribeMode::Value, rx);
        tx.send(Notification::Value { path: "rooms/r/round".into(), value: None }).unwrap();
        tx.send(Notification::Value { path: "rooms/r/round".into(), value: Some(Value::Bool(true)) })
            .unwrap();

        assert_eq!(sub.drain().len(), 2);
        assert!(sub.drain().is_empty());

        tx.send(Notification::ChildRemoved { path: "rooms/r/shots".into(), key: "k".into() }).unwrap();
        drop(tx);
        assert_eq!(sub.recv().await.map(|n| n.path().to_string()), Some("rooms/r/shots".into()));
        assert_eq!(sub.recv().await, None);
    }
}
