//! Relay Protocol
//!
//! Wire format between a [`RelayStore`] client and the relay server.
//! Messages are JSON text frames for debugging ease; bincode binary frames
//! are accepted too.
//!
//! Store values are arbitrary JSON. Binary encodings carry them as JSON
//! text (see [`payload`]), since bincode cannot describe a self-describing
//! value on its own.
//!
//! [`RelayStore`]: crate::network::client::RelayStore

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::clock::Millis;
use crate::network::store::{DisconnectOp, Notification, SubscribeMode};

/// Serde adapter for a JSON value inside a message.
pub mod payload {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    /// Serialize as-is for JSON, as JSON text for binary formats.
    pub fn serialize<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            value.serialize(serializer)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    /// Inverse of [`serialize`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        if deserializer.is_human_readable() {
            Value::deserialize(deserializer)
        } else {
            let text = String::deserialize(deserializer)?;
            serde_json::from_str(&text).map_err(D::Error::custom)
        }
    }
}

/// Serde adapter for an optional JSON value inside a message.
pub mod optional_payload {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    /// Serialize as-is for JSON, as optional JSON text for binary formats.
    pub fn serialize<S: Serializer>(value: &Option<Value>, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            value.serialize(serializer)
        } else {
            value.as_ref().map(Value::to_string).serialize(serializer)
        }
    }

    /// Inverse of [`serialize`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
        if deserializer.is_human_readable() {
            Option::<Value>::deserialize(deserializer)
        } else {
            Option::<String>::deserialize(deserializer)?
                .map(|text| serde_json::from_str(&text).map_err(D::Error::custom))
                .transpose()
        }
    }
}

// =============================================================================
// CLIENT -> RELAY MESSAGES
// =============================================================================

/// Messages sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a subscription. `id` is chosen by the client and tags every
    /// notification sent back for it.
    Subscribe {
        /// Client subscription id.
        id: u64,
        /// Path.
        path: String,
        /// Mode.
        mode: SubscribeMode,
    },

    /// End a subscription.
    Unsubscribe {
        /// Client subscription id.
        id: u64,
    },

    /// Set an exact value.
    Set {
        /// Path.
        path: String,
        /// Value.
        #[serde(with = "payload")]
        value: Value,
    },

    /// Atomically set several children. `fields` is a JSON object.
    Update {
        /// Parent path.
        path: String,
        /// Children to set.
        #[serde(with = "payload")]
        fields: Value,
    },

    /// Append a child under a client-generated key.
    Push {
        /// Parent path.
        path: String,
        /// Child key.
        key: String,
        /// Value.
        #[serde(with = "payload")]
        value: Value,
    },

    /// Delete a value.
    Remove {
        /// Path.
        path: String,
    },

    /// Register a disconnect write.
    OnDisconnect {
        /// Path.
        path: String,
        /// Write to perform.
        op: DisconnectOp,
    },

    /// Drop disconnect writes at or below a path.
    CancelOnDisconnect {
        /// Path.
        path: String,
    },

    /// Latency probe.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// RELAY -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome {
        /// Relay-side connection id.
        connection: u64,
        /// Store time at connect.
        server_time: Millis,
        /// Relay version.
        version: String,
    },

    /// A notification for one of the client's subscriptions.
    Notify {
        /// Client subscription id.
        subscription: u64,
        /// The change.
        notification: Notification,
    },

    /// Reply to [`ClientMessage::Ping`].
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Store time.
        server_time: Millis,
    },

    /// A request was rejected.
    Error {
        /// Error kind.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be decoded.
    InvalidMessage,
    /// Path is malformed.
    InvalidPath,
    /// `update` fields were not an object.
    InvalidFields,
    /// Subscription id already in use.
    DuplicateSubscription,
    /// Relay is shutting down.
    Shutdown,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
