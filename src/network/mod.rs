//! Network Layer
//!
//! The replicated store and everything that talks to it. Participants
//! share state only through the store; this layer turns store
//! notifications into game state and game deltas into store writes.
//! The game rules themselves live in `game/`.

pub mod client;
pub mod memory;
pub mod paths;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod store;

pub use client::RelayStore;
pub use memory::{MemoryConnection, MemoryStore};
pub use paths::RoomPaths;
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use server::{RelayError, RelayServer};
pub use session::{RoomMeta, RoomSession, SessionError};
pub use store::{DisconnectOp, Notification, ReplicatedStore, StoreError, SubscribeMode, Subscription};
