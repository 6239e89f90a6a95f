//! # Bombsite
//!
//! Round-based team combat with a bomb objective: one team plants the
//! bomb at the bombsite, the other defuses it or eliminates the planters.
//! There is no game server. Participants share state through a replicated
//! key/value store and each one simulates its own player.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         BOMBSITE                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                               │
//! │  ├── vec2.rs     - 2D vector math                           │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                 │
//! │  ├── hash.rs     - State fingerprints                       │
//! │  └── clock.rs    - Wall and manual clocks                   │
//! │                                                             │
//! │  game/           - Rules (no I/O)                           │
//! │  ├── round.rs    - Phases, results, win evaluation          │
//! │  ├── bomb.rs     - Bomb record and transitions              │
//! │  ├── phase.rs    - Host driver and change reactions         │
//! │  ├── weapon.rs   - Catalog, fire/reload state machine       │
//! │  ├── combat.rs   - Spread and hit resolution                │
//! │  ├── economy.rs  - Money and purchases                      │
//! │  └── tick.rs     - Per-participant simulation loop          │
//! │                                                             │
//! │  network/        - Replicated store                         │
//! │  ├── store.rs    - Store trait and notifications            │
//! │  ├── memory.rs   - In-process store                         │
//! │  ├── reconcile.rs- Notifications into room state            │
//! │  ├── session.rs  - Room session (tick + sync)               │
//! │  ├── server.rs   - WebSocket relay                          │
//! │  └── client.rs   - Relay client store                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Convergence
//!
//! Delivery may be late, reordered or duplicated. Every record carries
//! a freshness key and every effect is applied at most once per round,
//! so participants that have seen the same set of writes hold the same
//! replicated state, whatever order the writes arrived in.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{GameConfig, RelayConfig};
pub use core::clock::{Clock, ManualClock, Millis, SystemClock};
pub use core::rng::DeterministicRng;
pub use core::vec2::Vec2;
pub use game::input::{InputFrame, Intent};
pub use game::state::{PlayerId, PlayerState, RoomState, Team};
pub use network::session::RoomSession;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Frame rate the demo and relay clients tick at (Hz)
pub const TICK_RATE: u32 = 20;
