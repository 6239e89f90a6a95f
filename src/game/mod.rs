//! Game Logic Module
//!
//! All match simulation code. Nothing here performs I/O: store writes come
//! out of a tick as [`state::Outbound`] values and remote records come in
//! through the reconciler in `network`.
//!
//! ## Module Structure
//!
//! - `state`: Room state, player state, identifiers
//! - `authority`: Host role and the capability token host writes require
//! - `round`: Round phases, results, score, win evaluation
//! - `bomb`: Bomb record and its transitions
//! - `phase`: Host driver and reactions to round/bomb/player changes
//! - `scheduler`: Logical timers (phase deadlines, detonation, win poll)
//! - `weapon`: Catalog and per-instance firing/reload state machine
//! - `raycast`: Grid traversal, ray/circle tests, visibility scan
//! - `combat`: Pellet spread and hit resolution
//! - `economy`: Money, purchases, round-start awards
//! - `input`: Player intents and input frames
//! - `tick`: Participant simulation loop
//! - `map`: Map collaborator trait and the grid map
//! - `events`: Game events for UI and logs

pub mod authority;
pub mod bomb;
pub mod combat;
pub mod economy;
pub mod error;
pub mod events;
pub mod input;
pub mod map;
pub mod phase;
pub mod raycast;
pub mod round;
pub mod scheduler;
pub mod state;
pub mod tick;
pub mod weapon;

// Re-export key types
pub use authority::{Authority, HostToken, Role};
pub use bomb::{BombRecord, BombState};
pub use error::{ActionError, ActionResult};
pub use events::{GameEvent, GameEventData};
pub use input::{InputFrame, Intent};
pub use map::{MapView, TileMap};
pub use round::{RoundPhase, RoundState, WinCondition};
pub use state::{Outbound, PlayerId, PlayerState, RoomState, Team};
pub use tick::TickResult;
pub use weapon::{Weapon, WeaponKind};
