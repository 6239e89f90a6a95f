//! Core primitives.
//!
//! Geometry, seeded randomness, time and state fingerprints shared by the
//! game and network layers.

pub mod vec2;
pub mod rng;
pub mod hash;
pub mod clock;

// Re-export core types
pub use vec2::Vec2;
pub use rng::DeterministicRng;
pub use hash::{compute_room_hash, StateHash, StateHasher};
pub use clock::{Clock, ManualClock, Millis, SystemClock};
