//! Action errors.
//!
//! An action attempted outside its legal state is rejected with no state
//! change. These never cross the network; callers log them at debug level
//! and carry on.

use crate::game::round::RoundPhase;
use crate::game::state::PlayerId;
use crate::game::weapon::{WeaponError, WeaponKind};

/// Result type alias using [`ActionError`].
pub type ActionResult<T> = std::result::Result<T, ActionError>;

/// Rejected local or host action.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// Host-only action attempted by a replica.
    #[error("only the host may {0}")]
    NotHost(&'static str),

    /// Action not allowed in the current phase.
    #[error("{action} not allowed during {phase:?}")]
    WrongPhase {
        /// What was attempted.
        action: &'static str,
        /// Phase at the time.
        phase: RoundPhase,
    },

    /// Acting player is dead.
    #[error("player is dead")]
    Dead,

    /// Player is not known locally.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// Weapon rejected the action.
    #[error("weapon: {0}")]
    Weapon(#[from] WeaponError),

    /// No weapon in the requested slot.
    #[error("no weapon in slot {0}")]
    NoSuchSlot(usize),

    /// Trigger held on a semi-automatic weapon.
    #[error("{0} is not automatic")]
    NotAutomatic(WeaponKind),

    /// Not enough money.
    #[error("need ${required}, have ${available}")]
    InsufficientFunds {
        /// Price.
        required: u32,
        /// Wallet.
        available: u32,
    },

    /// Bomb is not in a state that allows the action.
    #[error("bomb cannot {0} right now")]
    BombState(&'static str),

    /// Acting player is on the wrong side for the action.
    #[error("wrong side to {0}")]
    WrongSide(&'static str),

    /// Acting player is too far from the target.
    #[error("out of range to {0}")]
    OutOfRange(&'static str),
}
