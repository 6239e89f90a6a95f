//! Game Events
//!
//! One-shot notifications for the rendering/UI collaborator: kills,
//! purchases, money changes, round results and bomb milestones.

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;
use crate::core::vec2::Vec2;
use crate::game::round::{MatchWinner, RoundPhase, RoundResult};
use crate::game::state::{PlayerId, Team};
use crate::game::weapon::WeaponKind;

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Deaths first
    Elimination = 0,
    /// Then bomb milestones
    Objective = 1,
    /// Then round and match results
    Round = 2,
    /// Then money
    Economy = 3,
    /// Lowest priority
    Other = 255,
}

/// Why money changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoneyReason {
    /// Kill reward.
    Kill,
    /// Round-start stipend plus streak bonus.
    RoundStart,
    /// Weapon bought.
    Purchase,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEventData {
    /// Player died
    PlayerKilled {
        /// Who died
        victim_id: PlayerId,
        /// Who landed the final hit
        killer_id: Option<PlayerId>,
        /// Weapon used, when known
        weapon: Option<WeaponKind>,
    },

    /// Player took damage
    PlayerDamaged {
        /// Who was hit
        victim_id: PlayerId,
        /// Who fired
        attacker_id: PlayerId,
        /// Health removed
        amount: f32,
        /// Health left
        health: f32,
    },

    /// Local player fired
    ShotFired {
        /// Shooter
        player_id: PlayerId,
        /// Weapon fired
        weapon: WeaponKind,
        /// Pellets that hit a player
        hits: u32,
    },

    /// Weapon bought
    Purchase {
        /// Buyer
        player_id: PlayerId,
        /// Weapon bought
        weapon: WeaponKind,
        /// Price paid
        cost: u32,
    },

    /// Wallet changed
    MoneyChanged {
        /// Wallet owner
        player_id: PlayerId,
        /// Signed change
        delta: i64,
        /// Balance after the change
        balance: u32,
        /// Why
        reason: MoneyReason,
    },

    /// Round phase changed
    PhaseChanged {
        /// Round number
        round: u32,
        /// Phase left
        old_phase: RoundPhase,
        /// Phase entered
        new_phase: RoundPhase,
        /// When the new phase times out
        deadline: Option<Millis>,
    },

    /// Round decided
    RoundEnded {
        /// Winner, condition and score
        result: RoundResult,
    },

    /// Match decided
    MatchOver {
        /// Match winner or draw
        winner: MatchWinner,
    },

    /// Bomb handed out at round start
    BombAssigned {
        /// Attacker holding it
        carrier: PlayerId,
    },

    /// Bomb picked up
    BombPickedUp {
        /// New holder
        carrier: PlayerId,
    },

    /// Bomb dropped
    BombDropped {
        /// Where it lies
        position: Vec2,
    },

    /// Bomb armed
    BombPlanted {
        /// Planter
        planted_by: PlayerId,
        /// Plant site
        position: Vec2,
        /// Detonation time once stamped
        explode_at: Option<Millis>,
    },

    /// Bomb disarmed
    BombDefused {
        /// Defuser
        defused_by: PlayerId,
    },

    /// Bomb went off
    BombExploded {
        /// Plant site
        position: Vec2,
    },

    /// Player entered the room
    PlayerJoined {
        /// Newcomer
        player_id: PlayerId,
        /// Assigned team
        team: Team,
    },

    /// Player left the room
    PlayerLeft {
        /// Who left
        player_id: PlayerId,
    },

    /// Host left and the room is gone
    RoomClosed,
}

/// A game event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Time the event occurred
    pub at: Millis,

    /// Processing priority
    pub priority: EventPriority,

    /// Player involved (for tie-breaking)
    pub player_id: Option<PlayerId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event. Priority and subject player come from the data.
    pub fn new(at: Millis, data: GameEventData) -> Self {
        let (priority, player_id) = match &data {
            GameEventData::PlayerKilled { victim_id, .. } => (EventPriority::Elimination, Some(*victim_id)),
            GameEventData::PlayerDamaged { victim_id, .. } => (EventPriority::Other, Some(*victim_id)),
            GameEventData::ShotFired { player_id, .. } => (EventPriority::Other, Some(*player_id)),
            GameEventData::Purchase { player_id, .. } => (EventPriority::Economy, Some(*player_id)),
            GameEventData::MoneyChanged { player_id, .. } => (EventPriority::Economy, Some(*player_id)),
            GameEventData::PhaseChanged { .. } => (EventPriority::Round, None),
            GameEventData::RoundEnded { .. } => (EventPriority::Round, None),
            GameEventData::MatchOver { .. } => (EventPriority::Round, None),
            GameEventData::BombAssigned { carrier } => (EventPriority::Objective, Some(*carrier)),
            GameEventData::BombPickedUp { carrier } => (EventPriority::Objective, Some(*carrier)),
            GameEventData::BombPlanted { planted_by, .. } => (EventPriority::Objective, Some(*planted_by)),
            GameEventData::BombDefused { defused_by } => (EventPriority::Objective, Some(*defused_by)),
            GameEventData::BombDropped { .. } | GameEventData::BombExploded { .. } => {
                (EventPriority::Objective, None)
            }
            GameEventData::PlayerJoined { player_id, .. } => (EventPriority::Other, Some(*player_id)),
            GameEventData::PlayerLeft { player_id } => (EventPriority::Other, Some(*player_id)),
            GameEventData::RoomClosed => (EventPriority::Other, None),
        };

        Self {
            at,
            priority,
            player_id,
            data,
        }
    }

    /// Create player killed event.
    pub fn player_killed(
        at: Millis,
        victim_id: PlayerId,
        killer_id: Option<PlayerId>,
        weapon: Option<WeaponKind>,
    ) -> Self {
        Self::new(
            at,
            GameEventData::PlayerKilled {
                victim_id,
                killer_id,
                weapon,
            },
        )
    }

    /// Create money changed event.
    pub fn money_changed(at: Millis, player_id: PlayerId, delta: i64, balance: u32, reason: MoneyReason) -> Self {
        Self::new(
            at,
            GameEventData::MoneyChanged {
                player_id,
                delta,
                balance,
                reason,
            },
        )
    }

    /// Create phase changed event.
    pub fn phase_changed(
        at: Millis,
        round: u32,
        old_phase: RoundPhase,
        new_phase: RoundPhase,
        deadline: Option<Millis>,
    ) -> Self {
        Self::new(
            at,
            GameEventData::PhaseChanged {
                round,
                old_phase,
                new_phase,
                deadline,
            },
        )
    }

    /// Create round ended event.
    pub fn round_ended(at: Millis, result: RoundResult) -> Self {
        Self::new(at, GameEventData::RoundEnded { result })
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.priority == other.priority && self.player_id == other.player_id
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: time, then priority, then player_id
        self.at
            .cmp(&other.at)
            .then(self.priority.cmp(&other.priority))
            .then(self.player_id.cmp(&other.player_id))
    }
}
