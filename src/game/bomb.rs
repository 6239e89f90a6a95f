//! Bomb Lifecycle
//!
//! ```text
//!   Dormant ──assign──▶ Carried(x) ──drop──▶ Dropped(pos) ──pick up──▶ Carried(y)
//!                           │
//!                           └──plant──▶ Planted(pos, explode_at) ──▶ Defused | Exploded
//! ```
//!
//! Within a round the record only moves forward. Concurrent writers are
//! resolved by the freshness key `(round, rank, seq, writer)`: the record
//! with the larger key wins everywhere, so two attackers racing for a
//! dropped bomb converge on a single carrier.
//!
//! Two resolutions of the same round are ordered by completion time
//! instead. The earlier one stands, and an explosion beats a defuse
//! completed at the same moment.

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;
use crate::core::hash::StateHasher;
use crate::core::vec2::Vec2;
use crate::game::authority::HostToken;
use crate::game::error::{ActionError, ActionResult};
use crate::game::state::PlayerId;

/// Bomb state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BombState {
    /// Not yet handed out this round.
    #[default]
    Dormant,
    /// Held by a player.
    Carried {
        /// Holder.
        carrier: PlayerId,
    },
    /// Lying on the ground.
    Dropped {
        /// Where it fell.
        position: Vec2,
    },
    /// Armed. `explode_at` is stamped by the host.
    Planted {
        /// Plant site.
        position: Vec2,
        /// Who planted it.
        planted_by: PlayerId,
        /// Plant completion time.
        planted_at: Millis,
        /// Detonation time.
        explode_at: Option<Millis>,
    },
    /// Disarmed.
    Defused {
        /// Plant site.
        position: Vec2,
        /// Who defused it.
        defused_by: PlayerId,
        /// Completion time.
        at: Millis,
    },
    /// Detonated.
    Exploded {
        /// Plant site.
        position: Vec2,
        /// Detonation time.
        at: Millis,
    },
}

impl BombState {
    /// Forward-only ordering within a round.
    pub fn rank(&self) -> u8 {
        match self {
            BombState::Dormant => 0,
            BombState::Carried { .. } | BombState::Dropped { .. } => 1,
            BombState::Planted { .. } => 2,
            BombState::Defused { .. } | BombState::Exploded { .. } => 3,
        }
    }

    /// Current carrier.
    pub fn carrier(&self) -> Option<PlayerId> {
        match self {
            BombState::Carried { carrier } => Some(*carrier),
            _ => None,
        }
    }

    /// Armed and not yet resolved.
    pub fn is_planted(&self) -> bool {
        matches!(self, BombState::Planted { .. })
    }

    /// Defused or exploded.
    pub fn is_resolved(&self) -> bool {
        self.rank() == 3
    }

    /// World position when not carried.
    pub fn position(&self) -> Option<Vec2> {
        match self {
            BombState::Dropped { position }
            | BombState::Planted { position, .. }
            | BombState::Defused { position, .. }
            | BombState::Exploded { position, .. } => Some(*position),
            BombState::Dormant | BombState::Carried { .. } => None,
        }
    }

    /// Ordering between resolved states: earlier first, explosion on ties.
    fn resolution_key(&self) -> Option<(Millis, u8)> {
        match self {
            BombState::Exploded { at, .. } => Some((*at, 0)),
            BombState::Defused { at, .. } => Some((*at, 1)),
            _ => None,
        }
    }

    /// Scheduled detonation time.
    pub fn explode_at(&self) -> Option<Millis> {
        match self {
            BombState::Planted { explode_at, .. } => *explode_at,
            _ => None,
        }
    }
}

/// Outcome of adopting a remote bomb record.
#[derive(Clone, Debug, PartialEq)]
pub enum BombAdoption {
    /// Record replaced; carries the previous state.
    Applied(BombState),
    /// Same key as the known record.
    Duplicate,
    /// Older than the known record.
    Stale,
}

/// Replicated bomb record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BombRecord {
    /// Round this record belongs to.
    pub round: u32,
    /// Write counter within the round.
    pub seq: u64,
    /// Last writer.
    pub writer: Option<PlayerId>,
    /// Lifecycle state.
    #[serde(flatten)]
    pub state: BombState,
}

impl BombRecord {
    fn freshness(&self) -> (u32, u8, u64, Option<PlayerId>) {
        (self.round, self.state.rank(), self.seq, self.writer)
    }

    /// Replace this record with `incoming` if its freshness key is larger.
    /// Between two resolutions of one round, the earlier resolution wins.
    pub fn adopt(&mut self, incoming: BombRecord) -> BombAdoption {
        use std::cmp::Ordering;

        if incoming.round == self.round {
            if let (Some(mine), Some(theirs)) = (self.state.resolution_key(), incoming.state.resolution_key()) {
                match theirs.cmp(&mine) {
                    Ordering::Less => return BombAdoption::Applied(std::mem::replace(self, incoming).state),
                    Ordering::Greater => return BombAdoption::Stale,
                    Ordering::Equal => {}
                }
            }
        }

        match incoming.freshness().cmp(&self.freshness()) {
            Ordering::Greater => BombAdoption::Applied(std::mem::replace(self, incoming).state),
            Ordering::Equal => BombAdoption::Duplicate,
            Ordering::Less => BombAdoption::Stale,
        }
    }

    /// Clear for a new round. Never moves a record backwards: a record
    /// already belonging to `round` (the host's assignment arrived first)
    /// is kept.
    pub fn reset_for_round(&mut self, round: u32) -> bool {
        if self.round >= round {
            return false;
        }
        *self = BombRecord {
            round,
            ..Default::default()
        };
        true
    }

    fn write(&mut self, by: PlayerId, state: BombState) {
        self.seq += 1;
        self.writer = Some(by);
        self.state = state;
    }

    /// Hand the bomb to an attacker at round start.
    pub fn assign(&mut self, _host: &HostToken, host: PlayerId, carrier: PlayerId) -> ActionResult<()> {
        if !matches!(self.state, BombState::Dormant) {
            return Err(ActionError::BombState("be assigned"));
        }
        self.write(host, BombState::Carried { carrier });
        Ok(())
    }

    /// Pick up a dropped bomb.
    pub fn pick_up(&mut self, by: PlayerId, at: Vec2, radius: f32) -> ActionResult<()> {
        let BombState::Dropped { position } = self.state else {
            return Err(ActionError::BombState("be picked up"));
        };
        if position.distance(at) > radius {
            return Err(ActionError::OutOfRange("pick up the bomb"));
        }
        self.write(by, BombState::Carried { carrier: by });
        Ok(())
    }

    /// Drop the bomb where its carrier stands.
    pub fn drop_at(&mut self, by: PlayerId, position: Vec2) -> ActionResult<()> {
        if self.state.carrier() != Some(by) {
            return Err(ActionError::BombState("be dropped"));
        }
        self.write(by, BombState::Dropped { position });
        Ok(())
    }

    /// Drop the bomb on behalf of a carrier who left the room.
    pub fn abandon(&mut self, _host: &HostToken, host: PlayerId, position: Vec2) -> ActionResult<()> {
        if self.state.carrier().is_none() {
            return Err(ActionError::BombState("be abandoned"));
        }
        self.write(host, BombState::Dropped { position });
        Ok(())
    }

    /// Complete a plant. The detonation time is left for the host to stamp.
    pub fn plant(&mut self, by: PlayerId, position: Vec2, now: Millis) -> ActionResult<()> {
        if self.state.carrier() != Some(by) {
            return Err(ActionError::BombState("be planted"));
        }
        self.write(
            by,
            BombState::Planted {
                position,
                planted_by: by,
                planted_at: now,
                explode_at: None,
            },
        );
        Ok(())
    }

    /// Stamp `explode_at = planted_at + delay`. Returns the detonation time.
    pub fn stamp_explosion(&mut self, _host: &HostToken, host: PlayerId, delay: Millis) -> ActionResult<Millis> {
        let BombState::Planted { position, planted_by, planted_at, explode_at: None } = self.state else {
            return Err(ActionError::BombState("be armed"));
        };
        let at = planted_at + delay;
        self.write(
            host,
            BombState::Planted {
                position,
                planted_by,
                planted_at,
                explode_at: Some(at),
            },
        );
        Ok(at)
    }

    /// Complete a defuse. Fails once the detonation time has passed.
    pub fn defuse(&mut self, by: PlayerId, at: Vec2, now: Millis, radius: f32) -> ActionResult<()> {
        let BombState::Planted { position, explode_at, .. } = self.state else {
            return Err(ActionError::BombState("be defused"));
        };
        if explode_at.is_some_and(|t| now >= t) {
            return Err(ActionError::BombState("be defused"));
        }
        if position.distance(at) > radius {
            return Err(ActionError::OutOfRange("defuse"));
        }
        self.write(
            by,
            BombState::Defused {
                position,
                defused_by: by,
                at: now,
            },
        );
        Ok(())
    }

    /// Detonate a planted bomb whose time has come.
    pub fn explode(&mut self, _host: &HostToken, host: PlayerId, now: Millis) -> ActionResult<()> {
        let BombState::Planted { position, explode_at: Some(at), .. } = self.state else {
            return Err(ActionError::BombState("explode"));
        };
        if now < at {
            return Err(ActionError::BombState("explode yet"));
        }
        self.write(host, BombState::Exploded { position, at });
        Ok(())
    }

    /// Hash the replicated fields.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.round);
        hasher.update_u8(self.state.rank());
        if let Some(carrier) = self.state.carrier() {
            hasher.update_uuid(carrier.as_bytes());
        }
        if let Some(position) = self.state.position() {
            hasher.update_vec2(position);
        }
        hasher.update_u64(self.state.explode_at().unwrap_or(0));
    }
}

// =============================================================================
// INTERACTION HOLD
// =============================================================================

/// What a held interact is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldKind {
    /// Carrier on the bombsite.
    Plant,
    /// Defender next to the planted bomb.
    Defuse,
}

/// A continuous interact hold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HoldProgress {
    /// Plant or defuse.
    pub kind: HoldKind,
    /// When the hold began.
    pub started_at: Millis,
    /// Hold needed to complete.
    pub duration: Millis,
}

impl HoldProgress {
    /// Progress in [0, 1].
    pub fn fraction(&self, now: Millis) -> f32 {
        if self.duration == 0 {
            return 1.0;
        }
        (now.saturating_sub(self.started_at) as f32 / self.duration as f32).min(1.0)
    }

    /// Held for the full duration.
    pub fn is_complete(&self, now: Millis) -> bool {
        now.saturating_sub(self.started_at) >= self.duration
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::test_token;

    const HOST: PlayerId = PlayerId::new([1; 16]);
    const ATK: PlayerId = PlayerId::new([2; 16]);
    const DEF: PlayerId = PlayerId::new([3; 16]);

    fn assigned() -> BombRecord {
        let mut bomb = BombRecord::default();
        bomb.reset_for_round(1);
        bomb.assign(&test_token(), HOST, ATK).unwrap();
        bomb
    }

    #[test]
    fn test_plant_stamp_explode() {
        let host = test_token();
        let mut bomb = assigned();
        assert_eq!(bomb.state.carrier(), Some(ATK));

        assert!(bomb.plant(DEF, Vec2::ZERO, 0).is_err());
        bomb.plant(ATK, Vec2::new(320.0, 160.0), 5_000).unwrap();
        assert_eq!(bomb.state.carrier(), None);
        assert!(bomb.explode(&host, HOST, 100_000).is_err());

        assert_eq!(bomb.stamp_explosion(&host, HOST, 40_000), Ok(45_000));
        assert!(bomb.stamp_explosion(&host, HOST, 40_000).is_err());
        assert!(bomb.explode(&host, HOST, 44_999).is_err());
        bomb.explode(&host, HOST, 45_000).unwrap();
        assert!(bomb.state.is_resolved());
    }

    #[test]
    fn test_defuse_requires_radius() {
        let mut bomb = assigned();
        bomb.plant(ATK, Vec2::new(100.0, 100.0), 0).unwrap();
        assert_eq!(
            bomb.defuse(DEF, Vec2::new(200.0, 100.0), 10, 48.0),
            Err(ActionError::OutOfRange("defuse"))
        );
        bomb.defuse(DEF, Vec2::new(130.0, 100.0), 10, 48.0).unwrap();
        assert!(matches!(bomb.state, BombState::Defused { defused_by: DEF, .. }));
        assert!(bomb.defuse(DEF, Vec2::new(100.0, 100.0), 20, 48.0).is_err());
    }

    #[test]
    fn test_defuse_rejected_after_detonation_time() {
        let host = test_token();
        let mut bomb = assigned();
        bomb.plant(ATK, Vec2::new(100.0, 100.0), 0).unwrap();
        assert_eq!(bomb.stamp_explosion(&host, HOST, 40_000), Ok(40_000));

        let mut late = bomb.clone();
        assert_eq!(
            late.defuse(DEF, Vec2::new(100.0, 100.0), 45_000, 48.0),
            Err(ActionError::BombState("be defused"))
        );
        assert!(late.defuse(DEF, Vec2::new(100.0, 100.0), 40_000, 48.0).is_err());
        assert!(late.state.is_planted());
        late.defuse(DEF, Vec2::new(100.0, 100.0), 39_999, 48.0).unwrap();
    }

    /// A planted record with `explode_at = 40_000`, resolved both ways.
    fn resolutions(defused_at: Millis) -> (BombRecord, BombRecord) {
        let host = test_token();
        let mut planted = assigned();
        planted.plant(ATK, Vec2::new(100.0, 100.0), 0).unwrap();
        planted.stamp_explosion(&host, HOST, 40_000).unwrap();

        let mut exploded = planted.clone();
        exploded.explode(&host, HOST, 40_000).unwrap();

        // Written by a peer that never saw the detonation stamp
        let mut defused = planted;
        defused.seq += 3;
        defused.writer = Some(DEF);
        defused.state = BombState::Defused {
            position: Vec2::new(100.0, 100.0),
            defused_by: DEF,
            at: defused_at,
        };
        (exploded, defused)
    }

    #[test]
    fn test_late_defuse_never_replaces_explosion() {
        let (exploded, defused) = resolutions(45_000);

        let mut host_view = exploded.clone();
        assert_eq!(host_view.adopt(defused.clone()), BombAdoption::Stale);
        assert!(matches!(host_view.state, BombState::Exploded { at: 40_000, .. }));

        let mut peer_view = defused;
        assert!(matches!(peer_view.adopt(exploded.clone()), BombAdoption::Applied(BombState::Defused { .. })));
        assert_eq!(peer_view, exploded);
    }

    #[test]
    fn test_resolution_race_converges_in_both_orders() {
        for defused_at in [39_000, 40_000, 45_000] {
            let (exploded, defused) = resolutions(defused_at);

            let mut a = exploded.clone();
            a.adopt(defused.clone());
            let mut b = defused.clone();
            b.adopt(exploded.clone());
            assert_eq!(a, b, "defused at {defused_at}");

            let expect_defused = defused_at < 40_000;
            assert_eq!(matches!(a.state, BombState::Defused { .. }), expect_defused);

            // Redelivery of the losing record changes nothing
            let settled = a.clone();
            a.adopt(exploded.clone());
            a.adopt(defused.clone());
            assert_eq!(a, settled);
        }
    }

    #[test]
    fn test_drop_and_pick_up() {
        let mut bomb = assigned();
        bomb.drop_at(ATK, Vec2::new(50.0, 50.0)).unwrap();
        assert_eq!(bomb.state.position(), Some(Vec2::new(50.0, 50.0)));
        assert!(bomb.pick_up(ATK, Vec2::new(200.0, 50.0), 50.0).is_err());
        bomb.pick_up(ATK, Vec2::new(80.0, 50.0), 50.0).unwrap();
        assert_eq!(bomb.state.carrier(), Some(ATK));
    }

    #[test]
    fn test_adopt_is_forward_only() {
        let mut local = assigned();
        let carried = local.clone();

        let mut planted = local.clone();
        planted.plant(ATK, Vec2::ZERO, 0).unwrap();

        assert!(matches!(local.adopt(planted.clone()), BombAdoption::Applied(_)));
        assert_eq!(local.adopt(planted.clone()), BombAdoption::Duplicate);
        assert_eq!(local.adopt(carried), BombAdoption::Stale);
        assert_eq!(local, planted);

        // A new round beats anything from the old one
        let mut next = BombRecord::default();
        next.reset_for_round(2);
        assert!(matches!(local.adopt(next), BombAdoption::Applied(_)));
    }

    #[test]
    fn test_pickup_race_converges() {
        let other = PlayerId::new([9; 16]);
        let mut dropped = assigned();
        dropped.drop_at(ATK, Vec2::ZERO).unwrap();

        let mut first = dropped.clone();
        first.pick_up(ATK, Vec2::ZERO, 50.0).unwrap();
        let mut second = dropped.clone();
        second.pick_up(other, Vec2::ZERO, 50.0).unwrap();

        let mut a = first.clone();
        a.adopt(second.clone());
        let mut b = second.clone();
        b.adopt(first.clone());
        assert_eq!(a, b);
        assert_eq!(a.state.carrier(), Some(other));
    }

    #[test]
    fn test_reset_never_moves_backwards() {
        let mut bomb = assigned();
        assert!(!bomb.reset_for_round(1));
        assert_eq!(bomb.state.carrier(), Some(ATK));
        assert!(bomb.reset_for_round(2));
        assert_eq!(bomb.state, BombState::Dormant);
    }

    #[test]
    fn test_hold_progress() {
        let hold = HoldProgress { kind: HoldKind::Plant, started_at: 1_000, duration: 3_000 };
        assert_eq!(hold.fraction(2_500), 0.5);
        assert!(!hold.is_complete(3_999));
        assert!(hold.is_complete(4_000));
        assert_eq!(hold.fraction(9_000), 1.0);
    }

    #[test]
    fn test_record_wire_format() {
        let bomb = assigned();
        let json = serde_json::to_value(&bomb).unwrap();
        assert_eq!(json["status"], "carried");
        assert_eq!(json["round"], 1);
        let back: BombRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, bomb);
    }
}
