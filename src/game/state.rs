//! Game State Definitions
//!
//! Player records and the per-participant room state.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::core::clock::Millis;
use crate::core::hash::{compute_room_hash, StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::authority::Authority;
use crate::game::bomb::{BombRecord, HoldProgress};
use crate::game::combat::{DamageEvent, ShotTrail};
use crate::game::error::{ActionError, ActionResult};
use crate::game::events::GameEvent;
use crate::game::input::Controls;
use crate::game::round::{AppliedEffects, RoundPhase, RoundState};
use crate::game::scheduler::Scheduler;
use crate::game::weapon::{Weapon, WeaponKind, WeaponRecord, WeaponSlot};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering. Serializes as the
/// hyphenated UUID string so it can double as a store path segment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random identifier.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.short())
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.to_uuid_string()
    }
}

impl TryFrom<String> for PlayerId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_uuid_str(&value).ok_or_else(|| format!("invalid player id {value:?}"))
    }
}

// =============================================================================
// TEAM
// =============================================================================

/// Team membership. Team A attacks first; sides swap at the configured round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Team {
    /// Opening attackers.
    A,
    /// Opening defenders.
    B,
}

impl Team {
    /// The opposing team.
    #[inline]
    pub fn other(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }

    /// Team a newcomer joins: the smaller one, A on a tie.
    pub fn balance<'a>(existing: impl IntoIterator<Item = &'a Team>) -> Team {
        let (a, b) = existing.into_iter().fold((0usize, 0usize), |(a, b), team| match team {
            Team::A => (a + 1, b),
            Team::B => (a, b + 1),
        });
        if a <= b {
            Team::A
        } else {
            Team::B
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::A => f.write_str("A"),
            Team::B => f.write_str("B"),
        }
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Health a shooter expects a victim to have until confirmation arrives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthPrediction {
    /// Predicted health.
    pub health: f32,
    /// Prediction is discarded after this time.
    pub until: Millis,
}

/// Result of applying damage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DamageOutcome {
    /// Health actually removed.
    pub applied: f32,
    /// This hit was the killing blow.
    pub killed: bool,
}

/// Replicated form of a player, written by its owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Owner.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Team.
    pub team: Team,
    /// World position.
    pub position: Vec2,
    /// Aim angle in radians.
    pub aim: f32,
    /// Health in [0, max].
    pub health: f32,
    /// Alive flag.
    pub alive: bool,
    /// Wallet.
    pub money: u32,
    /// Held weapons, in slot order.
    pub weapons: Vec<WeaponRecord>,
    /// Index into `weapons`.
    pub active_weapon: usize,
    /// Holding interact on the bombsite.
    #[serde(default)]
    pub is_planting: bool,
    /// Holding interact on the planted bomb.
    #[serde(default)]
    pub is_defusing: bool,
    /// Plant/defuse progress in [0, 1].
    #[serde(default)]
    pub action_progress: f32,
    /// Who landed the killing blow.
    #[serde(default)]
    pub killed_by: Option<PlayerId>,
    /// Round in which the player died.
    #[serde(default)]
    pub death_round: Option<u32>,
    /// Owner's publish counter; mirrors ignore anything not newer.
    pub seq: u64,
}

/// State of a single player in the room.
#[derive(Clone, Debug)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,

    /// Display name
    pub name: String,

    /// Team membership
    pub team: Team,

    /// World position
    pub position: Vec2,

    /// Aim angle in radians
    pub aim: f32,

    /// Current health, clamped to [0, max_health]
    pub health: f32,

    /// Is player still alive?
    pub alive: bool,

    /// Wallet
    pub money: u32,

    /// Held weapons (at most one per slot)
    pub weapons: Vec<Weapon>,

    /// Index of the weapon in hand
    pub active_weapon: usize,

    /// Carrying the bomb (derived from the bomb record)
    pub has_bomb: bool,

    /// Holding interact on the bombsite
    pub is_planting: bool,

    /// Holding interact on the planted bomb
    pub is_defusing: bool,

    /// Plant/defuse progress in [0, 1]
    pub action_progress: f32,

    /// ID of player who landed the killing blow
    pub killed_by: Option<PlayerId>,

    /// Round in which the player died
    pub death_round: Option<u32>,

    /// Publish counter (owner) or last applied counter (mirror)
    pub seq: u64,

    /// Shooter-side health prediction for mirrors
    pub prediction: Option<HealthPrediction>,

    max_health: f32,
}

impl PlayerState {
    /// Create a new player holding the starter pistol.
    pub fn new(id: PlayerId, name: impl Into<String>, team: Team, config: &GameConfig) -> Self {
        Self {
            id,
            name: name.into(),
            team,
            position: Vec2::ZERO,
            aim: 0.0,
            health: config.player.max_health,
            alive: true,
            money: config.economy.starting_money,
            weapons: vec![Weapon::new(WeaponKind::StarterPistol)],
            active_weapon: 0,
            has_bomb: false,
            is_planting: false,
            is_defusing: false,
            action_progress: 0.0,
            killed_by: None,
            death_round: None,
            seq: 0,
            prediction: None,
            max_health: config.player.max_health,
        }
    }

    /// Build a mirror from a replicated snapshot.
    pub fn from_snapshot(snapshot: &PlayerSnapshot, config: &GameConfig) -> Self {
        let mut player = Self::new(snapshot.id, snapshot.name.clone(), snapshot.team, config);
        player.overwrite_from(snapshot);
        player
    }

    /// Full health.
    pub fn max_health(&self) -> f32 {
        self.max_health
    }

    /// Weapon in hand.
    pub fn active_weapon(&self) -> Option<&Weapon> {
        self.weapons.get(self.active_weapon)
    }

    /// Weapon in hand, mutably.
    pub fn active_weapon_mut(&mut self) -> Option<&mut Weapon> {
        self.weapons.get_mut(self.active_weapon)
    }

    /// Equip a fresh weapon. A weapon in the same slot is replaced and
    /// returned; the new weapon becomes active either way.
    pub fn give_weapon(&mut self, kind: WeaponKind) -> Option<WeaponKind> {
        let slot = kind.spec().slot;
        let weapon = Weapon::new(kind);

        if let Some(idx) = self.weapons.iter().position(|w| w.spec().slot == slot) {
            let replaced = std::mem::replace(&mut self.weapons[idx], weapon);
            self.active_weapon = idx;
            return Some(replaced.kind());
        }

        // Primary sits before secondary
        let idx = match slot {
            WeaponSlot::Primary => 0,
            WeaponSlot::Secondary => self.weapons.len(),
        };
        self.weapons.insert(idx, weapon);
        self.active_weapon = idx;
        None
    }

    /// Put a different held weapon in hand.
    pub fn switch_weapon(&mut self, index: usize) -> ActionResult<()> {
        if index >= self.weapons.len() {
            return Err(ActionError::NoSuchSlot(index));
        }
        self.active_weapon = index;
        Ok(())
    }

    /// Remove health. Death is applied at most once.
    pub fn take_damage(&mut self, amount: f32, attacker: Option<PlayerId>, round: u32) -> DamageOutcome {
        if !self.alive || amount <= 0.0 {
            return DamageOutcome { applied: 0.0, killed: false };
        }

        let before = self.health;
        self.health = (self.health - amount).clamp(0.0, self.max_health);

        let killed = self.health <= 0.0;
        if killed {
            self.alive = false;
            self.killed_by = attacker;
            self.death_round = Some(round);
            self.clear_interaction();
        }

        DamageOutcome {
            applied: before - self.health,
            killed,
        }
    }

    /// Clear plant/defuse flags.
    pub fn clear_interaction(&mut self) {
        self.is_planting = false;
        self.is_defusing = false;
        self.action_progress = 0.0;
    }

    /// Return to a spawn point at full health for a new round.
    ///
    /// Survivors keep their equipment; players who died get the starter
    /// pistol back.
    pub fn reset_for_round(&mut self, spawn: Vec2) {
        if !self.alive {
            self.weapons = vec![Weapon::new(WeaponKind::StarterPistol)];
            self.active_weapon = 0;
        }
        for weapon in &mut self.weapons {
            weapon.cancel_reload();
        }
        self.position = spawn;
        self.health = self.max_health;
        self.alive = true;
        self.killed_by = None;
        self.death_round = None;
        self.prediction = None;
        self.clear_interaction();
    }

    /// Health to display: a live prediction wins over the mirrored value.
    pub fn displayed_health(&self, now: Millis) -> f32 {
        match self.prediction {
            Some(p) if now < p.until => p.health.min(self.health),
            _ => self.health,
        }
    }

    /// Replicated form.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            team: self.team,
            position: self.position,
            aim: self.aim,
            health: self.health,
            alive: self.alive,
            money: self.money,
            weapons: self.weapons.iter().map(Weapon::to_record).collect(),
            active_weapon: self.active_weapon,
            is_planting: self.is_planting,
            is_defusing: self.is_defusing,
            action_progress: self.action_progress,
            killed_by: self.killed_by,
            death_round: self.death_round,
            seq: self.seq,
        }
    }

    /// Overwrite a mirror wholesale from a newer snapshot. The local health
    /// prediction survives until the record confirms it or it expires.
    pub fn overwrite_from(&mut self, snapshot: &PlayerSnapshot) {
        self.name = snapshot.name.clone();
        self.team = snapshot.team;
        self.position = snapshot.position;
        self.aim = snapshot.aim;
        self.health = snapshot.health.clamp(0.0, self.max_health);
        self.alive = snapshot.alive && self.health > 0.0;
        self.money = snapshot.money;
        self.weapons = snapshot.weapons.iter().map(Weapon::from_record).collect();
        if self.weapons.is_empty() {
            self.weapons.push(Weapon::new(WeaponKind::StarterPistol));
        }
        self.active_weapon = snapshot.active_weapon.min(self.weapons.len() - 1);
        self.is_planting = snapshot.is_planting;
        self.is_defusing = snapshot.is_defusing;
        self.action_progress = snapshot.action_progress.clamp(0.0, 1.0);
        self.killed_by = snapshot.killed_by;
        self.death_round = snapshot.death_round;
        self.seq = snapshot.seq;

        if let Some(p) = self.prediction {
            if self.health <= p.health || !self.alive {
                self.prediction = None;
            }
        }
    }

    /// Hash the replicated fields.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_uuid(&self.id.0);
        hasher.update_u8(self.team as u8);
        hasher.update_vec2(self.position);
        hasher.update_f32(self.health);
        hasher.update_bool(self.alive);
        hasher.update_u32(self.money);
        hasher.update_u32(self.active_weapon as u32);
        for weapon in &self.weapons {
            hasher.update_str(weapon.kind().id());
            hasher.update_u32(weapon.current_ammo());
            hasher.update_u32(weapon.reserve_ammo());
        }
    }
}

// =============================================================================
// OUTBOUND DELTAS
// =============================================================================

/// A local state change that must be written to the replicated store.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// Local player's record changed.
    Player(PlayerSnapshot),
    /// Round record changed (host only).
    Round(RoundState),
    /// Bomb record changed.
    Bomb(BombRecord),
    /// Damage dealt by the local player.
    Damage(DamageEvent),
    /// Damage event consumed; delete it.
    AckDamage(String),
    /// Tracer for remote rendering.
    Shot(ShotTrail),
    /// Tracer lifetime over; delete it.
    ExpireShot(String),
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Everything one participant knows about a room.
///
/// Owned by a single session and mutated only from its tick and its
/// notification handlers.
#[derive(Clone, Debug)]
pub struct RoomState {
    /// Room identifier
    pub room_id: String,

    /// Gameplay configuration
    pub config: GameConfig,

    /// Who may perform host-only writes
    pub authority: Authority,

    /// Local player plus mirrors of everyone else
    pub players: BTreeMap<PlayerId, PlayerState>,

    /// Round record (replicated, host-written)
    pub round: RoundState,

    /// Bomb record (replicated)
    pub bomb: BombRecord,

    /// One-time round effects already applied here
    pub effects: AppliedEffects,

    /// Pending timers
    pub scheduler: Scheduler,

    /// Running plant/defuse hold
    pub hold: Option<HoldProgress>,

    /// Held buttons and movement direction
    pub controls: Controls,

    /// Participant RNG
    pub rng: DeterministicRng,

    /// Damage events already consumed, with the round they belong to
    pub consumed_damage: BTreeMap<String, u32>,

    /// Time of the previous tick
    pub last_tick: Option<Millis>,

    /// The room was removed from the store
    pub closed: bool,

    local_dirty: bool,
    position_dirty: bool,
    last_publish: Millis,
    pending_outbound: Vec<Outbound>,
    pending_events: Vec<GameEvent>,
}

impl RoomState {
    /// Create a room view around the local player.
    pub fn new(room_id: impl Into<String>, local: PlayerState, authority: Authority, config: GameConfig) -> Self {
        let room_id = room_id.into();
        let rng = DeterministicRng::for_participant(&room_id, local.id.as_bytes());
        let mut players = BTreeMap::new();
        players.insert(local.id, local);

        Self {
            room_id,
            config,
            authority,
            players,
            round: RoundState::default(),
            bomb: BombRecord::default(),
            effects: AppliedEffects::default(),
            scheduler: Scheduler::default(),
            hold: None,
            controls: Controls::default(),
            rng,
            consumed_damage: BTreeMap::new(),
            last_tick: None,
            closed: false,
            local_dirty: true,
            position_dirty: false,
            last_publish: 0,
            pending_outbound: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    /// Local player's ID.
    pub fn local_id(&self) -> PlayerId {
        self.authority.local()
    }

    /// Local player.
    pub fn local(&self) -> Option<&PlayerState> {
        self.players.get(&self.authority.local())
    }

    /// Local player, mutably.
    pub fn local_mut(&mut self) -> Option<&mut PlayerState> {
        let id = self.authority.local();
        self.players.get_mut(&id)
    }

    /// Local player or an error.
    pub fn require_local(&self) -> ActionResult<&PlayerState> {
        let id = self.authority.local();
        self.players.get(&id).ok_or(ActionError::UnknownPlayer(id))
    }

    /// Team currently carrying the bomb.
    pub fn attackers(&self) -> Team {
        self.round.attackers(&self.config.rules)
    }

    /// Living members of a team.
    pub fn alive_count(&self, team: Team) -> usize {
        self.players.values().filter(|p| p.team == team && p.alive).count()
    }

    /// Movement is allowed only while waiting or during live play.
    pub fn movement_locked(&self) -> bool {
        !matches!(self.round.phase, RoundPhase::Waiting | RoundPhase::Active)
    }

    /// Recompute `has_bomb` on every player from the bomb record.
    pub fn refresh_bomb_flags(&mut self) {
        let carrier = self.bomb.state.carrier();
        for player in self.players.values_mut() {
            player.has_bomb = carrier == Some(player.id);
        }
    }

    /// Mark the local record for publication on the next flush.
    pub fn mark_local_dirty(&mut self) {
        self.local_dirty = true;
    }

    /// Mark a position/aim change; published at the position cadence.
    pub fn mark_position_dirty(&mut self) {
        self.position_dirty = true;
    }

    /// Queue the local snapshot if anything changed and the cadence allows.
    pub fn flush_local(&mut self, now: Millis) {
        let position_due = self.position_dirty
            && now.saturating_sub(self.last_publish) >= self.config.sync.position_interval_ms;
        if !self.local_dirty && !position_due {
            return;
        }

        let id = self.authority.local();
        let Some(local) = self.players.get_mut(&id) else {
            return;
        };
        local.seq += 1;
        let snapshot = local.snapshot();

        self.pending_outbound.push(Outbound::Player(snapshot));
        self.local_dirty = false;
        self.position_dirty = false;
        self.last_publish = now;
    }

    /// Queue a store write.
    pub fn queue(&mut self, outbound: Outbound) {
        self.pending_outbound.push(outbound);
    }

    /// Take queued store writes.
    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.pending_outbound)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }

    /// Take pending events (consumes them), in processing order.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        let mut events = std::mem::take(&mut self.pending_events);
        events.sort();
        events
    }

    /// Fingerprint of the replicated state: round, bomb and player records.
    pub fn compute_hash(&self) -> StateHash {
        compute_room_hash(self.round.number, |hasher| {
            self.round.hash_into(hasher);
            self.bomb.hash_into(hasher);
            for player in self.players.values() {
                player.hash_into(hasher);
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn player(team: Team) -> PlayerState {
        PlayerState::new(PlayerId::random(), "p", team, &GameConfig::default())
    }

    #[test]
    fn test_player_id_ordering_and_serde() {
        let id1 = PlayerId::new([0; 16]);
        let id2 = PlayerId::new([1; 16]);
        assert!(id1 < id2);

        let json = serde_json::to_string(&id2).unwrap();
        assert_eq!(json, "\"01010101-0101-0101-0101-010101010101\"");
        let back: PlayerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id2);
        assert!(serde_json::from_str::<PlayerId>("\"nope\"").is_err());
    }

    #[test]
    fn test_team_balance() {
        assert_eq!(Team::balance(&[]), Team::A);
        assert_eq!(Team::balance(&[Team::A]), Team::B);
        assert_eq!(Team::balance(&[Team::A, Team::B]), Team::A);
        assert_eq!(Team::balance(&[Team::B, Team::B, Team::A]), Team::A);
    }

    #[test]
    fn test_death_is_applied_once() {
        let mut p = player(Team::A);
        let killer = PlayerId::random();

        let first = p.take_damage(60.0, Some(killer), 2);
        assert_eq!(first, DamageOutcome { applied: 60.0, killed: false });

        let second = p.take_damage(60.0, Some(killer), 2);
        assert!(second.killed);
        assert_eq!(second.applied, 40.0);
        assert_eq!(p.health, 0.0);
        assert!(!p.alive);
        assert_eq!(p.killed_by, Some(killer));
        assert_eq!(p.death_round, Some(2));

        let third = p.take_damage(60.0, None, 2);
        assert_eq!(third, DamageOutcome { applied: 0.0, killed: false });
        assert_eq!(p.killed_by, Some(killer));
    }

    #[test]
    fn test_give_weapon_replaces_same_slot() {
        let mut p = player(Team::A);
        assert_eq!(p.give_weapon(WeaponKind::Smg), None);
        assert_eq!(p.weapons.len(), 2);
        assert_eq!(p.active_weapon().map(Weapon::kind), Some(WeaponKind::Smg));
        assert_eq!(p.weapons[1].kind(), WeaponKind::StarterPistol);

        assert_eq!(p.give_weapon(WeaponKind::AssaultRifle), Some(WeaponKind::Smg));
        assert_eq!(p.weapons.len(), 2);
        assert_eq!(p.active_weapon, 0);

        assert_eq!(p.give_weapon(WeaponKind::HeavyPistol), Some(WeaponKind::StarterPistol));
        assert_eq!(p.active_weapon, 1);
        assert!(p.switch_weapon(2).is_err());
        assert!(p.switch_weapon(0).is_ok());
    }

    #[test]
    fn test_reset_for_round_keeps_survivor_equipment() {
        let mut survivor = player(Team::A);
        survivor.give_weapon(WeaponKind::Shotgun);
        survivor.take_damage(30.0, None, 1);
        survivor.reset_for_round(Vec2::new(10.0, 10.0));
        assert_eq!(survivor.health, 100.0);
        assert_eq!(survivor.weapons[0].kind(), WeaponKind::Shotgun);

        let mut fallen = player(Team::B);
        fallen.give_weapon(WeaponKind::Shotgun);
        fallen.take_damage(500.0, None, 1);
        fallen.reset_for_round(Vec2::new(10.0, 10.0));
        assert!(fallen.alive);
        assert_eq!(fallen.weapons.len(), 1);
        assert_eq!(fallen.weapons[0].kind(), WeaponKind::StarterPistol);
        assert_eq!(fallen.death_round, None);
    }

    #[test]
    fn test_snapshot_rebuilds_mirror() {
        let config = GameConfig::default();
        let mut owner = player(Team::B);
        owner.give_weapon(WeaponKind::SniperRifle);
        owner.active_weapon_mut().unwrap().fire(0).unwrap();
        owner.position = Vec2::new(64.0, 96.0);
        owner.seq = 4;

        let mirror = PlayerState::from_snapshot(&owner.snapshot(), &config);
        assert_eq!(mirror.snapshot(), owner.snapshot());
        assert_eq!(mirror.active_weapon().unwrap().current_ammo(), 4);
    }

    #[test]
    fn test_prediction_cleared_when_confirmed() {
        let config = GameConfig::default();
        let owner = player(Team::B);
        let mut mirror = PlayerState::from_snapshot(&owner.snapshot(), &config);

        mirror.prediction = Some(HealthPrediction { health: 75.0, until: 500 });
        assert_eq!(mirror.displayed_health(100), 75.0);
        assert_eq!(mirror.displayed_health(500), 100.0);

        let mut confirmed = owner.snapshot();
        confirmed.health = 75.0;
        confirmed.seq = 1;
        mirror.overwrite_from(&confirmed);
        assert!(mirror.prediction.is_none());
    }
}
