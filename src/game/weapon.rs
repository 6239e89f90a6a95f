//! Weapon Model
//!
//! Static catalog entries plus the per-instance firing/reload state machine.
//!
//! ```text
//!            fire (ammo > 0)           cooldown elapsed
//!   Ready ───────────────────▶ Cooldown ─────────────────▶ Ready
//!     │                           │
//!     │ start_reload              │ last round fired, reserve > 0
//!     ▼                           ▼
//!   Reloading ◀───────────────────┘
//!     │ advance(now >= ready_at): move min(needed, reserve) into magazine
//!     ▼
//!   Ready
//! ```
//!
//! Nothing here performs I/O. Reload completion is a logical fire time
//! stored on the instance and advanced by the owner's simulation tick.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;

/// Fraction of base damage dealt at and beyond full range.
pub const DAMAGE_FLOOR: f32 = 0.3;

/// Fraction of range over which full damage applies.
pub const FULL_DAMAGE_FRACTION: f32 = 0.5;

/// Weapon action errors. All of them are rejections with no state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeaponError {
    /// Weapon is mid-reload.
    #[error("weapon is reloading")]
    Reloading,

    /// Magazine is empty.
    #[error("magazine is empty")]
    EmptyMagazine,

    /// Fired too recently.
    #[error("weapon cooling down ({remaining_ms}ms left)")]
    Cooldown {
        /// Time until the next shot is allowed.
        remaining_ms: Millis,
    },

    /// No reserve ammunition to reload from.
    #[error("no reserve ammunition")]
    ReserveEmpty,

    /// Magazine is already full.
    #[error("magazine already full")]
    MagazineFull,
}

// =============================================================================
// CATALOG
// =============================================================================

/// Equipment slot a weapon occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponSlot {
    /// Rifles, SMGs, shotguns.
    Primary,
    /// Pistols.
    Secondary,
}

/// Catalog identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    /// Free sidearm every player spawns with.
    StarterPistol,
    /// Slow, hard-hitting pistol.
    HeavyPistol,
    /// Fast, light pistol.
    QuickPistol,
    /// Automatic rifle.
    AssaultRifle,
    /// Bolt-action rifle.
    SniperRifle,
    /// Automatic SMG.
    Smg,
    /// Compact automatic SMG.
    CompactSmg,
    /// Pump shotgun.
    Shotgun,
    /// Semi-auto shotgun.
    CombatShotgun,
}

/// Static stats for a catalog entry.
#[derive(Clone, Debug, PartialEq)]
pub struct WeaponSpec {
    /// Catalog identifier.
    pub kind: WeaponKind,
    /// Display name.
    pub name: &'static str,
    /// Slot it occupies.
    pub slot: WeaponSlot,
    /// Base damage per pellet.
    pub damage: f32,
    /// Effective range in pixels; also the hit-scan cutoff.
    pub range: f32,
    /// Max angular deviation in radians.
    pub accuracy: f32,
    /// Shots per second.
    pub fire_rate: f32,
    /// Magazine capacity.
    pub magazine_size: u32,
    /// Reserve capacity.
    pub reserve_max: u32,
    /// Reload duration.
    pub reload_ms: Millis,
    /// Purchase price.
    pub cost: u32,
    /// Projectiles per shot.
    pub pellets: u32,
    /// Keeps firing while the trigger is held.
    pub automatic: bool,
}

static CATALOG: [WeaponSpec; 9] = [
    WeaponSpec {
        kind: WeaponKind::StarterPistol,
        name: "Rustler",
        slot: WeaponSlot::Secondary,
        damage: 20.0,
        range: 500.0,
        accuracy: 0.05,
        fire_rate: 2.5,
        magazine_size: 12,
        reserve_max: 36,
        reload_ms: 1_200,
        cost: 0,
        pellets: 1,
        automatic: false,
    },
    WeaponSpec {
        kind: WeaponKind::HeavyPistol,
        name: "Hand Cannon",
        slot: WeaponSlot::Secondary,
        damage: 40.0,
        range: 400.0,
        accuracy: 0.07,
        fire_rate: 1.5,
        magazine_size: 8,
        reserve_max: 24,
        reload_ms: 1_400,
        cost: 500,
        pellets: 1,
        automatic: false,
    },
    WeaponSpec {
        kind: WeaponKind::QuickPistol,
        name: "Bullet Bee",
        slot: WeaponSlot::Secondary,
        damage: 15.0,
        range: 350.0,
        accuracy: 0.06,
        fire_rate: 5.0,
        magazine_size: 20,
        reserve_max: 60,
        reload_ms: 1_000,
        cost: 400,
        pellets: 1,
        automatic: false,
    },
    WeaponSpec {
        kind: WeaponKind::AssaultRifle,
        name: "Recoiler",
        slot: WeaponSlot::Primary,
        damage: 25.0,
        range: 800.0,
        accuracy: 0.04,
        fire_rate: 8.0,
        magazine_size: 30,
        reserve_max: 90,
        reload_ms: 2_000,
        cost: 2_700,
        pellets: 1,
        automatic: true,
    },
    WeaponSpec {
        kind: WeaponKind::SniperRifle,
        name: "Long Goodbye",
        slot: WeaponSlot::Primary,
        damage: 100.0,
        range: 1_500.0,
        accuracy: 0.01,
        fire_rate: 0.8,
        magazine_size: 5,
        reserve_max: 15,
        reload_ms: 3_000,
        cost: 4_750,
        pellets: 1,
        automatic: false,
    },
    WeaponSpec {
        kind: WeaponKind::Smg,
        name: "Buzzsaw",
        slot: WeaponSlot::Primary,
        damage: 15.0,
        range: 500.0,
        accuracy: 0.08,
        fire_rate: 12.0,
        magazine_size: 35,
        reserve_max: 105,
        reload_ms: 1_800,
        cost: 1_500,
        pellets: 1,
        automatic: true,
    },
    WeaponSpec {
        kind: WeaponKind::CompactSmg,
        name: "Pocket Storm",
        slot: WeaponSlot::Primary,
        damage: 12.0,
        range: 400.0,
        accuracy: 0.09,
        fire_rate: 14.0,
        magazine_size: 25,
        reserve_max: 75,
        reload_ms: 1_500,
        cost: 1_200,
        pellets: 1,
        automatic: true,
    },
    WeaponSpec {
        kind: WeaponKind::Shotgun,
        name: "Roomsweeper",
        slot: WeaponSlot::Primary,
        damage: 25.0,
        range: 300.0,
        accuracy: 0.15,
        fire_rate: 1.2,
        magazine_size: 7,
        reserve_max: 21,
        reload_ms: 3_500,
        cost: 2_000,
        pellets: 8,
        automatic: false,
    },
    WeaponSpec {
        kind: WeaponKind::CombatShotgun,
        name: "Quick Spread",
        slot: WeaponSlot::Primary,
        damage: 20.0,
        range: 250.0,
        accuracy: 0.12,
        fire_rate: 2.0,
        magazine_size: 8,
        reserve_max: 32,
        reload_ms: 2_500,
        cost: 1_800,
        pellets: 6,
        automatic: false,
    },
];

impl WeaponKind {
    /// Every catalog entry, in catalog order.
    pub const ALL: [WeaponKind; 9] = [
        WeaponKind::StarterPistol,
        WeaponKind::HeavyPistol,
        WeaponKind::QuickPistol,
        WeaponKind::AssaultRifle,
        WeaponKind::SniperRifle,
        WeaponKind::Smg,
        WeaponKind::CompactSmg,
        WeaponKind::Shotgun,
        WeaponKind::CombatShotgun,
    ];

    /// Static stats.
    pub fn spec(self) -> &'static WeaponSpec {
        &CATALOG[self as usize]
    }

    /// Catalog id string.
    pub fn id(self) -> &'static str {
        match self {
            WeaponKind::StarterPistol => "starter_pistol",
            WeaponKind::HeavyPistol => "heavy_pistol",
            WeaponKind::QuickPistol => "quick_pistol",
            WeaponKind::AssaultRifle => "assault_rifle",
            WeaponKind::SniperRifle => "sniper_rifle",
            WeaponKind::Smg => "smg",
            WeaponKind::CompactSmg => "compact_smg",
            WeaponKind::Shotgun => "shotgun",
            WeaponKind::CombatShotgun => "combat_shotgun",
        }
    }

    /// Case-insensitive lookup by id.
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id().eq_ignore_ascii_case(id))
    }

    /// Lookup by id, falling back to the starter pistol.
    pub fn from_id_or_default(id: &str) -> Self {
        Self::parse(id).unwrap_or(WeaponKind::StarterPistol)
    }
}

impl fmt::Display for WeaponKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().name)
    }
}

impl WeaponSpec {
    /// Minimum spacing between shots.
    #[inline]
    pub fn fire_interval_ms(&self) -> f32 {
        1000.0 / self.fire_rate
    }

    /// Damage dealt by one pellet that traveled `distance`.
    ///
    /// Full damage up to half range, then linear falloff to the floor at
    /// full range, then the floor. Never zero.
    pub fn damage_at(&self, distance: f32) -> f32 {
        let full = self.range * FULL_DAMAGE_FRACTION;
        let floor = self.damage * DAMAGE_FLOOR;

        if distance <= full {
            self.damage
        } else if distance < self.range {
            let t = (distance - full) / (self.range - full);
            self.damage - t * (self.damage - floor)
        } else {
            floor
        }
    }
}

// =============================================================================
// RUNTIME STATE
// =============================================================================

/// Counters replicated for each held weapon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponRecord {
    /// Catalog id.
    pub id: WeaponKind,
    /// Rounds in the magazine.
    pub current_ammo: u32,
    /// Rounds in reserve.
    pub reserve_ammo: u32,
    /// Mid-reload.
    pub is_reloading: bool,
}

/// Result of a successful trigger pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FireOutcome {
    /// Pellets to resolve for this shot.
    pub pellets: u32,
    /// The shot emptied the magazine and a reload started.
    pub auto_reload: bool,
}

/// A held weapon.
#[derive(Clone, Debug, PartialEq)]
pub struct Weapon {
    kind: WeaponKind,
    current_ammo: u32,
    reserve_ammo: u32,
    last_fired: Option<Millis>,
    reload_ready_at: Option<Millis>,
    /// Mirrors rebuilt from a record know a reload is in progress but not when it ends.
    remote_reloading: bool,
}

impl Weapon {
    /// Fresh weapon with full magazine and reserve.
    pub fn new(kind: WeaponKind) -> Self {
        let spec = kind.spec();
        Self {
            kind,
            current_ammo: spec.magazine_size,
            reserve_ammo: spec.reserve_max,
            last_fired: None,
            reload_ready_at: None,
            remote_reloading: false,
        }
    }

    /// Rebuild a weapon from replicated counters, clamped to catalog bounds.
    pub fn from_record(record: &WeaponRecord) -> Self {
        let spec = record.id.spec();
        Self {
            kind: record.id,
            current_ammo: record.current_ammo.min(spec.magazine_size),
            reserve_ammo: record.reserve_ammo.min(spec.reserve_max),
            last_fired: None,
            reload_ready_at: None,
            remote_reloading: record.is_reloading,
        }
    }

    /// Counters to replicate.
    pub fn to_record(&self) -> WeaponRecord {
        WeaponRecord {
            id: self.kind,
            current_ammo: self.current_ammo,
            reserve_ammo: self.reserve_ammo,
            is_reloading: self.is_reloading(),
        }
    }

    /// Catalog id.
    pub fn kind(&self) -> WeaponKind {
        self.kind
    }

    /// Static stats.
    pub fn spec(&self) -> &'static WeaponSpec {
        self.kind.spec()
    }

    /// Rounds in the magazine.
    pub fn current_ammo(&self) -> u32 {
        self.current_ammo
    }

    /// Rounds in reserve.
    pub fn reserve_ammo(&self) -> u32 {
        self.reserve_ammo
    }

    /// Timestamp of the last shot.
    pub fn last_fired(&self) -> Option<Millis> {
        self.last_fired
    }

    /// When the running reload completes.
    pub fn reload_ready_at(&self) -> Option<Millis> {
        self.reload_ready_at
    }

    /// Mid-reload.
    pub fn is_reloading(&self) -> bool {
        self.reload_ready_at.is_some() || self.remote_reloading
    }

    /// Check whether a shot is allowed at `now`.
    pub fn check_fire(&self, now: Millis) -> Result<(), WeaponError> {
        if self.is_reloading() {
            return Err(WeaponError::Reloading);
        }
        if self.current_ammo == 0 {
            return Err(WeaponError::EmptyMagazine);
        }
        if let Some(last) = self.last_fired {
            let interval = self.spec().fire_interval_ms();
            let elapsed = now.saturating_sub(last) as f32;
            if elapsed < interval {
                return Err(WeaponError::Cooldown {
                    remaining_ms: (interval - elapsed).ceil() as Millis,
                });
            }
        }
        Ok(())
    }

    /// True when a shot is allowed at `now`.
    #[inline]
    pub fn can_fire(&self, now: Millis) -> bool {
        self.check_fire(now).is_ok()
    }

    /// Pull the trigger.
    ///
    /// Consumes one round. Emptying the magazine with reserve left starts a
    /// reload immediately.
    pub fn fire(&mut self, now: Millis) -> Result<FireOutcome, WeaponError> {
        self.check_fire(now)?;

        self.current_ammo -= 1;
        self.last_fired = Some(now);

        let auto_reload = self.current_ammo == 0 && self.reserve_ammo > 0;
        if auto_reload {
            self.reload_ready_at = Some(now + self.spec().reload_ms);
        }

        Ok(FireOutcome {
            pellets: self.spec().pellets.max(1),
            auto_reload,
        })
    }

    /// Begin a reload. Returns the completion time.
    pub fn start_reload(&mut self, now: Millis) -> Result<Millis, WeaponError> {
        if self.is_reloading() {
            return Err(WeaponError::Reloading);
        }
        if self.reserve_ammo == 0 {
            return Err(WeaponError::ReserveEmpty);
        }
        if self.current_ammo >= self.spec().magazine_size {
            return Err(WeaponError::MagazineFull);
        }

        let ready_at = now + self.spec().reload_ms;
        self.reload_ready_at = Some(ready_at);
        Ok(ready_at)
    }

    /// Complete a due reload. Returns the number of rounds moved.
    pub fn advance(&mut self, now: Millis) -> Option<u32> {
        match self.reload_ready_at {
            Some(ready_at) if now >= ready_at => Some(self.finish_reload()),
            _ => None,
        }
    }

    /// Move `min(needed, reserve)` rounds into the magazine and clear the
    /// reloading flag.
    pub fn finish_reload(&mut self) -> u32 {
        let needed = self.spec().magazine_size.saturating_sub(self.current_ammo);
        let moved = needed.min(self.reserve_ammo);

        self.current_ammo += moved;
        self.reserve_ammo -= moved;
        self.reload_ready_at = None;
        self.remote_reloading = false;

        moved
    }

    /// Abandon a running reload without moving ammunition.
    pub fn cancel_reload(&mut self) {
        self.reload_ready_at = None;
        self.remote_reloading = false;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_catalog_lookup() {
        assert_eq!(WeaponKind::parse("SNIPER_RIFLE"), Some(WeaponKind::SniperRifle));
        assert_eq!(WeaponKind::parse("Smg"), Some(WeaponKind::Smg));
        assert_eq!(WeaponKind::parse("rocket"), None);
        assert_eq!(WeaponKind::from_id_or_default("rocket"), WeaponKind::StarterPistol);

        for kind in WeaponKind::ALL {
            assert_eq!(kind.spec().kind, kind);
            assert_eq!(WeaponKind::parse(kind.id()), Some(kind));
        }
    }

    #[test]
    fn test_damage_falloff_envelope() {
        let spec = WeaponKind::AssaultRifle.spec();
        let d = spec.damage;
        let r = spec.range;

        assert_eq!(spec.damage_at(0.0), d);
        assert_eq!(spec.damage_at(0.5 * r), d);
        assert!((spec.damage_at(0.75 * r) - 0.65 * d).abs() < 1e-4);
        assert!((spec.damage_at(r) - 0.3 * d).abs() < 1e-4);
        assert!((spec.damage_at(2.0 * r) - 0.3 * d).abs() < 1e-4);
    }

    #[test]
    fn test_fire_respects_cooldown() {
        let mut pistol = Weapon::new(WeaponKind::StarterPistol);
        // 2.5 shots/s -> 400ms spacing
        assert!(pistol.fire(1_000).is_ok());
        assert_eq!(
            pistol.fire(1_100),
            Err(WeaponError::Cooldown { remaining_ms: 300 })
        );
        assert!(pistol.fire(1_400).is_ok());
        assert_eq!(pistol.current_ammo(), 10);
    }

    #[test]
    fn test_empty_magazine_auto_reloads() {
        let mut sniper = Weapon::new(WeaponKind::SniperRifle);
        let mut now = 0;
        for _ in 0..4 {
            sniper.fire(now).unwrap();
            now += 1_250;
        }
        let last = sniper.fire(now).unwrap();
        assert!(last.auto_reload);
        assert!(sniper.is_reloading());
        assert_eq!(sniper.fire(now + 2_000), Err(WeaponError::Reloading));

        assert_eq!(sniper.advance(now + 2_999), None);
        assert_eq!(sniper.advance(now + 3_000), Some(5));
        assert_eq!(sniper.current_ammo(), 5);
        assert_eq!(sniper.reserve_ammo(), 10);
        assert!(!sniper.is_reloading());
    }

    #[test]
    fn test_reload_rejections() {
        let mut rifle = Weapon::new(WeaponKind::AssaultRifle);
        assert_eq!(rifle.start_reload(0), Err(WeaponError::MagazineFull));

        rifle.fire(0).unwrap();
        assert_eq!(rifle.start_reload(10), Ok(2_010));
        assert_eq!(rifle.start_reload(20), Err(WeaponError::Reloading));

        let mut dry = Weapon::from_record(&WeaponRecord {
            id: WeaponKind::AssaultRifle,
            current_ammo: 3,
            reserve_ammo: 0,
            is_reloading: false,
        });
        assert_eq!(dry.start_reload(0), Err(WeaponError::ReserveEmpty));
    }

    #[test]
    fn test_partial_reload_transfers_remaining_reserve() {
        let mut shotgun = Weapon::from_record(&WeaponRecord {
            id: WeaponKind::Shotgun,
            current_ammo: 1,
            reserve_ammo: 4,
            is_reloading: false,
        });
        shotgun.start_reload(0).unwrap();
        assert_eq!(shotgun.advance(3_500), Some(4));
        assert_eq!(shotgun.current_ammo(), 5);
        assert_eq!(shotgun.reserve_ammo(), 0);
    }

    #[test]
    fn test_shotgun_reports_pellets() {
        let mut shotgun = Weapon::new(WeaponKind::Shotgun);
        assert_eq!(shotgun.fire(0).unwrap().pellets, 8);
    }

    #[test]
    fn test_record_is_clamped() {
        let weapon = Weapon::from_record(&WeaponRecord {
            id: WeaponKind::QuickPistol,
            current_ammo: 999,
            reserve_ammo: 999,
            is_reloading: true,
        });
        assert_eq!(weapon.current_ammo(), 20);
        assert_eq!(weapon.reserve_ammo(), 60);
        assert!(weapon.is_reloading());
        assert_eq!(weapon.to_record().current_ammo, 20);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Fire(Millis),
        Reload(Millis),
        Advance(Millis),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..600).prop_map(Op::Fire),
            (0u64..600).prop_map(Op::Reload),
            (0u64..4_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn prop_ammo_stays_in_bounds(kind_idx in 0usize..9, ops in proptest::collection::vec(op_strategy(), 1..200)) {
            let kind = WeaponKind::ALL[kind_idx];
            let spec = kind.spec();
            let mut weapon = Weapon::new(kind);
            let mut now: Millis = 0;

            for op in ops {
                let before_total = weapon.current_ammo() + weapon.reserve_ammo();
                let before_mag = weapon.current_ammo();
                let before_reserve = weapon.reserve_ammo();

                let moved = match op {
                    Op::Fire(dt) => { now += dt; let _ = weapon.fire(now); None }
                    Op::Reload(dt) => { now += dt; let _ = weapon.start_reload(now); None }
                    Op::Advance(dt) => { now += dt; weapon.advance(now) }
                };

                prop_assert!(weapon.current_ammo() <= spec.magazine_size);
                prop_assert!(weapon.reserve_ammo() <= spec.reserve_max);
                prop_assert!(weapon.current_ammo() + weapon.reserve_ammo() <= before_total);

                if let Some(moved) = moved {
                    let expected = (spec.magazine_size - before_mag).min(before_reserve);
                    prop_assert_eq!(moved, expected);
                    prop_assert_eq!(weapon.current_ammo(), before_mag + expected);
                }
            }
        }

        #[test]
        fn prop_damage_never_below_floor(kind_idx in 0usize..9, distance in 0.0f32..5_000.0) {
            let spec = WeaponKind::ALL[kind_idx].spec();
            let dmg = spec.damage_at(distance);
            prop_assert!(dmg <= spec.damage);
            prop_assert!(dmg >= spec.damage * DAMAGE_FLOOR - 1e-4);
        }
    }
}
