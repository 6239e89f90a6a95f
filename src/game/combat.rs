//! Hit Resolution
//!
//! Turns a trigger pull into per-pellet hits. Each pellet gets its own
//! angular deviation and is resolved independently against walls and the
//! hitboxes of every other living player.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;
use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::map::MapView;
use crate::game::raycast::{cast_hitscan, Ray, RayHit};
use crate::game::state::{PlayerId, PlayerState};
use crate::game::weapon::{WeaponKind, WeaponSpec};

pub use crate::game::raycast::Target;

/// Outcome of one pellet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PelletHit {
    /// Angle the pellet actually flew at.
    pub angle: f32,
    /// Where it stopped.
    pub end: Vec2,
    /// Player hit, if any.
    pub victim: Option<PlayerId>,
    /// Distance traveled.
    pub distance: f32,
    /// Damage dealt (0 on a miss).
    pub damage: f32,
}

/// Outcome of one trigger pull.
#[derive(Clone, Debug, PartialEq)]
pub struct ShotReport {
    /// Muzzle position.
    pub origin: Vec2,
    /// One entry per pellet.
    pub pellets: Vec<PelletHit>,
}

impl ShotReport {
    /// Total damage per victim, in ID order.
    pub fn damage_by_victim(&self) -> BTreeMap<PlayerId, f32> {
        let mut totals = BTreeMap::new();
        for pellet in &self.pellets {
            if let Some(victim) = pellet.victim {
                *totals.entry(victim).or_insert(0.0) += pellet.damage;
            }
        }
        totals
    }

    /// Pellet end points, for tracers.
    pub fn endpoints(&self) -> Vec<Vec2> {
        self.pellets.iter().map(|p| p.end).collect()
    }

    /// Pellets that hit a player.
    pub fn hits(&self) -> u32 {
        self.pellets.iter().filter(|p| p.victim.is_some()).count() as u32
    }
}

/// Hitboxes of every living player except the shooter.
pub fn targets_for<'a>(
    players: impl IntoIterator<Item = &'a PlayerState>,
    shooter: PlayerId,
    radius: f32,
) -> Vec<Target> {
    players
        .into_iter()
        .filter(|p| p.id != shooter && p.alive)
        .map(|p| Target {
            id: p.id,
            position: p.position,
            radius,
        })
        .collect()
}

/// Resolve a single pellet flying at `angle`.
pub fn resolve_pellet<M: MapView + ?Sized>(
    map: &M,
    origin: Vec2,
    angle: f32,
    spec: &WeaponSpec,
    targets: &[Target],
) -> PelletHit {
    let ray = Ray::from_angle(origin, angle, spec.range);
    let out = cast_hitscan(map, &ray, targets);

    let victim = match out.hit {
        Some(RayHit::Player(id)) => Some(id),
        _ => None,
    };
    PelletHit {
        angle,
        end: out.point,
        victim,
        distance: out.distance,
        damage: victim.map_or(0.0, |_| spec.damage_at(out.distance)),
    }
}

/// Resolve every pellet of a shot aimed at `aim`, deviating each uniformly
/// within the weapon's accuracy.
pub fn resolve_shot<M: MapView + ?Sized>(
    map: &M,
    origin: Vec2,
    aim: f32,
    spec: &WeaponSpec,
    pellets: u32,
    targets: &[Target],
    rng: &mut DeterministicRng,
) -> ShotReport {
    let pellets = (0..pellets.max(1))
        .map(|_| {
            let angle = aim + rng.next_f32_range(-spec.accuracy, spec.accuracy);
            resolve_pellet(map, origin, angle, spec, targets)
        })
        .collect();

    ShotReport { origin, pellets }
}

// =============================================================================
// STORE RECORDS
// =============================================================================

/// Damage dealt by a shooter, consumed by the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    /// Victim.
    pub target: PlayerId,
    /// Shooter.
    pub shooter: PlayerId,
    /// Health to remove.
    pub damage: f32,
    /// Weapon used.
    pub weapon: WeaponKind,
    /// Round the shot was fired in.
    pub round: u32,
    /// Store time of the shot.
    pub timestamp: Millis,
}

/// Tracer record for remote rendering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShotTrail {
    /// Shooter.
    pub shooter: PlayerId,
    /// Muzzle position.
    pub origin: Vec2,
    /// Pellet end points.
    pub endpoints: Vec<Vec2>,
    /// Store time of the shot.
    pub timestamp: Millis,
}
