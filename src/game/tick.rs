//! Participant Simulation Tick
//!
//! The periodic local loop. Each tick, in order:
//!
//! 1. fire due scheduled events (phase timers, detonation, win poll)
//! 2. complete due weapon reloads
//! 3. apply queued intents
//! 4. pull the trigger if pressed, or held on an automatic
//! 5. advance a plant/defuse hold, or pick up a dropped bomb
//! 6. move
//! 7. expire shooter-side health predictions
//! 8. queue the local player's record for publication
//!
//! Everything the tick wants written to the store comes back in
//! [`TickResult::outbound`]; nothing here performs I/O.

use tracing::{debug, info};

use crate::core::clock::Millis;
use crate::core::vec2::Vec2;
use crate::game::bomb::{BombState, HoldKind, HoldProgress};
use crate::game::combat::{self, DamageEvent, ShotReport, ShotTrail};
use crate::game::economy;
use crate::game::error::{ActionError, ActionResult};
use crate::game::events::{GameEvent, GameEventData, MoneyReason};
use crate::game::input::Intent;
use crate::game::map::MapView;
use crate::game::phase;
use crate::game::round::RoundPhase;
use crate::game::state::{HealthPrediction, Outbound, PlayerState, RoomState};

/// Longest time step applied to movement in one tick.
const MAX_STEP_MS: Millis = 100;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick (and by notifications since the last one)
    pub events: Vec<GameEvent>,
    /// Store writes to perform
    pub outbound: Vec<Outbound>,
}

/// How the trigger is being worked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Pressed this tick.
    Press,
    /// Held since an earlier tick.
    Hold,
}

/// Run one simulation tick at `now`.
pub fn tick(state: &mut RoomState, map: &dyn MapView, now: Millis, intents: &[Intent]) -> TickResult {
    phase::run_due_timers(state, map, now);
    advance_reloads(state, now);

    for intent in intents {
        if let Err(e) = apply_intent(state, now, *intent) {
            debug!(?intent, error = %e, "Intent rejected");
        }
    }

    let pressed = std::mem::take(&mut state.controls.fire_pressed);
    if pressed || state.controls.fire_held {
        let trigger = if pressed { Trigger::Press } else { Trigger::Hold };
        if let Err(e) = fire(state, map, now, trigger) {
            if pressed {
                debug!(error = %e, "Shot rejected");
            }
        }
    }

    process_interaction(state, map, now);
    process_movement(state, map, now);
    expire_predictions(state, now);

    state.last_tick = Some(now);
    state.flush_local(now);

    TickResult {
        events: state.take_events(),
        outbound: state.take_outbound(),
    }
}

fn alive_local(state: &mut RoomState) -> ActionResult<&mut PlayerState> {
    let id = state.local_id();
    let local = state.local_mut().ok_or(ActionError::UnknownPlayer(id))?;
    if !local.alive {
        return Err(ActionError::Dead);
    }
    Ok(local)
}

fn advance_reloads(state: &mut RoomState, now: Millis) {
    let Some(local) = state.local_mut() else {
        return;
    };
    let mut completed = false;
    for weapon in &mut local.weapons {
        completed |= weapon.advance(now).is_some();
    }
    if completed {
        state.mark_local_dirty();
    }
}

// =============================================================================
// INTENTS
// =============================================================================

/// Apply one intent. Rejections leave state untouched.
pub fn apply_intent(state: &mut RoomState, now: Millis, intent: Intent) -> ActionResult<()> {
    match intent {
        Intent::Aim { angle } => {
            if angle.is_finite() {
                if let Some(local) = state.local_mut() {
                    local.aim = angle;
                }
                state.mark_position_dirty();
            }
        }
        Intent::Move { direction } => {
            let direction = if !direction.is_finite() {
                Vec2::ZERO
            } else if direction.length_squared() > 1.0 {
                direction.normalize()
            } else {
                direction
            };
            state.controls.move_dir = direction;
        }
        Intent::SwitchWeapon { slot } => {
            let local = alive_local(state)?;
            if slot != local.active_weapon {
                if slot >= local.weapons.len() {
                    return Err(ActionError::NoSuchSlot(slot));
                }
                if let Some(current) = local.active_weapon_mut() {
                    current.cancel_reload();
                }
                local.switch_weapon(slot)?;
                state.mark_local_dirty();
            }
        }
        Intent::Fire { held } => {
            state.controls.fire_held = held;
            if held {
                state.controls.fire_pressed = true;
            }
        }
        Intent::Reload => {
            let local = alive_local(state)?;
            let slot = local.active_weapon;
            let weapon = local.active_weapon_mut().ok_or(ActionError::NoSuchSlot(slot))?;
            weapon.start_reload(now)?;
            state.mark_local_dirty();
        }
        Intent::Interact { held } => {
            state.controls.interact_held = held;
        }
        Intent::Buy { weapon } => {
            let phase = state.round.phase;
            let id = state.local_id();
            let local = state.local_mut().ok_or(ActionError::UnknownPlayer(id))?;
            let cost = economy::purchase(local, weapon, phase)?;
            let balance = local.money;

            info!(player = %id.short(), %weapon, cost, "Weapon purchased");
            state.push_event(GameEvent::new(
                now,
                GameEventData::Purchase {
                    player_id: id,
                    weapon,
                    cost,
                },
            ));
            state.push_event(GameEvent::money_changed(
                now,
                id,
                -(cost as i64),
                balance,
                MoneyReason::Purchase,
            ));
            state.mark_local_dirty();
        }
    }
    Ok(())
}

// =============================================================================
// FIRING
// =============================================================================

/// Fire the weapon in hand, resolve every pellet, and queue damage events,
/// the shot trail and the shooter-side health predictions.
pub fn fire(state: &mut RoomState, map: &dyn MapView, now: Millis, trigger: Trigger) -> ActionResult<ShotReport> {
    let phase = state.round.phase;
    if phase != RoundPhase::Active {
        return Err(ActionError::WrongPhase { action: "fire", phase });
    }

    let shooter = state.local_id();
    let local = alive_local(state)?;
    let slot = local.active_weapon;
    let weapon = local.active_weapon_mut().ok_or(ActionError::NoSuchSlot(slot))?;
    if trigger == Trigger::Hold && !weapon.spec().automatic {
        return Err(ActionError::NotAutomatic(weapon.kind()));
    }
    let outcome = weapon.fire(now)?;
    let kind = weapon.kind();
    let (origin, aim) = (local.position, local.aim);

    let targets = combat::targets_for(state.players.values(), shooter, state.config.player.radius());
    let report = combat::resolve_shot(map, origin, aim, kind.spec(), outcome.pellets, &targets, &mut state.rng);

    let round = state.round.number;
    let ttl = state.config.sync.prediction_ttl_ms;
    for (victim, damage) in report.damage_by_victim() {
        if let Some(mirror) = state.players.get_mut(&victim) {
            let base = mirror.displayed_health(now);
            mirror.prediction = Some(HealthPrediction {
                health: (base - damage).max(0.0),
                until: now + ttl,
            });
        }
        state.queue(Outbound::Damage(DamageEvent {
            target: victim,
            shooter,
            damage,
            weapon: kind,
            round,
            timestamp: now,
        }));
    }

    state.queue(Outbound::Shot(ShotTrail {
        shooter,
        origin,
        endpoints: report.endpoints(),
        timestamp: now,
    }));
    state.push_event(GameEvent::new(
        now,
        GameEventData::ShotFired {
            player_id: shooter,
            weapon: kind,
            hits: report.hits(),
        },
    ));
    state.mark_local_dirty();

    Ok(report)
}

// =============================================================================
// INTERACTION
// =============================================================================

fn process_interaction(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    let Some(local) = state.local() else {
        return;
    };
    let (id, team, position, alive) = (local.id, local.team, local.position, local.alive);
    let attackers = state.attackers();

    if !state.controls.interact_held || !alive || state.round.phase != RoundPhase::Active {
        phase::cancel_hold(state);
        return;
    }

    // Picking up is instant
    if team == attackers {
        if let BombState::Dropped { position: at } = state.bomb.state {
            if at.distance(position) <= state.config.bomb.pickup_radius {
                let prev = state.bomb.state.clone();
                match state.bomb.pick_up(id, position, state.config.bomb.pickup_radius) {
                    Ok(()) => {
                        state.queue(Outbound::Bomb(state.bomb.clone()));
                        phase::on_bomb_changed(state, map, now, &prev);
                    }
                    Err(e) => debug!(error = %e, "Pickup rejected"),
                }
                return;
            }
        }
    }

    let defuse_radius = state.config.bomb.defuse_radius;
    let desired = match &state.bomb.state {
        BombState::Carried { carrier } if *carrier == id && team == attackers && map.in_objective_zone(position) => {
            Some(HoldKind::Plant)
        }
        BombState::Planted { position: at, .. } if team != attackers && at.distance(position) <= defuse_radius => {
            Some(HoldKind::Defuse)
        }
        _ => None,
    };
    let Some(kind) = desired else {
        phase::cancel_hold(state);
        return;
    };

    let hold = match state.hold {
        Some(hold) if hold.kind == kind => hold,
        _ => {
            let duration = match kind {
                HoldKind::Plant => state.config.bomb.plant_ms,
                HoldKind::Defuse => state.config.bomb.defuse_ms,
            };
            let hold = HoldProgress { kind, started_at: now, duration };
            state.hold = Some(hold);
            if let Some(local) = state.local_mut() {
                local.is_planting = kind == HoldKind::Plant;
                local.is_defusing = kind == HoldKind::Defuse;
            }
            state.mark_local_dirty();
            hold
        }
    };

    if let Some(local) = state.local_mut() {
        local.action_progress = hold.fraction(now);
    }
    state.mark_position_dirty();

    if !hold.is_complete(now) {
        return;
    }

    state.hold = None;
    if let Some(local) = state.local_mut() {
        local.clear_interaction();
    }
    state.mark_local_dirty();

    let prev = state.bomb.state.clone();
    let done = match kind {
        HoldKind::Plant => state.bomb.plant(id, position, now),
        HoldKind::Defuse => state.bomb.defuse(id, position, now, defuse_radius),
    };
    match done {
        Ok(()) => {
            state.queue(Outbound::Bomb(state.bomb.clone()));
            phase::on_bomb_changed(state, map, now, &prev);
        }
        Err(e) => debug!(error = %e, ?kind, "Hold completion rejected"),
    }
}

// =============================================================================
// MOVEMENT
// =============================================================================

/// All four hitbox corners stand on walkable tiles.
pub fn hitbox_clear(map: &dyn MapView, center: Vec2, radius: f32) -> bool {
    [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)]
        .into_iter()
        .all(|(sx, sy)| map.is_walkable(center + Vec2::new(sx * radius, sy * radius)))
}

fn process_movement(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    let dt = state
        .last_tick
        .map_or(0, |last| now.saturating_sub(last))
        .min(MAX_STEP_MS);
    let dir = state.controls.move_dir;
    if dt == 0 || dir == Vec2::ZERO || state.movement_locked() || state.hold.is_some() {
        return;
    }

    let speed = state.config.player.speed;
    let radius = state.config.player.radius();
    let Some(local) = state.local_mut().filter(|p| p.alive) else {
        return;
    };

    let step = dir * (speed * dt as f32 / 1000.0);
    let from = local.position;
    // Full step, then slide along either axis
    let moved = [from + step, from + Vec2::new(step.x, 0.0), from + Vec2::new(0.0, step.y)]
        .into_iter()
        .find(|to| *to != from && hitbox_clear(map, *to, radius));

    if let Some(to) = moved {
        local.position = to;
        state.mark_position_dirty();
    }
}

fn expire_predictions(state: &mut RoomState, now: Millis) {
    for player in state.players.values_mut() {
        if player.prediction.is_some_and(|p| now >= p.until) {
            player.prediction = None;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
