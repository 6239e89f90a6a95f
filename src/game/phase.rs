//! Round Driver
//!
//! Reactions to round and bomb record changes, plus the host's timer-driven
//! progression. Every participant runs the same phase-entry effects; each
//! one-time effect is keyed in [`AppliedEffects`](crate::game::round::AppliedEffects)
//! so repeated notifications about the same round change are harmless.
//!
//! Host-only work (phase timers, win polling, bomb assignment, explosion
//! stamping and detonation) goes through [`Authority::host_token`](crate::game::authority::Authority::host_token)
//! and is skipped on replicas.

use tracing::{debug, info, warn};

use crate::core::clock::Millis;
use crate::game::bomb::BombState;
use crate::game::economy;
use crate::game::events::{GameEvent, GameEventData, MoneyReason};
use crate::game::error::{ActionError, ActionResult};
use crate::game::map::MapView;
use crate::game::round::{evaluate_win, RoundEffect, RoundPhase, WinCondition, WinContext};
use crate::game::scheduler::{TimerKind, TimerSlot};
use crate::game::state::{Outbound, PlayerId, PlayerState, RoomState, Team};
use crate::game::weapon::WeaponKind;

// =============================================================================
// HOST COMMANDS
// =============================================================================

/// Leave Waiting and start round 1 (host only).
pub fn start_match(state: &mut RoomState, map: &dyn MapView, now: Millis) -> ActionResult<()> {
    let token = state
        .authority
        .host_token()
        .ok_or(ActionError::NotHost("start the match"))?;

    let (prev_phase, prev_number) = (state.round.phase, state.round.number);
    state.round.start(&token, now, &state.config)?;

    info!(room = %state.room_id, players = state.players.len(), "Match started");
    commit_round(state, map, now, prev_phase, prev_number);
    Ok(())
}

/// Publish the host's round record and run the local reactions to it.
fn commit_round(state: &mut RoomState, map: &dyn MapView, now: Millis, prev_phase: RoundPhase, prev_number: u32) {
    state.queue(Outbound::Round(state.round.clone()));
    on_round_changed(state, map, now, prev_phase, prev_number);
}

/// Fire every timer due at `now`.
pub fn run_due_timers(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    for kind in state.scheduler.pop_due(now) {
        handle_timer(state, map, now, kind);
    }
}

/// Run one scheduled effect.
pub fn handle_timer(state: &mut RoomState, map: &dyn MapView, now: Millis, kind: TimerKind) {
    match kind {
        TimerKind::PhaseAdvance { round, phase } => {
            if round != state.round.number || phase != state.round.phase {
                debug!(round, ?phase, "Ignoring stale phase timer");
                return;
            }
            let Some(token) = state.authority.host_token() else {
                return;
            };
            if phase == RoundPhase::Active {
                // Active ends only through a win condition; the deadline means time expired.
                evaluate_round(state, map, now);
                return;
            }

            let (prev_phase, prev_number) = (state.round.phase, state.round.number);
            match state.round.advance(&token, now, &state.config) {
                Ok(_) => commit_round(state, map, now, prev_phase, prev_number),
                Err(e) => debug!(error = %e, "Phase advance rejected"),
            }
        }
        TimerKind::Explosion { round } => {
            if round != state.round.number {
                debug!(round, "Ignoring stale explosion timer");
                return;
            }
            detonate_if_due(state, map, now);
        }
        TimerKind::WinPoll => {
            if state.round.phase != RoundPhase::Active || !state.authority.is_host() {
                return;
            }
            evaluate_round(state, map, now);
            if state.round.phase == RoundPhase::Active {
                let next = now + state.config.rules.win_check_interval_ms;
                state.scheduler.arm(next, TimerKind::WinPoll);
            }
        }
        TimerKind::ShotExpire { key } => state.queue(Outbound::ExpireShot(key)),
    }
}

/// Check win conditions and record the first satisfied one (host only).
pub fn evaluate_round(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    let Some(token) = state.authority.host_token() else {
        return;
    };

    let verdict = evaluate_win(&WinContext {
        phase: state.round.phase,
        now,
        deadline: state.round.deadline,
        alive_a: state.alive_count(Team::A),
        alive_b: state.alive_count(Team::B),
        attackers: state.attackers(),
        bomb: &state.bomb.state,
    });
    let Some((winner, condition)) = verdict else {
        return;
    };

    if condition == WinCondition::BombExploded && state.bomb.state.is_planted() {
        // Detonation re-enters here once the bomb record says Exploded.
        detonate_if_due(state, map, now);
        return;
    }

    let (prev_phase, prev_number) = (state.round.phase, state.round.number);
    match state.round.record_result(&token, winner, condition, now, &state.config) {
        Ok(result) => {
            info!(
                room = %state.room_id,
                round = result.round,
                winner = %winner,
                ?condition,
                score_a = result.score.a,
                score_b = result.score.b,
                "Round decided"
            );
            commit_round(state, map, now, prev_phase, prev_number);
        }
        Err(e) => debug!(error = %e, "Round result rejected"),
    }
}

/// Explode a planted bomb whose time has come (host only).
fn detonate_if_due(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    let Some(token) = state.authority.host_token() else {
        return;
    };
    let host = state.authority.host_id();
    let prev = state.bomb.state.clone();

    match state.bomb.explode(&token, host, now) {
        Ok(()) => {
            state.queue(Outbound::Bomb(state.bomb.clone()));
            on_bomb_changed(state, map, now, &prev);
        }
        Err(e) => debug!(error = %e, "Detonation skipped"),
    }
}

// =============================================================================
// ROUND RECORD REACTIONS
// =============================================================================

/// React to a change of the local round record, whether written here (host)
/// or adopted from the store (replica).
pub fn on_round_changed(
    state: &mut RoomState,
    map: &dyn MapView,
    now: Millis,
    prev_phase: RoundPhase,
    prev_number: u32,
) {
    let phase = state.round.phase;
    let number = state.round.number;

    if phase != prev_phase || number != prev_number {
        info!(room = %state.room_id, round = number, from = %prev_phase, to = %phase, "Phase changed");
        state.push_event(GameEvent::phase_changed(now, number, prev_phase, phase, state.round.deadline));
    }

    if state.authority.is_host() {
        rearm_phase_timer(state);
    }

    match phase {
        RoundPhase::Waiting => {}
        RoundPhase::Prep => {
            cancel_hold(state);
            enter_round(state, map, now);
        }
        RoundPhase::Active => {
            enter_round(state, map, now);
            if state.authority.is_host() {
                let next = now + state.config.rules.win_check_interval_ms;
                state.scheduler.arm(next, TimerKind::WinPoll);
            }
        }
        RoundPhase::End => {
            cancel_hold(state);
            show_result(state, now);
        }
        RoundPhase::MatchOver => {
            cancel_hold(state);
            show_result(state, now);
            if let Some(winner) = state.round.match_winner {
                if state.effects.apply_once(number, RoundEffect::MatchOverShown) {
                    info!(room = %state.room_id, ?winner, "Match over");
                    state.push_event(GameEvent::new(now, GameEventData::MatchOver { winner }));
                }
            }
            if state.authority.is_host() {
                state.scheduler.cancel(&TimerSlot::Phase);
                state.scheduler.cancel(&TimerSlot::WinPoll);
                state.scheduler.cancel(&TimerSlot::Explosion);
            }
        }
    }
}

/// Arm the phase timer from the replicated deadline, replacing any earlier one.
fn rearm_phase_timer(state: &mut RoomState) {
    let round = state.round.number;
    match (state.round.phase, state.round.deadline) {
        (phase @ (RoundPhase::Prep | RoundPhase::Active | RoundPhase::End), Some(at)) => {
            state.scheduler.arm(at, TimerKind::PhaseAdvance { round, phase });
        }
        _ => {
            state.scheduler.cancel(&TimerSlot::Phase);
        }
    }
}

/// Round-start effects, each applied at most once per round.
fn enter_round(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    let n = state.round.number;
    if n == 0 {
        return;
    }

    if state.bomb.reset_for_round(n) {
        state.refresh_bomb_flags();
        state.scheduler.cancel(&TimerSlot::Explosion);
    }

    let local_id = state.local_id();
    let Some(team) = state.local().map(|p| p.team) else {
        warn!(room = %state.room_id, "Local player missing at round start");
        return;
    };

    if state.effects.apply_once(n, RoundEffect::PlayerReset) {
        state.effects.prune_before(n);
        state.consumed_damage.retain(|_, round| *round >= n);
        let spawn = map.spawn_point(team, &mut state.rng);
        if let Some(local) = state.local_mut() {
            local.reset_for_round(spawn);
        }
        state.hold = None;
        state.controls.release_all();
        state.mark_local_dirty();
        debug!(round = n, %spawn, "Player reset to spawn");
    }

    if state.effects.apply_once(n, RoundEffect::RoundStartMoney) {
        let award = economy::round_start_award(&state.round.history, team, n, &state.config.economy);
        if award > 0 {
            let rules = state.config.economy.clone();
            if let Some(local) = state.local_mut() {
                let added = economy::credit(local, award, &rules);
                let balance = local.money;
                state.push_event(GameEvent::money_changed(
                    now,
                    local_id,
                    added as i64,
                    balance,
                    MoneyReason::RoundStart,
                ));
                state.mark_local_dirty();
            }
        }
    }

    if state.round.phase == RoundPhase::Prep
        && state.authority.is_host()
        && state.effects.apply_once(n, RoundEffect::BombAssigned)
    {
        assign_bomb(state, map, now);
    }
}

/// Give the bomb to a random living member of the attacking team (host only).
fn assign_bomb(state: &mut RoomState, map: &dyn MapView, now: Millis) {
    let Some(token) = state.authority.host_token() else {
        return;
    };
    let attackers = state.attackers();
    let team: Vec<&PlayerState> = state.players.values().filter(|p| p.team == attackers).collect();
    let living: Vec<PlayerId> = team.iter().filter(|p| p.alive).map(|p| p.id).collect();
    // Mirrors may still show last round's deaths until their reset arrives
    let candidates: Vec<PlayerId> = if living.is_empty() {
        team.iter().map(|p| p.id).collect()
    } else {
        living
    };

    let Some(&carrier) = state.rng.choose(&candidates) else {
        debug!(team = %attackers, "No attackers to carry the bomb");
        return;
    };

    let host = state.authority.host_id();
    let prev = state.bomb.state.clone();
    match state.bomb.assign(&token, host, carrier) {
        Ok(()) => {
            info!(room = %state.room_id, round = state.round.number, carrier = %carrier.short(), "Bomb assigned");
            state.queue(Outbound::Bomb(state.bomb.clone()));
            on_bomb_changed(state, map, now, &prev);
        }
        Err(e) => debug!(error = %e, "Bomb assignment rejected"),
    }
}

/// Display the latest round result once.
fn show_result(state: &mut RoomState, now: Millis) {
    let Some(result) = state.round.history.last().cloned() else {
        return;
    };
    if state.effects.apply_once(result.round, RoundEffect::ResultShown) {
        state.push_event(GameEvent::round_ended(now, result));
    }
}

/// Abandon a running plant/defuse hold.
pub fn cancel_hold(state: &mut RoomState) {
    let had_hold = state.hold.take().is_some();
    let flagged = state
        .local()
        .is_some_and(|p| p.is_planting || p.is_defusing || p.action_progress > 0.0);
    if had_hold || flagged {
        if let Some(local) = state.local_mut() {
            local.clear_interaction();
        }
        state.mark_local_dirty();
    }
}

// =============================================================================
// BOMB RECORD REACTIONS
// =============================================================================

/// React to a change of the local bomb record, written here or adopted.
pub fn on_bomb_changed(state: &mut RoomState, map: &dyn MapView, now: Millis, prev: &BombState) {
    state.refresh_bomb_flags();
    let round = state.round.number;
    let host = state.authority.host_id();

    match state.bomb.state.clone() {
        BombState::Dormant => {}
        BombState::Carried { carrier } => {
            let data = if matches!(prev, BombState::Dormant) {
                GameEventData::BombAssigned { carrier }
            } else {
                GameEventData::BombPickedUp { carrier }
            };
            state.push_event(GameEvent::new(now, data));
        }
        BombState::Dropped { position } => {
            state.push_event(GameEvent::new(now, GameEventData::BombDropped { position }));
        }
        BombState::Planted { .. } if state.round.phase != RoundPhase::Active => {
            debug!(round, phase = %state.round.phase, "Plant outside the active phase ignored");
        }
        BombState::Planted { position, planted_by, explode_at, .. } => {
            if !prev.is_planted() {
                info!(room = %state.room_id, round, planter = %planted_by.short(), "Bomb planted");
                state.push_event(GameEvent::new(
                    now,
                    GameEventData::BombPlanted { planted_by, position, explode_at },
                ));
            }
            if let Some(token) = state.authority.host_token() {
                let at = match explode_at {
                    Some(at) => Some(at),
                    None => match state.bomb.stamp_explosion(&token, host, state.config.bomb.explosion_delay_ms) {
                        Ok(at) => {
                            state.queue(Outbound::Bomb(state.bomb.clone()));
                            Some(at)
                        }
                        Err(e) => {
                            debug!(error = %e, "Explosion stamp rejected");
                            None
                        }
                    },
                };
                if let Some(at) = at {
                    state.scheduler.arm(at, TimerKind::Explosion { round });
                }
            }
        }
        BombState::Defused { defused_by, .. } => {
            info!(room = %state.room_id, round, defuser = %defused_by.short(), "Bomb defused");
            state.push_event(GameEvent::new(now, GameEventData::BombDefused { defused_by }));
            state.scheduler.cancel(&TimerSlot::Explosion);
            evaluate_round(state, map, now);
        }
        BombState::Exploded { position, .. } => {
            info!(room = %state.room_id, round, "Bomb exploded");
            state.push_event(GameEvent::new(now, GameEventData::BombExploded { position }));
            state.scheduler.cancel(&TimerSlot::Explosion);
            evaluate_round(state, map, now);
        }
    }

    if !state.bomb.state.is_planted() {
        state.scheduler.cancel(&TimerSlot::Explosion);
    }
}

// =============================================================================
// PLAYER REACTIONS
// =============================================================================

/// The local player just died: drop the bomb, stop interacting, publish.
pub fn on_local_death(
    state: &mut RoomState,
    map: &dyn MapView,
    now: Millis,
    killer: Option<PlayerId>,
    weapon: Option<WeaponKind>,
) {
    let id = state.local_id();
    let position = state.local().map(|p| p.position).unwrap_or_default();

    cancel_hold(state);
    state.controls.release_all();
    state.mark_local_dirty();
    info!(room = %state.room_id, victim = %id.short(), killer = ?killer.map(|k| k.short()), "Player killed");
    state.push_event(GameEvent::player_killed(now, id, killer, weapon));

    if state.bomb.state.carrier() == Some(id) {
        let prev = state.bomb.state.clone();
        match state.bomb.drop_at(id, position) {
            Ok(()) => {
                state.queue(Outbound::Bomb(state.bomb.clone()));
                on_bomb_changed(state, map, now, &prev);
            }
            Err(e) => debug!(error = %e, "Bomb drop on death rejected"),
        }
    }
}

/// A mirror was updated. Reports deaths and credits the local player's kills.
pub fn on_mirror_updated(state: &mut RoomState, id: PlayerId, was_alive: bool, now: Millis) {
    let local_id = state.local_id();
    let round = state.round.number;
    let Some(mirror) = state.players.get(&id) else {
        return;
    };
    let (alive, killed_by, death_round) = (mirror.alive, mirror.killed_by, mirror.death_round);

    if was_alive && !alive {
        state.push_event(GameEvent::player_killed(now, id, killed_by, None));
    }

    if alive || killed_by != Some(local_id) || death_round != Some(round) {
        return;
    }
    if !state.effects.apply_once(round, RoundEffect::KillCredit(id)) {
        return;
    }

    let rules = state.config.economy.clone();
    if let Some(local) = state.local_mut() {
        let added = economy::credit(local, rules.kill_reward, &rules);
        let balance = local.money;
        info!(killer = %local_id.short(), victim = %id.short(), reward = added, "Kill credited");
        state.push_event(GameEvent::money_changed(now, local_id, added as i64, balance, MoneyReason::Kill));
        state.mark_local_dirty();
    }
}

/// A remote player left. The host drops the bomb they were carrying.
pub fn on_player_removed(state: &mut RoomState, map: &dyn MapView, now: Millis, id: PlayerId) {
    let Some(gone) = state.players.remove(&id) else {
        return;
    };
    state.push_event(GameEvent::new(now, GameEventData::PlayerLeft { player_id: id }));

    if state.bomb.state.carrier() != Some(id) {
        return;
    }
    let Some(token) = state.authority.host_token() else {
        return;
    };
    let host = state.authority.host_id();
    let prev = state.bomb.state.clone();
    match state.bomb.abandon(&token, host, gone.position) {
        Ok(()) => {
            state.queue(Outbound::Bomb(state.bomb.clone()));
            on_bomb_changed(state, map, now, &prev);
        }
        Err(e) => debug!(error = %e, "Bomb abandon rejected"),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::authority::Authority;
    use crate::game::map::TileMap;
    use crate::game::round::MatchWinner;
    use crate::game::state::PlayerState;

    const HOST: PlayerId = PlayerId::new([1; 16]);
    const GUEST: PlayerId = PlayerId::new([2; 16]);

    fn host_room() -> (RoomState, TileMap) {
        let config = GameConfig::default();
        let map = TileMap::training_ground().unwrap();
        let local = PlayerState::new(HOST, "host", Team::A, &config);
        let mut state = RoomState::new("room", local, Authority::creator(HOST), config.clone());
        state
            .players
            .insert(GUEST, PlayerState::new(GUEST, "guest", Team::B, &config));
        (state, map)
    }

    fn round_writes(state: &mut RoomState) -> usize {
        state
            .take_outbound()
            .iter()
            .filter(|o| matches!(o, Outbound::Round(_)))
            .count()
    }

    #[test]
    fn test_replica_cannot_start() {
        let config = GameConfig::default();
        let map = TileMap::training_ground().unwrap();
        let local = PlayerState::new(GUEST, "guest", Team::B, &config);
        let mut state = RoomState::new("room", local, Authority::new(GUEST, HOST), config);

        assert_eq!(
            start_match(&mut state, &map, 0),
            Err(ActionError::NotHost("start the match"))
        );
        assert_eq!(state.round.phase, RoundPhase::Waiting);
        assert!(state.take_outbound().is_empty());
    }

    #[test]
    fn test_start_assigns_bomb_and_arms_timer() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 1_000).unwrap();

        assert_eq!(state.round.phase, RoundPhase::Prep);
        assert_eq!(state.scheduler.deadline(&TimerSlot::Phase), Some(11_000));
        // Team A has only the host
        assert_eq!(state.bomb.state.carrier(), Some(HOST));
        assert!(state.local().unwrap().has_bomb);
        assert!(map.is_walkable(state.local().unwrap().position));
        assert_eq!(round_writes(&mut state), 1);
    }

    #[test]
    fn test_timers_drive_phases() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();

        run_due_timers(&mut state, &map, 10_000);
        assert_eq!(state.round.phase, RoundPhase::Active);
        assert_eq!(state.scheduler.deadline(&TimerSlot::WinPoll), Some(10_250));

        // Time runs out with no plant: defenders (B) win
        run_due_timers(&mut state, &map, 130_000);
        assert_eq!(state.round.phase, RoundPhase::End);
        let result = state.round.history.last().unwrap();
        assert_eq!((result.winner, result.condition), (Team::B, WinCondition::TimeExpired));

        run_due_timers(&mut state, &map, 135_000);
        assert_eq!(state.round.phase, RoundPhase::Prep);
        assert_eq!(state.round.number, 2);
    }

    #[test]
    fn test_elimination_detected_by_poll() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();
        run_due_timers(&mut state, &map, 10_000);

        state.players.get_mut(&GUEST).unwrap().take_damage(200.0, Some(HOST), 1);
        run_due_timers(&mut state, &map, 10_250);
        assert_eq!(state.round.phase, RoundPhase::End);
        assert_eq!(state.round.history[0].condition, WinCondition::Elimination);
        assert_eq!(state.round.score.a, 1);

        let ended: Vec<_> = state
            .take_events()
            .into_iter()
            .filter(|e| matches!(e.data, GameEventData::RoundEnded { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
    }

    #[test]
    fn test_round_start_money_applied_once() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();
        assert_eq!(state.local().unwrap().money, 800);

        run_due_timers(&mut state, &map, 10_000);
        run_due_timers(&mut state, &map, 130_000);
        run_due_timers(&mut state, &map, 135_000);
        assert_eq!(state.round.number, 2);
        // Host's team lost round 1: stipend only
        assert_eq!(state.local().unwrap().money, 1_600);

        let (prev_phase, prev_number) = (state.round.phase, state.round.number);
        on_round_changed(&mut state, &map, 135_000, prev_phase, prev_number);
        assert_eq!(state.local().unwrap().money, 1_600);
    }

    #[test]
    fn test_host_stamps_remote_plant_and_detonates() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();
        run_due_timers(&mut state, &map, 10_000);

        let prev = state.bomb.state.clone();
        state.bomb.plant(HOST, map.tile_center(10, 5), 20_000).unwrap();
        on_bomb_changed(&mut state, &map, 20_000, &prev);

        assert_eq!(state.bomb.state.explode_at(), Some(60_000));
        assert_eq!(state.scheduler.deadline(&TimerSlot::Explosion), Some(60_000));

        run_due_timers(&mut state, &map, 60_000);
        assert!(matches!(state.bomb.state, BombState::Exploded { .. }));
        let result = state.round.history.last().unwrap();
        assert_eq!((result.winner, result.condition), (Team::A, WinCondition::BombExploded));
        assert_eq!(state.round.history.len(), 1);
    }

    #[test]
    fn test_stale_phase_timer_ignored() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();
        handle_timer(
            &mut state,
            &map,
            50,
            TimerKind::PhaseAdvance { round: 1, phase: RoundPhase::End },
        );
        assert_eq!(state.round.phase, RoundPhase::Prep);
    }

    #[test]
    fn test_match_over_after_threshold() {
        let (mut state, map) = host_room();
        state.config.rules.rounds_to_win = 1;
        start_match(&mut state, &map, 0).unwrap();
        run_due_timers(&mut state, &map, 10_000);
        run_due_timers(&mut state, &map, 130_000);
        run_due_timers(&mut state, &map, 135_000);

        assert_eq!(state.round.phase, RoundPhase::MatchOver);
        assert_eq!(state.round.match_winner, Some(MatchWinner::Team(Team::B)));
        assert!(state.scheduler.deadline(&TimerSlot::Phase).is_none());
        run_due_timers(&mut state, &map, 1_000_000);
        assert_eq!(state.round.phase, RoundPhase::MatchOver);
    }

    #[test]
    fn test_kill_credit_once() {
        let (mut state, _map) = host_room();
        state.round.number = 1;
        state.round.phase = RoundPhase::Active;

        state.players.get_mut(&GUEST).unwrap().take_damage(200.0, Some(HOST), 1);
        on_mirror_updated(&mut state, GUEST, true, 0);
        on_mirror_updated(&mut state, GUEST, false, 0);
        assert_eq!(state.local().unwrap().money, 1_000);
    }

    #[test]
    fn test_bomb_goes_to_living_attacker() {
        const THIRD: PlayerId = PlayerId::new([3; 16]);
        let (mut state, map) = host_room();
        let config = state.config.clone();
        state.players.get_mut(&HOST).unwrap().team = Team::B;
        state.players.get_mut(&GUEST).unwrap().alive = false;
        state.players.get_mut(&GUEST).unwrap().team = Team::A;
        state.players.insert(THIRD, PlayerState::new(THIRD, "third", Team::A, &config));

        start_match(&mut state, &map, 0).unwrap();
        assert_eq!(state.bomb.state.carrier(), Some(THIRD));
    }

    #[test]
    fn test_bomb_assigned_while_mirrors_show_deaths() {
        let (mut state, map) = host_room();
        state.players.get_mut(&HOST).unwrap().team = Team::B;
        state.players.get_mut(&GUEST).unwrap().team = Team::A;
        state.players.get_mut(&GUEST).unwrap().alive = false;

        start_match(&mut state, &map, 0).unwrap();
        assert_eq!(state.bomb.state.carrier(), Some(GUEST));
    }

    #[test]
    fn test_plant_outside_active_not_armed() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();
        assert_eq!(state.round.phase, RoundPhase::Prep);
        state.take_events();
        state.take_outbound();

        let prev = state.bomb.state.clone();
        state.bomb.plant(HOST, map.tile_center(10, 5), 5_000).unwrap();
        on_bomb_changed(&mut state, &map, 5_000, &prev);

        assert_eq!(state.bomb.state.explode_at(), None);
        assert!(state.scheduler.deadline(&TimerSlot::Explosion).is_none());
        assert!(state.take_outbound().is_empty());
        let planted = state
            .take_events()
            .into_iter()
            .filter(|e| matches!(e.data, GameEventData::BombPlanted { .. }))
            .count();
        assert_eq!(planted, 0);
    }

    #[test]
    fn test_consumed_damage_pruned_on_new_round() {
        let (mut state, map) = host_room();
        start_match(&mut state, &map, 0).unwrap();
        state.consumed_damage.insert("k1".to_string(), 1);

        run_due_timers(&mut state, &map, 10_000);
        run_due_timers(&mut state, &map, 130_000);
        assert!(state.consumed_damage.contains_key("k1"));

        run_due_timers(&mut state, &map, 135_000);
        assert_eq!(state.round.number, 2);
        assert!(state.consumed_damage.is_empty());
    }

    #[test]
    fn test_removed_carrier_drops_bomb() {
        let (mut state, map) = host_room();
        state.players.get_mut(&HOST).unwrap().team = Team::B;
        state.players.get_mut(&GUEST).unwrap().team = Team::A;
        start_match(&mut state, &map, 0).unwrap();
        assert_eq!(state.bomb.state.carrier(), Some(GUEST));

        on_player_removed(&mut state, &map, 10, GUEST);
        assert!(matches!(state.bomb.state, BombState::Dropped { .. }));
        assert!(!state.players.contains_key(&GUEST));
    }
}
