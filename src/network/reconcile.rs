//! Reconciliation
//!
//! Folds store notifications into a [`RoomState`]. Every handler compares
//! against what is already known before it mutates, so a notification
//! applied twice, or a stale one applied after a newer one, leaves the
//! state exactly as the newest one alone would.
//!
//! | Path          | Rule                                                   |
//! |---------------|--------------------------------------------------------|
//! | `meta`        | removal or `closed` flag closes the room               |
//! | `players/*`   | mirrors take strictly newer `seq`; own echo ignored    |
//! | `round`       | adopted by (number, phase, results), then deadline     |
//! | `bomb`        | adopted by (round, state rank, seq, writer)            |
//! | `damage/*`    | consumed once, by the target only, for the live round  |

use tracing::{debug, info, warn};

use crate::core::clock::Millis;
use crate::game::bomb::{BombAdoption, BombRecord};
use crate::game::combat::DamageEvent;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::map::MapView;
use crate::game::phase;
use crate::game::round::{Adoption, RoundState};
use crate::game::state::{Outbound, PlayerId, PlayerSnapshot, PlayerState, RoomState};
use crate::network::session::RoomMeta;
use crate::network::store::{decode, Notification};

/// Which room path a notification came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// `meta` (value)
    Meta,
    /// `players` (children)
    Players,
    /// `round` (value)
    Round,
    /// `bomb` (value)
    Bomb,
    /// `damage` (children)
    Damage,
}

/// Apply one notification.
pub fn apply(state: &mut RoomState, map: &dyn MapView, now: Millis, channel: Channel, notification: Notification) {
    match (channel, notification) {
        (Channel::Meta, Notification::Value { value: None, .. }) => close(state, now),
        (Channel::Meta, Notification::Value { value: Some(value), .. }) => match decode::<RoomMeta>(&value) {
            Ok(meta) if meta.closed => close(state, now),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Undecodable room meta"),
        },

        (Channel::Players, Notification::ChildAdded { key, value, .. })
        | (Channel::Players, Notification::ChildChanged { key, value, .. }) => {
            match decode::<PlayerSnapshot>(&value) {
                Ok(snapshot) => apply_player(state, now, snapshot),
                Err(e) => warn!(%key, error = %e, "Undecodable player record"),
            }
        }
        (Channel::Players, Notification::ChildRemoved { key, .. }) => match PlayerId::from_uuid_str(&key) {
            Some(id) => remove_player(state, map, now, id),
            None => warn!(%key, "Removed player key is not an id"),
        },

        (Channel::Round, Notification::Value { value: Some(value), .. }) => match decode::<RoundState>(&value) {
            Ok(round) => apply_round(state, map, now, round),
            Err(e) => warn!(error = %e, "Undecodable round record"),
        },

        (Channel::Bomb, Notification::Value { value: Some(value), .. }) => match decode::<BombRecord>(&value) {
            Ok(bomb) => apply_bomb(state, map, now, bomb),
            Err(e) => warn!(error = %e, "Undecodable bomb record"),
        },

        (Channel::Damage, Notification::ChildAdded { key, value, .. }) => match decode::<DamageEvent>(&value) {
            Ok(event) => apply_damage(state, map, now, &key, event),
            Err(e) => warn!(%key, error = %e, "Undecodable damage event"),
        },

        (channel, notification) => {
            debug!(?channel, path = notification.path(), "Notification ignored");
        }
    }
}

/// Mirror a remote player's record.
pub fn apply_player(state: &mut RoomState, now: Millis, snapshot: PlayerSnapshot) {
    let id = snapshot.id;
    if id == state.local_id() {
        return;
    }

    match state.players.get_mut(&id) {
        Some(mirror) => {
            if snapshot.seq <= mirror.seq {
                debug!(player = %id.short(), seq = snapshot.seq, known = mirror.seq, "Stale player record");
                return;
            }
            let was_alive = mirror.alive;
            mirror.overwrite_from(&snapshot);
            phase::on_mirror_updated(state, id, was_alive, now);
        }
        None => {
            let mirror = PlayerState::from_snapshot(&snapshot, &state.config);
            info!(room = %state.room_id, player = %id.short(), team = %mirror.team, "Player joined");
            state.push_event(GameEvent::new(
                now,
                GameEventData::PlayerJoined {
                    player_id: id,
                    team: mirror.team,
                },
            ));
            state.players.insert(id, mirror);
            phase::on_mirror_updated(state, id, true, now);
        }
    }
    state.refresh_bomb_flags();
}

/// Forget a remote player whose record was deleted.
pub fn remove_player(state: &mut RoomState, map: &dyn MapView, now: Millis, id: PlayerId) {
    if id == state.local_id() {
        debug!(player = %id.short(), "Own record removed");
        return;
    }
    info!(room = %state.room_id, player = %id.short(), "Player left");
    phase::on_player_removed(state, map, now, id);
}

/// Adopt the host's round record if it is newer than the known one.
pub fn apply_round(state: &mut RoomState, map: &dyn MapView, now: Millis, incoming: RoundState) {
    let number = incoming.number;
    let phase = incoming.phase;
    match state.round.adopt(incoming) {
        Adoption::Applied { prev_phase, prev_number } => {
            phase::on_round_changed(state, map, now, prev_phase, prev_number);
        }
        Adoption::Duplicate => debug!(round = number, %phase, "Duplicate round record"),
        Adoption::Stale => debug!(round = number, %phase, known = state.round.number, "Stale round record"),
    }
}

/// Adopt a bomb record if it is newer than the known one.
pub fn apply_bomb(state: &mut RoomState, map: &dyn MapView, now: Millis, incoming: BombRecord) {
    let (round, seq) = (incoming.round, incoming.seq);
    match state.bomb.adopt(incoming) {
        BombAdoption::Applied(prev) => phase::on_bomb_changed(state, map, now, &prev),
        BombAdoption::Duplicate => debug!(round, seq, "Duplicate bomb record"),
        BombAdoption::Stale => debug!(round, seq, "Stale bomb record"),
    }
}

/// Consume a damage event aimed at the local player.
pub fn apply_damage(state: &mut RoomState, map: &dyn MapView, now: Millis, key: &str, event: DamageEvent) {
    let local_id = state.local_id();
    if event.target != local_id {
        return;
    }
    if state.consumed_damage.insert(key.to_string(), event.round).is_some() {
        debug!(%key, "Duplicate damage event");
        return;
    }
    state.queue(Outbound::AckDamage(key.to_string()));

    let round = state.round.number;
    if event.round != round {
        debug!(%key, event_round = event.round, round, "Damage from another round");
        return;
    }

    let Some(local) = state.local_mut() else {
        warn!(%key, "Damage for missing local player");
        return;
    };
    let outcome = local.take_damage(event.damage, Some(event.shooter), round);
    if outcome.applied <= 0.0 {
        return;
    }
    let health = local.health;

    state.push_event(GameEvent::new(
        now,
        GameEventData::PlayerDamaged {
            victim_id: local_id,
            attacker_id: event.shooter,
            amount: outcome.applied,
            health,
        },
    ));
    state.mark_local_dirty();

    if outcome.killed {
        phase::on_local_death(state, map, now, Some(event.shooter), Some(event.weapon));
    }
}

fn close(state: &mut RoomState, now: Millis) {
    if state.closed {
        return;
    }
    state.closed = true;
    info!(room = %state.room_id, "Room closed");
    state.push_event(GameEvent::new(now, GameEventData::RoomClosed));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::authority::Authority;
    use crate::game::bomb::BombState;
    use crate::game::map::TileMap;
    use crate::game::round::RoundPhase;
    use crate::game::state::Team;
    use crate::game::weapon::WeaponKind;
    use crate::network::store::encode;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const HOST: PlayerId = PlayerId::new([1; 16]);
    const GUEST: PlayerId = PlayerId::new([2; 16]);

    fn room(local: PlayerId, team: Team) -> RoomState {
        let config = GameConfig::default();
        let player = PlayerState::new(local, "p", team, &config);
        RoomState::new("room", player, Authority::new(local, HOST), config)
    }

    /// Round and bomb records the host writes over two rounds.
    fn host_records(map: &TileMap) -> (RoomState, Vec<Outbound>) {
        let mut host = room(HOST, Team::A);
        let config = host.config.clone();
        host.players.insert(GUEST, PlayerState::new(GUEST, "g", Team::B, &config));

        phase::start_match(&mut host, map, 0).unwrap();
        let mut records = host.take_outbound();
        for now in [10_000, 130_000, 135_000, 145_000] {
            phase::run_due_timers(&mut host, map, now);
            records.extend(host.take_outbound());
        }
        records.retain(|o| matches!(o, Outbound::Round(_) | Outbound::Bomb(_)));
        (host, records)
    }

    fn deliver(state: &mut RoomState, map: &TileMap, now: Millis, record: &Outbound) {
        match record {
            Outbound::Round(round) => apply_round(state, map, now, round.clone()),
            Outbound::Bomb(bomb) => apply_bomb(state, map, now, bomb.clone()),
            _ => {}
        }
    }

    fn damage(round: u32, amount: f32) -> DamageEvent {
        DamageEvent {
            target: GUEST,
            shooter: HOST,
            damage: amount,
            weapon: WeaponKind::HeavyPistol,
            round,
            timestamp: 0,
        }
    }

    #[test]
    fn test_round_notification_idempotent() {
        let map = TileMap::training_ground().unwrap();
        let (host, records) = host_records(&map);
        let first = records.iter().find(|r| matches!(r, Outbound::Round(_))).unwrap();

        let mut once = room(GUEST, Team::B);
        deliver(&mut once, &map, 0, first);
        let mut twice = room(GUEST, Team::B);
        deliver(&mut twice, &map, 0, first);
        deliver(&mut twice, &map, 0, first);

        assert_eq!(once.round, twice.round);
        assert_eq!(once.compute_hash(), twice.compute_hash());
        assert_eq!(once.take_events().len(), twice.take_events().len());
        assert_eq!(host.round.number, 2);
    }

    #[test]
    fn test_stale_round_ignored() {
        let map = TileMap::training_ground().unwrap();
        let (host, records) = host_records(&map);
        let mut replica = room(GUEST, Team::B);
        for record in records.iter().rev() {
            deliver(&mut replica, &map, 0, record);
        }
        assert_eq!(replica.round, host.round);
        assert_eq!(replica.round.phase, RoundPhase::Active);
        assert_eq!(replica.round.number, 2);
    }

    #[test]
    fn test_shuffled_delivery_converges() {
        let map = TileMap::training_ground().unwrap();
        let (host, records) = host_records(&map);
        assert!(records.len() >= 7);

        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut shuffled = records.clone();
            shuffled.shuffle(&mut rng);
            // Some records arrive twice
            let dupes: Vec<_> = shuffled.choose_multiple(&mut rng, 3).cloned().collect();
            shuffled.extend(dupes);

            let mut replica = room(GUEST, Team::B);
            for record in &shuffled {
                deliver(&mut replica, &map, 0, record);
            }
            assert_eq!(replica.round, host.round, "seed {seed}");
            assert_eq!(replica.bomb, host.bomb, "seed {seed}");
        }
    }

    #[test]
    fn test_damage_consumed_once() {
        let map = TileMap::training_ground().unwrap();
        let (_, records) = host_records(&map);
        let mut guest = room(GUEST, Team::B);
        for record in &records {
            deliver(&mut guest, &map, 10_000, record);
        }
        guest.take_outbound();
        guest.take_events();

        apply_damage(&mut guest, &map, 150_000, "k1", damage(2, 40.0));
        apply_damage(&mut guest, &map, 150_000, "k1", damage(2, 40.0));
        assert_eq!(guest.local().unwrap().health, 60.0);

        // Previous round: acked, not applied
        apply_damage(&mut guest, &map, 150_000, "k0", damage(1, 40.0));
        assert_eq!(guest.local().unwrap().health, 60.0);

        // Someone else's event: untouched, not acked
        let mut other = damage(2, 40.0);
        other.target = HOST;
        apply_damage(&mut guest, &map, 150_000, "k2", other);

        let acks: Vec<_> = guest
            .take_outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::AckDamage(key) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec!["k1".to_string(), "k0".to_string()]);

        apply_damage(&mut guest, &map, 150_100, "k3", damage(2, 40.0));
        apply_damage(&mut guest, &map, 150_100, "k4", damage(2, 40.0));
        let local = guest.local().unwrap();
        assert!(!local.alive);
        assert_eq!(local.health, 0.0);
        assert_eq!(local.killed_by, Some(HOST));
        let kills = guest
            .take_events()
            .into_iter()
            .filter(|e| matches!(e.data, GameEventData::PlayerKilled { .. }))
            .count();
        assert_eq!(kills, 1);
    }

    #[test]
    fn test_player_records_by_seq() {
        let map = TileMap::training_ground().unwrap();
        let mut host = room(HOST, Team::A);
        let config = GameConfig::default();
        let mut remote = PlayerState::new(GUEST, "g", Team::B, &config);

        remote.seq = 2;
        remote.money = 500;
        let newer = remote.snapshot();
        remote.seq = 1;
        remote.money = 800;
        let older = remote.snapshot();

        let value = encode(&newer).unwrap();
        let notification = Notification::ChildAdded {
            path: "rooms/room/players".into(),
            key: GUEST.to_string(),
            value,
        };
        apply(&mut host, &map, 0, Channel::Players, notification);
        apply_player(&mut host, 0, older);
        assert_eq!(host.players[&GUEST].money, 500);
        assert!(host
            .take_events()
            .iter()
            .any(|e| matches!(e.data, GameEventData::PlayerJoined { team: Team::B, .. })));

        // Own record echoed back is ignored
        let mut echo = host.local().unwrap().snapshot();
        echo.seq = 99;
        echo.money = 1;
        apply_player(&mut host, 0, echo);
        assert_eq!(host.local().unwrap().money, 800);

        apply(
            &mut host,
            &map,
            0,
            Channel::Players,
            Notification::ChildRemoved { path: "rooms/room/players".into(), key: GUEST.to_string() },
        );
        assert!(!host.players.contains_key(&GUEST));
    }

    #[test]
    fn test_meta_removal_closes_room() {
        let map = TileMap::training_ground().unwrap();
        let mut guest = room(GUEST, Team::B);
        let meta = RoomMeta {
            host: HOST,
            created_at: 0,
            closed: false,
        };
        let open = Notification::Value { path: "m".into(), value: Some(encode(&meta).unwrap()) };
        apply(&mut guest, &map, 0, Channel::Meta, open);
        assert!(!guest.closed);

        apply(&mut guest, &map, 5, Channel::Meta, Notification::Value { path: "m".into(), value: None });
        apply(&mut guest, &map, 6, Channel::Meta, Notification::Value { path: "m".into(), value: None });
        assert!(guest.closed);
        let closed = guest
            .take_events()
            .into_iter()
            .filter(|e| matches!(e.data, GameEventData::RoomClosed))
            .count();
        assert_eq!(closed, 1);
    }

    #[test]
    fn test_bomb_record_adopted_from_store() {
        let map = TileMap::training_ground().unwrap();
        let (host, records) = host_records(&map);
        let mut guest = room(GUEST, Team::B);
        for record in &records {
            deliver(&mut guest, &map, 0, record);
        }
        assert!(matches!(guest.bomb.state, BombState::Carried { carrier } if carrier == HOST));
        assert_eq!(guest.bomb, host.bomb);
        assert!(guest.players.get(&HOST).is_none());
    }
}
