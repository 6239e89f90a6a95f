//! Bombsite
//!
//! `bombsite serve` runs the store relay that remote participants connect
//! to. `bombsite demo` plays a scripted two-player match in-process and
//! checks that both participants end with the same replicated state.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bombsite::{
    config::{GameConfig, RelayConfig},
    core::clock::{Clock, ManualClock, SystemClock},
    game::{
        events::{GameEvent, GameEventData},
        input::Intent,
        map::{MapView, TileMap},
        round::RoundPhase,
    },
    network::{memory::MemoryConnection, MemoryStore, RelayServer, RoomSession},
    PlayerId, Vec2, TICK_RATE, VERSION,
};

/// Demo stops after this much game time even without a match winner.
const DEMO_LIMIT_MS: u64 = 30 * 60 * 1_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Bombsite v{}", VERSION);
    let config = RelayConfig::from_env()?;

    match std::env::args().nth(1).as_deref() {
        Some("serve") | None => serve(config).await,
        Some("demo") => demo(config.game_config()?).await,
        Some(other) => anyhow::bail!("unknown command {other:?}; expected `serve` or `demo`"),
    }
}

async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let server = Arc::new(RelayServer::new(config));
    let running = server.clone();
    let handle = tokio::spawn(async move { running.run().await });

    tokio::select! {
        result = handle => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            server.shutdown();
        }
    }
    Ok(())
}

type DemoSession = RoomSession<MemoryConnection>;

async fn demo(config: GameConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let clock = ManualClock::new(SystemClock.now_ms());
    let store = MemoryStore::new(Arc::new(clock.clone()));
    let grid = TileMap::training_ground()?;
    let site = grid.objective_center().context("map has no bombsite")?;
    let map: Arc<dyn MapView> = Arc::new(grid);

    let mut alpha: DemoSession =
        RoomSession::create(store.connect(), map.clone(), "demo", PlayerId::random(), "alpha", config.clone())
            .await?;
    let mut bravo: DemoSession =
        RoomSession::join(store.connect(), map, "demo", PlayerId::random(), "bravo", config).await?;

    alpha.start_match()?;

    let frame_ms = u64::from(1_000 / TICK_RATE);
    let mut elapsed = 0;
    while elapsed < DEMO_LIMIT_MS {
        clock.advance(frame_ms);
        elapsed += frame_ms;

        for (name, session) in [("alpha", &mut alpha), ("bravo", &mut bravo)] {
            steer(session, site);
            for event in session.tick() {
                log_event(name, &event);
            }
        }

        if alpha.state().round.phase == RoundPhase::MatchOver && bravo.state().round.phase == RoundPhase::MatchOver {
            break;
        }
    }

    // Let the last writes land
    for _ in 0..4 {
        clock.advance(frame_ms);
        alpha.tick();
        bravo.tick();
    }

    info!("=== Match Results ===");
    let round = &alpha.state().round;
    info!(score_a = round.score.a, score_b = round.score.b, rounds = round.history.len(), winner = ?round.match_winner, "Final score");

    let (a, b) = (alpha.fingerprint(), bravo.fingerprint());
    info!("alpha state hash: {}", hex::encode(a));
    info!("bravo state hash: {}", hex::encode(b));
    if a == b {
        info!("Replicas converged");
    } else {
        anyhow::bail!("replicas diverged");
    }

    bravo.leave()?;
    alpha.leave()?;
    Ok(())
}

/// Scripted player: attackers carry the bomb to the site and plant,
/// everyone else walks at the nearest enemy and shoots when close.
fn steer(session: &mut DemoSession, site: Vec2) {
    let state = session.state();
    let Some(me) = state.local() else { return };
    if !me.alive || state.round.phase != RoundPhase::Active {
        session.submit(Intent::Move { direction: Vec2::ZERO });
        return;
    }

    let enemy = state
        .players
        .values()
        .filter(|p| p.team != me.team && p.alive)
        .min_by(|x, y| x.position.distance(me.position).total_cmp(&y.position.distance(me.position)))
        .map(|p| p.position);

    let (goal, interact) = if me.has_bomb {
        (site, state.bomb.state.is_planted() || state.hold.is_some() || map_reached(me.position, site))
    } else if let (true, Some(bomb)) = (me.team != state.attackers(), state.bomb.state.position()) {
        (bomb, state.bomb.state.is_planted() && me.position.distance(bomb) < 40.0)
    } else {
        (enemy.unwrap_or(site), false)
    };

    let mut intents = vec![Intent::Interact { held: interact }];
    if let Some(target) = enemy {
        intents.push(Intent::Aim { angle: target.sub(me.position).angle() });
        let close = target.distance(me.position) < 250.0;
        intents.push(Intent::Fire { held: close && !interact });
        if me.active_weapon().is_some_and(|w| w.current_ammo() == 0) {
            intents.push(Intent::Reload);
        }
    }
    let direction = if interact { Vec2::ZERO } else { goal.sub(me.position).normalize() };
    intents.push(Intent::Move { direction });

    for intent in intents {
        session.submit(intent);
    }
}

fn map_reached(at: Vec2, site: Vec2) -> bool {
    at.distance(site) < 24.0
}

fn log_event(who: &str, event: &GameEvent) {
    match &event.data {
        GameEventData::PhaseChanged { round, new_phase, .. } => {
            info!(who, round, phase = %new_phase, "Phase");
        }
        GameEventData::RoundEnded { result } => {
            info!(who, round = result.round, winner = ?result.winner, condition = ?result.condition, "Round ended");
        }
        GameEventData::PlayerKilled { .. }
        | GameEventData::BombPlanted { .. }
        | GameEventData::BombDefused { .. }
        | GameEventData::BombExploded { .. }
        | GameEventData::MatchOver { .. } => {
            info!(who, event = ?event.data, "Event");
        }
        _ => {}
    }
}
