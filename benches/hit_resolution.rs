//! Hit resolution and tick benchmarks.
//!
//! Run with: `cargo bench`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bombsite::config::GameConfig;
use bombsite::core::{DeterministicRng, Vec2};
use bombsite::game::authority::Authority;
use bombsite::game::combat::{resolve_shot, targets_for};
use bombsite::game::state::{PlayerId, PlayerState, RoomState, Team};
use bombsite::game::tick::tick;
use bombsite::game::{Intent, TileMap, WeaponKind};

fn crowd(config: &GameConfig) -> Vec<PlayerState> {
    (0..10u8)
        .map(|i| {
            let mut p = PlayerState::new(PlayerId::new([i + 1; 16]), "p", Team::B, config);
            p.position = Vec2::new(160.0 + 24.0 * f32::from(i), 240.0);
            p
        })
        .collect()
}

pub fn hit_resolution_benchmark(c: &mut Criterion) {
    let map = TileMap::training_ground().expect("map");
    let config = GameConfig::default();
    let players = crowd(&config);
    let targets = targets_for(&players, PlayerId::new([0; 16]), config.player.radius());
    let mut rng = DeterministicRng::new(7);

    c.bench_function("resolve_rifle_shot", |b| {
        let spec = WeaponKind::AssaultRifle.spec();
        b.iter(|| {
            black_box(resolve_shot(
                &map,
                Vec2::new(48.0, 240.0),
                0.0,
                spec,
                spec.pellets,
                black_box(&targets),
                &mut rng,
            ))
        })
    });

    c.bench_function("resolve_shotgun_blast", |b| {
        let spec = WeaponKind::Shotgun.spec();
        b.iter(|| {
            black_box(resolve_shot(
                &map,
                Vec2::new(48.0, 240.0),
                0.0,
                spec,
                spec.pellets,
                black_box(&targets),
                &mut rng,
            ))
        })
    });
}

pub fn tick_benchmark(c: &mut Criterion) {
    let map = TileMap::training_ground().expect("map");
    let config = GameConfig::default();
    let local = PlayerId::new([0; 16]);
    let mut state = RoomState::new(
        "bench",
        PlayerState::new(local, "host", Team::A, &config),
        Authority::creator(local),
        config.clone(),
    );
    for p in crowd(&config) {
        state.players.insert(p.id, p);
    }

    let mut now = 1_000_000;
    c.bench_function("idle_tick", |b| {
        b.iter(|| {
            now += 16;
            black_box(tick(&mut state, &map, now, &[Intent::Aim { angle: 0.5 }]))
        })
    });
}

criterion_group!(benches, hit_resolution_benchmark, tick_benchmark);
criterion_main!(benches);
