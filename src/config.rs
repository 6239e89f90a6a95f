//! Configuration
//!
//! `GameConfig` carries every tunable gameplay number: phase timers, bomb
//! rules, match thresholds, economy and sync cadence. Every participant in
//! a room must run with the same values. `RelayConfig` configures the
//! store relay binary and is read from the environment.

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::clock::Millis;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `GameConfig`.
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Environment variable holds an unusable value.
    #[error("Invalid value for {0}")]
    Invalid(&'static str),

    /// Bind address could not be parsed.
    #[error("Invalid bind address format")]
    InvalidAddress,
}

// =============================================================================
// GAME CONFIG
// =============================================================================

/// Phase durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimers {
    /// Buy/setup phase length.
    pub prep_ms: Millis,
    /// Live round length.
    pub active_ms: Millis,
    /// Result screen length.
    pub end_ms: Millis,
}

impl Default for PhaseTimers {
    fn default() -> Self {
        Self {
            prep_ms: 10_000,
            active_ms: 120_000,
            end_ms: 5_000,
        }
    }
}

/// Objective rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BombRules {
    /// Continuous interact hold needed to plant.
    pub plant_ms: Millis,
    /// Continuous interact hold needed to defuse.
    pub defuse_ms: Millis,
    /// Delay between plant completion and detonation.
    pub explosion_delay_ms: Millis,
    /// Defuser must be within this distance of the planted bomb.
    pub defuse_radius: f32,
    /// A dropped bomb can be picked up within this distance.
    pub pickup_radius: f32,
}

impl Default for BombRules {
    fn default() -> Self {
        Self {
            plant_ms: 3_000,
            defuse_ms: 5_000,
            explosion_delay_ms: 40_000,
            defuse_radius: 48.0,
            pickup_radius: 50.0,
        }
    }
}

/// Match-level thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    /// Rounds a team must win to take the match.
    pub rounds_to_win: u32,
    /// Round ceiling; reaching it ends the match on score.
    pub max_rounds: u32,
    /// Sides swap after this many rounds (0 disables).
    pub side_swap_round: u32,
    /// Host win-condition poll interval while Active.
    pub win_check_interval_ms: Millis,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            rounds_to_win: 7,
            max_rounds: 12,
            side_swap_round: 6,
            win_check_interval_ms: 250,
        }
    }
}

/// Money rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyRules {
    /// Money every player starts the match with.
    pub starting_money: u32,
    /// Credited to the killer per kill.
    pub kill_reward: u32,
    /// Credited to everyone at the start of rounds after the first.
    pub round_stipend: u32,
    /// Per consecutive win, credited to the previous round's winners.
    pub win_streak_bonus: u32,
    /// Streak length beyond which the bonus stops growing.
    pub max_streak: u32,
    /// Wallet ceiling.
    pub max_money: u32,
}

impl Default for EconomyRules {
    fn default() -> Self {
        Self {
            starting_money: 800,
            kill_reward: 200,
            round_stipend: 800,
            win_streak_bonus: 300,
            max_streak: 4,
            max_money: 16_000,
        }
    }
}

/// Player body rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerRules {
    /// Full health.
    pub max_health: f32,
    /// Hitbox diameter in pixels.
    pub size: f32,
    /// Movement speed in pixels per second.
    pub speed: f32,
}

impl Default for PlayerRules {
    fn default() -> Self {
        Self {
            max_health: 100.0,
            size: 20.0,
            speed: 200.0,
        }
    }
}

impl PlayerRules {
    /// Hitbox radius.
    pub fn radius(&self) -> f32 {
        self.size / 2.0
    }
}

/// Replication cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRules {
    /// Minimum spacing between position-only publishes.
    pub position_interval_ms: Millis,
    /// How long a shooter's predicted victim health overrides the mirror.
    pub prediction_ttl_ms: Millis,
    /// Lifetime of a published shot trail.
    pub shot_ttl_ms: Millis,
}

impl Default for SyncRules {
    fn default() -> Self {
        Self {
            position_interval_ms: 50,
            prediction_ttl_ms: 500,
            shot_ttl_ms: 1_000,
        }
    }
}

/// Complete gameplay configuration shared by all participants of a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Phase durations.
    pub timers: PhaseTimers,
    /// Objective rules.
    pub bomb: BombRules,
    /// Match thresholds.
    pub rules: MatchRules,
    /// Economy.
    pub economy: EconomyRules,
    /// Player body.
    pub player: PlayerRules,
    /// Replication cadence.
    pub sync: SyncRules,
}

impl GameConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// =============================================================================
// RELAY CONFIG
// =============================================================================

/// Store relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Optional gameplay config file for the demo match.
    pub game_config_path: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            ping_interval: Duration::from_secs(15),
            game_config_path: None,
        }
    }
}

impl RelayConfig {
    /// Load from `BOMBSITE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = env::var("BOMBSITE_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|_| ConfigError::InvalidAddress)?;
        }
        if let Ok(max) = env::var("BOMBSITE_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| ConfigError::Invalid("BOMBSITE_MAX_CONNECTIONS"))?;
        }
        config.game_config_path = env::var("BOMBSITE_CONFIG").ok();

        Ok(config)
    }

    /// Gameplay config named by `BOMBSITE_CONFIG`, or the defaults.
    pub fn game_config(&self) -> Result<GameConfig, ConfigError> {
        match &self.game_config_path {
            Some(path) => GameConfig::from_json_file(path),
            None => Ok(GameConfig::default()),
        }
    }
}
