//! Round State Machine
//!
//! ```text
//!   Waiting ──start──▶ Prep ──timer──▶ Active ──win──▶ End ──timer──▶ Prep (n+1)
//!                                                       │
//!                                                       └──match won──▶ MatchOver
//! ```
//!
//! [`RoundState`] is the replicated round record. Only the host mutates it,
//! through methods that demand a [`HostToken`]. Every other participant
//! adopts remote copies through [`RoundState::adopt`], which rejects
//! duplicates and anything older than what is already known.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{GameConfig, MatchRules};
use crate::core::clock::Millis;
use crate::core::hash::StateHasher;
use crate::game::authority::HostToken;
use crate::game::bomb::BombState;
use crate::game::error::{ActionError, ActionResult};
use crate::game::state::{PlayerId, Team};

// =============================================================================
// PHASE
// =============================================================================

/// Round phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Lobby; players may join and buy.
    #[default]
    Waiting,
    /// Buy/setup, movement locked.
    Prep,
    /// Live play.
    Active,
    /// Result display, movement locked.
    End,
    /// Terminal.
    MatchOver,
}

impl RoundPhase {
    /// Position within a round. Phases only move forward within a round
    /// number; End→Prep starts a new number.
    pub fn rank(self) -> u8 {
        match self {
            RoundPhase::Waiting => 0,
            RoundPhase::Prep => 1,
            RoundPhase::Active => 2,
            RoundPhase::End => 3,
            RoundPhase::MatchOver => 4,
        }
    }

    /// Phase duration, if the phase is timed.
    pub fn duration(self, config: &GameConfig) -> Option<Millis> {
        match self {
            RoundPhase::Prep => Some(config.timers.prep_ms),
            RoundPhase::Active => Some(config.timers.active_ms),
            RoundPhase::End => Some(config.timers.end_ms),
            RoundPhase::Waiting | RoundPhase::MatchOver => None,
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::Waiting => "waiting",
            RoundPhase::Prep => "prep",
            RoundPhase::Active => "active",
            RoundPhase::End => "end",
            RoundPhase::MatchOver => "match_over",
        };
        f.write_str(name)
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Why a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinCondition {
    /// Other team has nobody left alive.
    Elimination,
    /// Bomb went off.
    BombExploded,
    /// Bomb was defused.
    BombDefused,
    /// Deadline reached with no bomb planted.
    TimeExpired,
}

/// Rounds won per team.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Team A wins.
    pub a: u32,
    /// Team B wins.
    pub b: u32,
}

impl Score {
    /// Wins for a team.
    pub fn of(&self, team: Team) -> u32 {
        match team {
            Team::A => self.a,
            Team::B => self.b,
        }
    }

    fn credit(&mut self, team: Team) {
        match team {
            Team::A => self.a += 1,
            Team::B => self.b += 1,
        }
    }
}

/// One entry in the match history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Round number.
    pub round: u32,
    /// Winning team.
    pub winner: Team,
    /// How it was won.
    pub condition: WinCondition,
    /// Score after this round.
    pub score: Score,
}

/// Final match outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchWinner {
    /// A team won.
    Team(Team),
    /// Round ceiling reached on equal score.
    Draw,
}

// =============================================================================
// ROUND RECORD
// =============================================================================

/// Outcome of adopting a remote round record.
#[derive(Clone, Debug, PartialEq)]
pub enum Adoption {
    /// Record replaced; carries the phase and number it replaced.
    Applied {
        /// Phase before adoption.
        prev_phase: RoundPhase,
        /// Round number before adoption.
        prev_number: u32,
    },
    /// Identical to the known record.
    Duplicate,
    /// Older than the known record.
    Stale,
}

/// Replicated round record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundState {
    /// Current phase.
    pub phase: RoundPhase,
    /// Round number; 0 while Waiting.
    pub number: u32,
    /// When the current phase ends (host clock, store time base).
    pub deadline: Option<Millis>,
    /// Rounds won per team.
    pub score: Score,
    /// Append-only history.
    #[serde(default)]
    pub history: Vec<RoundResult>,
    /// Set once, when the match ends.
    #[serde(default)]
    pub match_winner: Option<MatchWinner>,
}

impl RoundState {
    /// Freshness key. Later rounds beat earlier ones, later phases beat
    /// earlier ones within a round, and a recorded result beats none.
    fn freshness(&self) -> (u32, u8, usize) {
        (self.number, self.phase.rank(), self.history.len())
    }

    /// Replace this record with `incoming` if it is newer.
    ///
    /// A record with the same freshness key but a different deadline is
    /// adopted: replicas always defer to the last deadline read from the store.
    pub fn adopt(&mut self, incoming: RoundState) -> Adoption {
        use std::cmp::Ordering;

        match incoming.freshness().cmp(&self.freshness()) {
            Ordering::Less => Adoption::Stale,
            Ordering::Equal if incoming == *self => Adoption::Duplicate,
            Ordering::Equal if incoming.deadline == self.deadline => Adoption::Duplicate,
            _ => {
                let prev_phase = self.phase;
                let prev_number = self.number;
                *self = incoming;
                Adoption::Applied { prev_phase, prev_number }
            }
        }
    }

    /// Team carrying the bomb this round.
    pub fn attackers(&self, rules: &MatchRules) -> Team {
        if rules.side_swap_round > 0 && self.number > rules.side_swap_round {
            Team::B
        } else {
            Team::A
        }
    }

    /// Time left in the phase.
    pub fn remaining_ms(&self, now: Millis) -> Option<Millis> {
        self.deadline.map(|d| d.saturating_sub(now))
    }

    /// Leave Waiting and begin round 1.
    pub fn start(&mut self, _host: &HostToken, now: Millis, config: &GameConfig) -> ActionResult<()> {
        if self.phase != RoundPhase::Waiting {
            return Err(ActionError::WrongPhase {
                action: "start the match",
                phase: self.phase,
            });
        }
        self.number = 1;
        self.enter(RoundPhase::Prep, now, config);
        Ok(())
    }

    /// Timer-driven transition: Prep→Active, or End→Prep of the next round
    /// (End→MatchOver once the match has a winner).
    pub fn advance(&mut self, _host: &HostToken, now: Millis, config: &GameConfig) -> ActionResult<RoundPhase> {
        let next = match self.phase {
            RoundPhase::Prep => RoundPhase::Active,
            RoundPhase::End if self.match_winner.is_some() => RoundPhase::MatchOver,
            RoundPhase::End => {
                self.number += 1;
                RoundPhase::Prep
            }
            phase => {
                return Err(ActionError::WrongPhase {
                    action: "advance by timer",
                    phase,
                })
            }
        };
        self.enter(next, now, config);
        Ok(next)
    }

    /// Record the round winner and move to End. Only legal while Active, so
    /// a second win in the same round is rejected.
    pub fn record_result(
        &mut self,
        _host: &HostToken,
        winner: Team,
        condition: WinCondition,
        now: Millis,
        config: &GameConfig,
    ) -> ActionResult<RoundResult> {
        if self.phase != RoundPhase::Active {
            return Err(ActionError::WrongPhase {
                action: "record a round result",
                phase: self.phase,
            });
        }

        self.score.credit(winner);
        let result = RoundResult {
            round: self.number,
            winner,
            condition,
            score: self.score,
        };
        self.history.push(result.clone());

        if self.match_winner.is_none() {
            self.match_winner = check_match_end(self.score, self.number, &config.rules);
        }

        self.enter(RoundPhase::End, now, config);
        Ok(result)
    }

    fn enter(&mut self, phase: RoundPhase, now: Millis, config: &GameConfig) {
        self.phase = phase;
        self.deadline = phase.duration(config).map(|d| now + d);
    }

    /// Hash the replicated fields.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.phase.rank());
        hasher.update_u32(self.number);
        hasher.update_u64(self.deadline.unwrap_or(0));
        hasher.update_u32(self.score.a);
        hasher.update_u32(self.score.b);
        hasher.update_u32(self.history.len() as u32);
    }
}

/// Match-end check, run after every round result.
pub fn check_match_end(score: Score, rounds_played: u32, rules: &MatchRules) -> Option<MatchWinner> {
    if score.a >= rules.rounds_to_win {
        return Some(MatchWinner::Team(Team::A));
    }
    if score.b >= rules.rounds_to_win {
        return Some(MatchWinner::Team(Team::B));
    }
    if rounds_played >= rules.max_rounds {
        return Some(match score.a.cmp(&score.b) {
            std::cmp::Ordering::Greater => MatchWinner::Team(Team::A),
            std::cmp::Ordering::Less => MatchWinner::Team(Team::B),
            std::cmp::Ordering::Equal => MatchWinner::Draw,
        });
    }
    None
}

// =============================================================================
// WIN CONDITIONS
// =============================================================================

/// Inputs to a win check.
#[derive(Clone, Copy, Debug)]
pub struct WinContext<'a> {
    /// Current phase.
    pub phase: RoundPhase,
    /// Current time.
    pub now: Millis,
    /// Active-phase deadline.
    pub deadline: Option<Millis>,
    /// Living team A members.
    pub alive_a: usize,
    /// Living team B members.
    pub alive_b: usize,
    /// Team carrying the bomb.
    pub attackers: Team,
    /// Bomb state.
    pub bomb: &'a BombState,
}

/// Evaluate win conditions in priority order: elimination, explosion,
/// defuse, time expired. Returns the first satisfied one.
pub fn evaluate_win(ctx: &WinContext<'_>) -> Option<(Team, WinCondition)> {
    if ctx.phase != RoundPhase::Active {
        return None;
    }
    let defenders = ctx.attackers.other();

    if ctx.alive_a == 0 && ctx.alive_b > 0 {
        return Some((Team::B, WinCondition::Elimination));
    }
    if ctx.alive_b == 0 && ctx.alive_a > 0 {
        return Some((Team::A, WinCondition::Elimination));
    }

    match ctx.bomb {
        BombState::Planted { explode_at: Some(at), .. } if ctx.now >= *at => {
            return Some((ctx.attackers, WinCondition::BombExploded));
        }
        BombState::Exploded { .. } => return Some((ctx.attackers, WinCondition::BombExploded)),
        BombState::Defused { .. } => return Some((defenders, WinCondition::BombDefused)),
        _ => {}
    }

    let expired = ctx.deadline.is_some_and(|d| ctx.now >= d);
    if expired && !ctx.bomb.is_planted() {
        return Some((defenders, WinCondition::TimeExpired));
    }

    None
}

// =============================================================================
// APPLIED EFFECTS
// =============================================================================

/// One-time, round-scoped effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoundEffect {
    /// Local player reset to spawn.
    PlayerReset,
    /// Round-start money credited.
    RoundStartMoney,
    /// Bomb handed to an attacker (host).
    BombAssigned,
    /// Round result displayed.
    ResultShown,
    /// Match result displayed.
    MatchOverShown,
    /// Kill reward for this victim credited.
    KillCredit(PlayerId),
}

/// Set of effects already applied, keyed by (round, effect).
#[derive(Clone, Debug, Default)]
pub struct AppliedEffects {
    applied: BTreeSet<(u32, RoundEffect)>,
}

impl AppliedEffects {
    /// Record an effect. Returns false if it was already applied this round.
    pub fn apply_once(&mut self, round: u32, effect: RoundEffect) -> bool {
        self.applied.insert((round, effect))
    }

    /// Whether an effect was applied.
    pub fn contains(&self, round: u32, effect: RoundEffect) -> bool {
        self.applied.contains(&(round, effect))
    }

    /// Forget effects of rounds before `round`.
    pub fn prune_before(&mut self, round: u32) {
        self.applied = self.applied.split_off(&(round, RoundEffect::PlayerReset));
    }

    /// Number of recorded effects.
    pub fn len(&self) -> usize {
        self.applied.len()
    }

    /// No effects recorded.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
