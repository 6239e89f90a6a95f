//! Economy
//!
//! Wallet credits, purchases and the round-start award.

use crate::config::EconomyRules;
use crate::game::error::{ActionError, ActionResult};
use crate::game::round::{RoundPhase, RoundResult};
use crate::game::state::{PlayerState, Team};
use crate::game::weapon::WeaponKind;

/// Credit money up to the wallet ceiling. Returns the amount actually added.
pub fn credit(player: &mut PlayerState, amount: u32, rules: &EconomyRules) -> u32 {
    let before = player.money;
    player.money = player.money.saturating_add(amount).min(rules.max_money.max(before));
    player.money - before
}

/// Buy a weapon during Waiting or Prep. Returns the price paid.
pub fn purchase(player: &mut PlayerState, weapon: WeaponKind, phase: RoundPhase) -> ActionResult<u32> {
    if !matches!(phase, RoundPhase::Waiting | RoundPhase::Prep) {
        return Err(ActionError::WrongPhase { action: "buy", phase });
    }
    if !player.alive {
        return Err(ActionError::Dead);
    }
    let cost = weapon.spec().cost;
    if player.money < cost {
        return Err(ActionError::InsufficientFunds {
            required: cost,
            available: player.money,
        });
    }

    player.money -= cost;
    player.give_weapon(weapon);
    Ok(cost)
}

/// Consecutive round wins by `team` at the end of the history.
pub fn win_streak(history: &[RoundResult], team: Team) -> u32 {
    history.iter().rev().take_while(|r| r.winner == team).count() as u32
}

/// Money awarded to a `team` member entering round `round`.
///
/// Nothing in round 1. Afterwards everyone gets the stipend, and the
/// previous round's winners add the bonus for their current streak.
pub fn round_start_award(history: &[RoundResult], team: Team, round: u32, rules: &EconomyRules) -> u32 {
    if round <= 1 {
        return 0;
    }
    let streak = win_streak(history, team).min(rules.max_streak);
    rules.round_stipend + rules.win_streak_bonus * streak
}
