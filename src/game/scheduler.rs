//! Scheduled Events
//!
//! Deferred effects (phase timeout, bomb detonation, win polling, shot trail
//! expiry) are records with a logical fire time. The simulation tick pops
//! whatever is due; nothing runs on an ambient timer. Each timer occupies a
//! slot, and arming a slot replaces whatever was there, so a re-armed phase
//! timer can never fire twice.

use std::collections::BTreeMap;

use crate::core::clock::Millis;
use crate::game::round::RoundPhase;

/// A deferred effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Advance out of `phase` of `round` (host).
    PhaseAdvance {
        /// Round the timer was armed for.
        round: u32,
        /// Phase the timer was armed for.
        phase: RoundPhase,
    },
    /// Detonate the bomb planted in `round` (host).
    Explosion {
        /// Round the bomb was planted in.
        round: u32,
    },
    /// Evaluate win conditions (host, Active only).
    WinPoll,
    /// Remove a published shot trail.
    ShotExpire {
        /// Store key of the trail.
        key: String,
    },
}

/// Slot a timer occupies.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerSlot {
    /// Phase deadline.
    Phase,
    /// Bomb detonation.
    Explosion,
    /// Win poll.
    WinPoll,
    /// One slot per trail.
    Shot(String),
}

impl TimerKind {
    /// Slot this timer occupies.
    pub fn slot(&self) -> TimerSlot {
        match self {
            TimerKind::PhaseAdvance { .. } => TimerSlot::Phase,
            TimerKind::Explosion { .. } => TimerSlot::Explosion,
            TimerKind::WinPoll => TimerSlot::WinPoll,
            TimerKind::ShotExpire { key } => TimerSlot::Shot(key.clone()),
        }
    }
}

/// Timer queue ordered by fire time, then arming order.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    queue: BTreeMap<(Millis, u64), TimerKind>,
    slots: BTreeMap<TimerSlot, (Millis, u64)>,
    next_seq: u64,
}

impl Scheduler {
    /// Arm a timer, replacing any timer in the same slot.
    pub fn arm(&mut self, at: Millis, kind: TimerKind) {
        let slot = kind.slot();
        self.cancel(&slot);

        let key = (at, self.next_seq);
        self.next_seq += 1;
        self.queue.insert(key, kind);
        self.slots.insert(slot, key);
    }

    /// Cancel the timer in a slot. Returns true if one was armed.
    pub fn cancel(&mut self, slot: &TimerSlot) -> bool {
        match self.slots.remove(slot) {
            Some(key) => self.queue.remove(&key).is_some(),
            None => false,
        }
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.slots.clear();
    }

    /// Fire time of the timer in a slot.
    pub fn deadline(&self, slot: &TimerSlot) -> Option<Millis> {
        self.slots.get(slot).map(|(at, _)| *at)
    }

    /// Earliest pending fire time.
    pub fn next_due(&self) -> Option<Millis> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// No pending timers.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Millis) -> Vec<TimerKind> {
        let pending = self.queue.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.queue, pending);

        due.into_values()
            .inspect(|kind| {
                self.slots.remove(&kind.slot());
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_in_order() {
        let mut s = Scheduler::default();
        s.arm(300, TimerKind::WinPoll);
        s.arm(100, TimerKind::Explosion { round: 1 });
        s.arm(200, TimerKind::ShotExpire { key: "k".into() });

        assert!(s.pop_due(99).is_empty());
        assert_eq!(s.next_due(), Some(100));
        assert_eq!(
            s.pop_due(200),
            vec![TimerKind::Explosion { round: 1 }, TimerKind::ShotExpire { key: "k".into() }]
        );
        assert_eq!(s.len(), 1);
        assert_eq!(s.deadline(&TimerSlot::WinPoll), Some(300));
        assert_eq!(s.deadline(&TimerSlot::Explosion), None);
    }

    #[test]
    fn test_rearm_replaces_slot() {
        let mut s = Scheduler::default();
        s.arm(100, TimerKind::PhaseAdvance { round: 1, phase: RoundPhase::Prep });
        s.arm(500, TimerKind::PhaseAdvance { round: 1, phase: RoundPhase::Active });

        assert!(s.pop_due(400).is_empty());
        assert_eq!(
            s.pop_due(500),
            vec![TimerKind::PhaseAdvance { round: 1, phase: RoundPhase::Active }]
        );
        assert!(s.is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut s = Scheduler::default();
        s.arm(100, TimerKind::Explosion { round: 2 });
        assert!(s.cancel(&TimerSlot::Explosion));
        assert!(!s.cancel(&TimerSlot::Explosion));
        assert!(s.pop_due(1_000).is_empty());
    }
}
