//! Input Capture and Normalization
//!
//! The input collaborator hands the core discrete [`Intent`]s. Devices that
//! sample state per frame can fill an [`InputFrame`] and let
//! [`InputFrame::intents_since`] derive the edge-triggered intents.

use serde::{Deserialize, Serialize};

use crate::core::vec2::Vec2;
use crate::game::weapon::WeaponKind;

// =============================================================================
// INTENTS
// =============================================================================

/// A discrete player intent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Face a new angle (radians).
    Aim {
        /// Aim angle.
        angle: f32,
    },
    /// Set the movement direction; zero stops.
    Move {
        /// Desired direction, any length.
        direction: Vec2,
    },
    /// Put the weapon at `slot` in hand.
    SwitchWeapon {
        /// Index into the equipment list.
        slot: usize,
    },
    /// Trigger pressed (`held = true`) or released.
    Fire {
        /// Trigger state.
        held: bool,
    },
    /// Reload the weapon in hand.
    Reload,
    /// Interact pressed or released (plant, defuse, pick up).
    Interact {
        /// Button state.
        held: bool,
    },
    /// Buy a weapon.
    Buy {
        /// Catalog entry.
        weapon: WeaponKind,
    },
}

/// Held buttons and movement direction, carried between ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Controls {
    /// Trigger is down.
    pub fire_held: bool,
    /// Trigger went down and the edge shot has not been taken yet.
    pub fire_pressed: bool,
    /// Interact is down.
    pub interact_held: bool,
    /// Unit movement direction, or zero.
    pub move_dir: Vec2,
}

impl Controls {
    /// Release everything.
    pub fn release_all(&mut self) {
        *self = Controls::default();
    }
}

// =============================================================================
// FRAME SAMPLING
// =============================================================================

/// Convert an i8 axis sample to [-1, 1]. `-128` means released.
#[inline]
pub fn axis_to_unit(input: i8) -> f32 {
    if input == InputFrame::NO_INPUT {
        0.0
    } else {
        input as f32 / 127.0
    }
}

/// Raw input state for a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Movement X direction: -127 (left) to +127 (right)
    /// -128 = released / no input
    pub move_x: i8,

    /// Movement Y direction: -127 (up) to +127 (down)
    /// -128 = released / no input
    pub move_y: i8,

    /// Aim angle in radians
    pub aim: f32,

    /// Action flags (packed bits):
    /// - Bit 0: Fire held
    /// - Bit 1: Interact held
    /// - Bit 2: Reload pressed
    /// - Bit 3: Switch to slot 0
    /// - Bit 4: Switch to slot 1
    pub flags: u8,
}

impl Default for InputFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl InputFrame {
    /// Special value indicating no input (stick released)
    pub const NO_INPUT: i8 = -128;

    /// Fire flag bit
    pub const FLAG_FIRE: u8 = 0x01;

    /// Interact flag bit
    pub const FLAG_INTERACT: u8 = 0x02;

    /// Reload flag bit
    pub const FLAG_RELOAD: u8 = 0x04;

    /// Switch-to-first-slot flag bit
    pub const FLAG_SLOT_0: u8 = 0x08;

    /// Switch-to-second-slot flag bit
    pub const FLAG_SLOT_1: u8 = 0x10;

    /// Create a new empty input frame.
    pub const fn new() -> Self {
        Self {
            move_x: Self::NO_INPUT,
            move_y: Self::NO_INPUT,
            aim: 0.0,
            flags: 0,
        }
    }

    /// Create input with movement direction.
    pub const fn with_movement(move_x: i8, move_y: i8) -> Self {
        Self {
            move_x,
            move_y,
            aim: 0.0,
            flags: 0,
        }
    }

    /// Movement as a vector (not normalized).
    #[inline]
    pub fn move_direction(&self) -> Vec2 {
        Vec2::new(axis_to_unit(self.move_x), axis_to_unit(self.move_y))
    }

    /// Check a flag.
    #[inline]
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Set or clear a flag.
    #[inline]
    pub fn set(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Intents implied by moving from `prev` to this frame.
    ///
    /// Buttons produce intents on their edges only; aim and movement when
    /// they change.
    pub fn intents_since(&self, prev: &InputFrame) -> Vec<Intent> {
        let mut intents = Vec::new();

        if self.aim != prev.aim {
            intents.push(Intent::Aim { angle: self.aim });
        }
        if self.move_direction() != prev.move_direction() {
            intents.push(Intent::Move {
                direction: self.move_direction(),
            });
        }

        for (flag, slot) in [(Self::FLAG_SLOT_0, 0), (Self::FLAG_SLOT_1, 1)] {
            if self.has(flag) && !prev.has(flag) {
                intents.push(Intent::SwitchWeapon { slot });
            }
        }
        if self.has(Self::FLAG_RELOAD) && !prev.has(Self::FLAG_RELOAD) {
            intents.push(Intent::Reload);
        }
        if self.has(Self::FLAG_FIRE) != prev.has(Self::FLAG_FIRE) {
            intents.push(Intent::Fire {
                held: self.has(Self::FLAG_FIRE),
            });
        }
        if self.has(Self::FLAG_INTERACT) != prev.has(Self::FLAG_INTERACT) {
            intents.push(Intent::Interact {
                held: self.has(Self::FLAG_INTERACT),
            });
        }

        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_conversion() {
        assert_eq!(axis_to_unit(0), 0.0);
        assert_eq!(axis_to_unit(127), 1.0);
        assert_eq!(axis_to_unit(-127), -1.0);
        assert_eq!(axis_to_unit(InputFrame::NO_INPUT), 0.0);
    }

    #[test]
    fn test_idle_frames_produce_nothing() {
        let frame = InputFrame::new();
        assert!(frame.intents_since(&InputFrame::new()).is_empty());
    }

    #[test]
    fn test_button_edges() {
        let idle = InputFrame::new();
        let mut pressed = idle;
        pressed.set(InputFrame::FLAG_FIRE, true);
        pressed.set(InputFrame::FLAG_RELOAD, true);

        assert_eq!(
            pressed.intents_since(&idle),
            vec![Intent::Reload, Intent::Fire { held: true }]
        );
        // Still held: no repeat
        assert!(pressed.intents_since(&pressed).is_empty());
        assert_eq!(idle.intents_since(&pressed), vec![Intent::Fire { held: false }]);
    }

    #[test]
    fn test_movement_and_aim_changes() {
        let idle = InputFrame::new();
        let mut moving = InputFrame::with_movement(127, InputFrame::NO_INPUT);
        moving.aim = 1.5;
        let intents = moving.intents_since(&idle);
        assert_eq!(
            intents,
            vec![
                Intent::Aim { angle: 1.5 },
                Intent::Move { direction: Vec2::new(1.0, 0.0) },
            ]
        );
    }

    #[test]
    fn test_slot_switch() {
        let idle = InputFrame::new();
        let mut frame = idle;
        frame.set(InputFrame::FLAG_SLOT_1, true);
        assert_eq!(frame.intents_since(&idle), vec![Intent::SwitchWeapon { slot: 1 }]);
    }
}
