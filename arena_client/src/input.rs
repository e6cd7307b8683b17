//! Input handling.
//!
//! A headless client has no keyboard; callers (the bot, tests) fill an
//! [`InputState`] per frame and it is turned into a `PlayerInput` payload.

use arena_shared::protocol::{Buttons, PlayerInput};

/// Sampled input at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    /// -1 left, +1 right.
    pub move_x: i8,
    /// -1 up, +1 down.
    pub move_y: i8,
    pub shoot: bool,
    pub special: bool,
}

impl InputState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn moving(move_x: i8, move_y: i8) -> Self {
        Self {
            move_x,
            move_y,
            ..Self::default()
        }
    }

    /// Button bits, including the directional mirror of the axes.
    pub fn buttons(self) -> Buttons {
        let mut buttons = Buttons::empty();
        buttons.set(Buttons::SHOOT, self.shoot);
        buttons.set(Buttons::SPECIAL, self.special);
        buttons.set(Buttons::LEFT, self.move_x < 0);
        buttons.set(Buttons::RIGHT, self.move_x > 0);
        buttons.set(Buttons::UP, self.move_y < 0);
        buttons.set(Buttons::DOWN, self.move_y > 0);
        buttons
    }
}

/// Wall-clock milliseconds truncated to 32 bits.
pub fn timestamp_ms() -> u32 {
    chrono::Utc::now().timestamp_millis() as u32
}

/// Turns sampled input into a `PlayerInput` payload.
pub fn build_input(player_id: u8, timestamp: u32, input: InputState) -> PlayerInput {
    PlayerInput {
        timestamp,
        player_id,
        buttons: input.buttons(),
        move_x: input.move_x,
        move_y: input.move_y,
    }
}
