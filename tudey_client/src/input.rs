//! Input handling.
//!
//! In a real client this would integrate with windowing, raw mouse/keyboard
//! and action bindings. Here it turns a sampled stick/aim state into the
//! `InputFrame` sent to the server and fed to the predicted pawn.

use tudey_shared::input::{InputFlags, InputFrame};

/// Stick deflection below which the pawn stands still.
pub const MOVE_DEADZONE: f32 = 0.2;

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    /// Movement stick, each axis in `[-1, 1]`.
    pub move_x: f32,
    pub move_y: f32,
    /// Facing (radians).
    pub aim: f32,
    /// Action button held.
    pub action: bool,
}

impl InputState {
    /// Whether the movement stick is outside the dead zone.
    pub fn is_moving(&self) -> bool {
        self.move_x.hypot(self.move_y) > MOVE_DEADZONE
    }

    /// Samples the state into a frame stamped with `timestamp`.
    pub fn frame(&self, timestamp: i64) -> InputFrame {
        let mut flags = InputFlags::empty();
        let direction = if self.is_moving() {
            flags |= InputFlags::MOVE;
            self.move_y.atan2(self.move_x)
        } else {
            self.aim
        };
        if self.action {
            flags |= InputFlags::ACTION;
        }
        InputFrame::new(timestamp, self.aim, direction, flags)
    }
}
