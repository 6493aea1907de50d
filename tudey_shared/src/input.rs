//! Input frames.
//!
//! A frame is one timestamped sample of a player's intent. Pawn advancers
//! simulate motion every tick but only change direction/rotation/moving when
//! a new frame arrives.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Which parts of an input frame carry intent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct InputFlags: u32 {
        const MOVE = 1 << 0;   // `direction` is requested
        const ACTION = 1 << 1; // start the pawn's configured activity
    }
}

impl Default for InputFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// One sampled input frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InputFrame {
    /// Client timestamp the frame applies at (ms).
    pub timestamp: i64,
    /// Facing, in radians.
    pub rotation: f32,
    /// Movement direction, in radians. Only meaningful with `MOVE`.
    pub direction: f32,
    pub flags: InputFlags,
}

impl InputFrame {
    pub fn new(timestamp: i64, rotation: f32, direction: f32, flags: InputFlags) -> Self {
        Self {
            timestamp,
            rotation,
            direction,
            flags,
        }
    }

    pub fn is_set(&self, flag: InputFlags) -> bool {
        self.flags.contains(flag)
    }
}
