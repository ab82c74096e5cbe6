//! Control offsets and their classification into POV, axis and
//! force-feedback groups.
//!
//! Offsets mirror the layout of the extended joystick state record used by
//! most HID drivers: eight primary axes, four POV hats, 128 buttons, then
//! velocity, acceleration and force blocks. Anything not listed in one of the
//! three tables is a button.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Raw offset of the first button in the state record.
const BUTTON_BASE: u32 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoystickOffset {
    X,
    Y,
    Z,
    RotationX,
    RotationY,
    RotationZ,
    Sliders0,
    Sliders1,
    PointOfViewControllers0,
    PointOfViewControllers1,
    PointOfViewControllers2,
    PointOfViewControllers3,
    Button(u8),
    VelocityX,
    VelocityY,
    VelocityZ,
    AngularVelocityX,
    AngularVelocityY,
    AngularVelocityZ,
    VelocitySliders0,
    VelocitySliders1,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
    AngularAccelerationX,
    AngularAccelerationY,
    AngularAccelerationZ,
    AccelerationSliders0,
    AccelerationSliders1,
    ForceX,
    ForceY,
    ForceZ,
    TorqueX,
    TorqueY,
    TorqueZ,
    ForceSliders0,
    ForceSliders1,
}

impl JoystickOffset {
    /// Byte offset of the control inside the joystick state record.
    pub fn raw(&self) -> u32 {
        use JoystickOffset::*;
        match self {
            X => 0,
            Y => 4,
            Z => 8,
            RotationX => 12,
            RotationY => 16,
            RotationZ => 20,
            Sliders0 => 24,
            Sliders1 => 28,
            PointOfViewControllers0 => 32,
            PointOfViewControllers1 => 36,
            PointOfViewControllers2 => 40,
            PointOfViewControllers3 => 44,
            Button(index) => BUTTON_BASE + u32::from(*index),
            VelocityX => 176,
            VelocityY => 180,
            VelocityZ => 184,
            AngularVelocityX => 188,
            AngularVelocityY => 192,
            AngularVelocityZ => 196,
            VelocitySliders0 => 200,
            VelocitySliders1 => 204,
            AccelerationX => 208,
            AccelerationY => 212,
            AccelerationZ => 216,
            AngularAccelerationX => 220,
            AngularAccelerationY => 224,
            AngularAccelerationZ => 228,
            AccelerationSliders0 => 232,
            AccelerationSliders1 => 236,
            ForceX => 240,
            ForceY => 244,
            ForceZ => 248,
            TorqueX => 252,
            TorqueY => 256,
            TorqueZ => 260,
            ForceSliders0 => 264,
            ForceSliders1 => 268,
        }
    }

    /// Index of the POV hat, if this offset is one.
    pub fn pov_index(&self) -> Option<u8> {
        match self {
            JoystickOffset::PointOfViewControllers0 => Some(0),
            JoystickOffset::PointOfViewControllers1 => Some(1),
            JoystickOffset::PointOfViewControllers2 => Some(2),
            JoystickOffset::PointOfViewControllers3 => Some(3),
            _ => None,
        }
    }

    pub fn pov(index: u8) -> Option<Self> {
        match index {
            0 => Some(JoystickOffset::PointOfViewControllers0),
            1 => Some(JoystickOffset::PointOfViewControllers1),
            2 => Some(JoystickOffset::PointOfViewControllers2),
            3 => Some(JoystickOffset::PointOfViewControllers3),
            _ => None,
        }
    }
}

impl fmt::Display for JoystickOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoystickOffset::Button(index) => write!(f, "Buttons{}", index),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetCategory {
    Pov,
    Axis,
    ForceFeedback,
    Button,
}

const OFFSETS_POV: [JoystickOffset; 4] = [
    JoystickOffset::PointOfViewControllers0,
    JoystickOffset::PointOfViewControllers1,
    JoystickOffset::PointOfViewControllers2,
    JoystickOffset::PointOfViewControllers3,
];

const OFFSETS_AXIS: [JoystickOffset; 22] = [
    JoystickOffset::X,
    JoystickOffset::Y,
    JoystickOffset::Z,
    JoystickOffset::RotationX,
    JoystickOffset::RotationY,
    JoystickOffset::RotationZ,
    JoystickOffset::Sliders0,
    JoystickOffset::Sliders1,
    JoystickOffset::TorqueX,
    JoystickOffset::TorqueY,
    JoystickOffset::TorqueZ,
    JoystickOffset::AccelerationX,
    JoystickOffset::AccelerationY,
    JoystickOffset::AccelerationZ,
    JoystickOffset::AccelerationSliders0,
    JoystickOffset::AccelerationSliders1,
    JoystickOffset::AngularAccelerationX,
    JoystickOffset::AngularAccelerationY,
    JoystickOffset::AngularAccelerationZ,
    JoystickOffset::AngularVelocityX,
    JoystickOffset::AngularVelocityY,
    JoystickOffset::AngularVelocityZ,
];

const OFFSETS_FORCE_FEEDBACK: [JoystickOffset; 5] = [
    JoystickOffset::ForceX,
    JoystickOffset::ForceY,
    JoystickOffset::ForceZ,
    JoystickOffset::ForceSliders0,
    JoystickOffset::ForceSliders1,
];

static POV_OFFSETS: Lazy<HashSet<JoystickOffset>> = Lazy::new(|| OFFSETS_POV.into_iter().collect());
static AXIS_OFFSETS: Lazy<HashSet<JoystickOffset>> =
    Lazy::new(|| OFFSETS_AXIS.into_iter().collect());
static FORCE_FEEDBACK_OFFSETS: Lazy<HashSet<JoystickOffset>> =
    Lazy::new(|| OFFSETS_FORCE_FEEDBACK.into_iter().collect());

/// Builds the classification tables ahead of the first lookup.
///
/// Calling this more than once is harmless; each table is built exactly once
/// even when several threads race on first use.
pub fn initialize() {
    let pov = Lazy::force(&POV_OFFSETS).len();
    let axis = Lazy::force(&AXIS_OFFSETS).len();
    let force_feedback = Lazy::force(&FORCE_FEEDBACK_OFFSETS).len();
    debug!(
        "Offset tables ready: {} pov, {} axis, {} force-feedback",
        pov, axis, force_feedback
    );
}

pub fn pov_offsets() -> &'static HashSet<JoystickOffset> {
    &POV_OFFSETS
}

pub fn axis_offsets() -> &'static HashSet<JoystickOffset> {
    &AXIS_OFFSETS
}

pub fn force_feedback_offsets() -> &'static HashSet<JoystickOffset> {
    &FORCE_FEEDBACK_OFFSETS
}

pub fn classify(offset: JoystickOffset) -> OffsetCategory {
    if POV_OFFSETS.contains(&offset) {
        OffsetCategory::Pov
    } else if AXIS_OFFSETS.contains(&offset) {
        OffsetCategory::Axis
    } else if FORCE_FEEDBACK_OFFSETS.contains(&offset) {
        OffsetCategory::ForceFeedback
    } else {
        OffsetCategory::Button
    }
}

// Direction reported by a POV hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PovState {
    Centered,
    Up,
    UpRight,
    Right,
    DownRight,
    Down,
    DownLeft,
    Left,
    UpLeft,
}

impl PovState {
    /// Value a centered hat reports.
    pub const CENTERED_RAW: i32 = 0xFFFF;

    /// Decodes a raw POV value given in hundredths of a degree clockwise from
    /// north. Negative values and the low word `0xFFFF` mean centered.
    pub fn from_raw(value: i32) -> Self {
        if value < 0 || (value & 0xFFFF) == 0xFFFF || value >= 36000 {
            return PovState::Centered;
        }
        // Round to the nearest of the eight 45 degree sectors
        match ((value + 2250) / 4500) % 8 {
            0 => PovState::Up,
            1 => PovState::UpRight,
            2 => PovState::Right,
            3 => PovState::DownRight,
            4 => PovState::Down,
            5 => PovState::DownLeft,
            6 => PovState::Left,
            _ => PovState::UpLeft,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            PovState::Centered => Self::CENTERED_RAW,
            PovState::Up => 0,
            PovState::UpRight => 4500,
            PovState::Right => 9000,
            PovState::DownRight => 13500,
            PovState::Down => 18000,
            PovState::DownLeft => 22500,
            PovState::Left => 27000,
            PovState::UpLeft => 31500,
        }
    }
}

impl fmt::Display for PovState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_disjoint() {
        initialize();
        assert!(pov_offsets().is_disjoint(axis_offsets()));
        assert!(pov_offsets().is_disjoint(force_feedback_offsets()));
        assert!(axis_offsets().is_disjoint(force_feedback_offsets()));
        assert_eq!(pov_offsets().len(), 4);
        assert_eq!(axis_offsets().len(), 22);
        assert_eq!(force_feedback_offsets().len(), 5);
    }

    #[test]
    fn classifies_offsets() {
        assert_eq!(classify(JoystickOffset::X), OffsetCategory::Axis);
        assert_eq!(classify(JoystickOffset::TorqueZ), OffsetCategory::Axis);
        assert_eq!(
            classify(JoystickOffset::PointOfViewControllers2),
            OffsetCategory::Pov
        );
        assert_eq!(
            classify(JoystickOffset::ForceSliders1),
            OffsetCategory::ForceFeedback
        );
        assert_eq!(classify(JoystickOffset::Button(7)), OffsetCategory::Button);
        // Velocity is in none of the tables
        assert_eq!(classify(JoystickOffset::VelocityX), OffsetCategory::Button);
    }

    #[test]
    fn concurrent_first_use_builds_consistent_tables() {
        let threads: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| classify(JoystickOffset::Sliders1)))
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap(), OffsetCategory::Axis);
        }
        assert_eq!(axis_offsets().len(), 22);
    }

    #[test]
    fn raw_button_offsets_follow_pov_block() {
        assert_eq!(JoystickOffset::Button(0).raw(), 48);
        assert_eq!(JoystickOffset::Button(127).raw(), 175);
        assert_eq!(JoystickOffset::PointOfViewControllers3.raw(), 44);
    }

    #[test]
    fn decodes_pov_values() {
        assert_eq!(PovState::from_raw(-1), PovState::Centered);
        assert_eq!(PovState::from_raw(0xFFFF), PovState::Centered);
        assert_eq!(PovState::from_raw(0), PovState::Up);
        assert_eq!(PovState::from_raw(9000), PovState::Right);
        assert_eq!(PovState::from_raw(13400), PovState::DownRight);
        assert_eq!(PovState::from_raw(35000), PovState::Up);
        for state in [PovState::Left, PovState::UpLeft, PovState::Centered] {
            assert_eq!(PovState::from_raw(state.to_raw()), state);
        }
    }
}
