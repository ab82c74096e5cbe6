//! Event types published on the bus by the controller subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::offsets::{self, OffsetCategory};
use crate::device::{ConnectedDeviceInfo, DeviceDescriptor, JoystickOffset, PovState, RawUpdate};

/// Raw button values with this bit set mean pressed.
const BUTTON_PRESSED_MASK: i32 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerEventKind {
    Button { index: u8, pressed: bool },
    Pov { index: u8, state: PovState },
    Axis { offset: JoystickOffset, value: i32 },
}

/// One classified hardware update together with the device that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerEvent {
    pub device: DeviceDescriptor,
    pub update: RawUpdate,
    pub kind: ControllerEventKind,
}

impl ControllerEvent {
    /// Classifies a raw update. Force-feedback offsets carry no input and
    /// yield `None`, as do velocity offsets, which fall outside every table
    /// but are no button either.
    pub fn from_update(device: &DeviceDescriptor, update: RawUpdate) -> Option<Self> {
        let kind = match offsets::classify(update.offset) {
            OffsetCategory::ForceFeedback => return None,
            OffsetCategory::Pov => ControllerEventKind::Pov {
                index: update.offset.pov_index().unwrap_or(0),
                state: PovState::from_raw(update.value),
            },
            OffsetCategory::Axis => ControllerEventKind::Axis {
                offset: update.offset,
                value: update.value,
            },
            OffsetCategory::Button => {
                let JoystickOffset::Button(index) = update.offset else {
                    return None;
                };
                ControllerEventKind::Button {
                    index,
                    pressed: update.value & BUTTON_PRESSED_MASK != 0,
                }
            }
        };
        Some(Self {
            device: device.clone(),
            update,
            kind,
        })
    }

    pub fn is_axis(&self) -> bool {
        matches!(self.kind, ControllerEventKind::Axis { .. })
    }
}

impl fmt::Display for ControllerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerEventKind::Button { index, pressed } => write!(
                f,
                "Button {} {}",
                index,
                if *pressed { "pressed" } else { "released" }
            ),
            ControllerEventKind::Pov { index: 0, state } => write!(f, "POV {}", state),
            ControllerEventKind::Pov { index, state } => write!(f, "POV{} {}", index, state),
            ControllerEventKind::Axis { offset, value } => write!(f, "Axis {} {}", offset, value),
        }
    }
}

impl fmt::Display for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device.instance_name, self.kind)
    }
}

/// Snapshot of every connected device, taken when the set changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllersChangedEvent {
    pub devices: Vec<ConnectedDeviceInfo>,
}

impl ControllersChangedEvent {
    pub fn count(&self) -> usize {
        self.devices.len()
    }
}

/// Published when the backend failed to enumerate devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationFault {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCategory, DeviceId};

    fn pad() -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::new("pad-1"),
            instance_name: "Test Pad".to_string(),
            product_name: "Test Pad".to_string(),
            category: DeviceCategory::Gamepad,
        }
    }

    fn classify(offset: JoystickOffset, value: i32) -> Option<ControllerEventKind> {
        ControllerEvent::from_update(&pad(), RawUpdate::new(offset, value, 1)).map(|e| e.kind)
    }

    #[test]
    fn buttons_use_the_pressed_bit() {
        assert_eq!(
            classify(JoystickOffset::Button(3), 0x80),
            Some(ControllerEventKind::Button {
                index: 3,
                pressed: true
            })
        );
        assert_eq!(
            classify(JoystickOffset::Button(3), 0),
            Some(ControllerEventKind::Button {
                index: 3,
                pressed: false
            })
        );
    }

    #[test]
    fn hats_and_axes_are_classified() {
        assert_eq!(
            classify(JoystickOffset::PointOfViewControllers1, 9000),
            Some(ControllerEventKind::Pov {
                index: 1,
                state: PovState::Right
            })
        );
        assert_eq!(
            classify(JoystickOffset::RotationZ, 1200),
            Some(ControllerEventKind::Axis {
                offset: JoystickOffset::RotationZ,
                value: 1200
            })
        );
    }

    #[test]
    fn force_feedback_offsets_are_dropped() {
        assert_eq!(classify(JoystickOffset::ForceX, 10), None);
    }

    #[test]
    fn display_names_device_and_control() {
        let event =
            ControllerEvent::from_update(&pad(), RawUpdate::new(JoystickOffset::Button(3), 0x80, 1))
                .unwrap();
        assert_eq!(event.to_string(), "Test Pad (Button 3 pressed)");

        let event = ControllerEvent::from_update(
            &pad(),
            RawUpdate::new(JoystickOffset::PointOfViewControllers0, 0, 2),
        )
        .unwrap();
        assert_eq!(event.to_string(), "Test Pad (POV Up)");
    }
}
