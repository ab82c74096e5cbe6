use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::offsets::JoystickOffset;

// Stable device identity, unique per physical instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Device categories reported during enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Gamepad,
    Joystick,
    Remote,
    Flight,
    Driving,
    Other,
}

impl DeviceCategory {
    /// Categories enumerated and connected by default.
    pub const ACCEPTED: [DeviceCategory; 5] = [
        DeviceCategory::Gamepad,
        DeviceCategory::Joystick,
        DeviceCategory::Remote,
        DeviceCategory::Flight,
        DeviceCategory::Driving,
    ];
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceCategory::Gamepad => "Gamepad",
            DeviceCategory::Joystick => "Joystick",
            DeviceCategory::Remote => "Remote",
            DeviceCategory::Flight => "Flight",
            DeviceCategory::Driving => "Driving",
            DeviceCategory::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Identity of a device as found during enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub instance_name: String,
    pub product_name: String,
    pub category: DeviceCategory,
}

/// Control counts and acquisition flags, queried once at connect time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub button_count: u32,
    pub pov_count: u32,
    pub axis_count: u32,
    /// At least one control must be sampled explicitly; the device cannot
    /// signal a wait primitive.
    pub poll_only: bool,
    pub force_feedback: bool,
}

impl DeviceCapabilities {
    pub fn is_waitable(&self) -> bool {
        !self.poll_only
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub buffer_size: usize,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub axis_range: (i32, i32),
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self {
            buffer_size: 0,
            vendor_id: None,
            product_id: None,
            axis_range: (0, 65535),
        }
    }
}

/// Read-only view of a connected device handed out to consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDeviceInfo {
    pub descriptor: DeviceDescriptor,
    pub capabilities: DeviceCapabilities,
    pub properties: DeviceProperties,
}

impl fmt::Display for ConnectedDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] buttons={} povs={} axes={} {}",
            self.descriptor.instance_name,
            self.descriptor.category,
            self.capabilities.button_count,
            self.capabilities.pov_count,
            self.capabilities.axis_count,
            if self.capabilities.poll_only {
                "polled"
            } else {
                "waitable"
            }
        )
    }
}

// One buffered hardware state change
#[derive(Clone, Debug, PartialEq)]
pub struct RawUpdate {
    pub offset: JoystickOffset,
    pub value: i32,
    pub sequence: u32,
    pub timestamp: DateTime<Local>,
}

impl RawUpdate {
    pub fn new(offset: JoystickOffset, value: i32, sequence: u32) -> Self {
        Self {
            offset,
            value,
            sequence,
            timestamp: Local::now(),
        }
    }
}
