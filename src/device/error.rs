use thiserror::Error;

/// Failures reported by a device backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Input from the device was lost; the device has been unplugged or
    /// disabled.
    #[error("Input lost")]
    InputLost,

    /// The device instance is no longer registered with the driver. Commonly
    /// seen while a device is being disconnected.
    #[error("Device not registered")]
    NotRegistered,

    #[error("Device busy")]
    Busy,

    #[error("Access denied")]
    AccessDenied,

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl DeviceError {
    pub fn is_input_lost(&self) -> bool {
        matches!(self, DeviceError::InputLost)
    }

    /// Errors expected while a device disappears in the middle of an
    /// acquisition attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::NotRegistered | DeviceError::InputLost)
    }
}
