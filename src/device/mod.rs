//! Device model: identities, capabilities, raw updates, control offsets,
//! wait primitives and the per-device acquisition handle.

pub mod error;
pub mod handle;
pub mod offsets;
pub mod types;
pub mod wait;

pub use error::DeviceError;
pub use handle::{AcquisitionGuard, AcquisitionMode, Acquired, Created, DeviceHandle, DrainError};
pub use offsets::{JoystickOffset, OffsetCategory, PovState};
pub use types::{
    ConnectedDeviceInfo, DeviceCapabilities, DeviceCategory, DeviceDescriptor, DeviceId,
    DeviceProperties, RawUpdate,
};
pub use wait::{WaitEvent, WaitSignal};
