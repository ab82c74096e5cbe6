//! Boundary to the native device API.
//!
//! The connection manager only talks to devices through these two traits.
//! [`gilrs_backend`] drives real gamepads, [`virtual_backend`] keeps devices
//! in memory for tests and demos.

pub mod gilrs_backend;
pub mod virtual_backend;

pub use gilrs_backend::GilrsBackend;
pub use virtual_backend::{VirtualBackend, VirtualDevice, VirtualDeviceSpec};

use crate::device::{
    DeviceCapabilities, DeviceCategory, DeviceDescriptor, DeviceError, DeviceProperties,
    RawUpdate, WaitSignal,
};

/// Enumerates present devices and opens native handles for them.
pub trait DeviceBackend: Send + Sync {
    fn enumerate(
        &self,
        categories: &[DeviceCategory],
    ) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn NativeDevice>, DeviceError>;
}

/// A single opened device.
///
/// Buffered data is only recorded between [`acquire`](NativeDevice::acquire)
/// and [`unacquire`](NativeDevice::unacquire). Waitable devices must have
/// their notification registered before they are acquired.
pub trait NativeDevice: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn capabilities(&self) -> DeviceCapabilities;

    fn properties(&self) -> DeviceProperties;

    fn set_buffer_size(&mut self, size: usize) -> Result<(), DeviceError>;

    /// Registers (or with `None` clears) the signal raised whenever new
    /// buffered data is available.
    fn set_notification(&mut self, signal: Option<WaitSignal>) -> Result<(), DeviceError>;

    fn acquire(&mut self) -> Result<(), DeviceError>;

    fn unacquire(&mut self) -> Result<(), DeviceError>;

    /// Samples the device. Required for poll-only devices before reading.
    fn poll(&mut self) -> Result<(), DeviceError>;

    /// Returns every update buffered since the previous call, oldest first.
    fn buffered_data(&mut self) -> Result<Vec<RawUpdate>, DeviceError>;
}
