//! Device handle - one connected device and its acquisition lifecycle
//!
//! A handle starts in the `Created` state right after the backend opened the
//! native device and moves to `Acquired` once [`DeviceHandle::connect`]
//! succeeded. Whether the device is serviced by the polling loop or the
//! waiting loop is decided once, at connect time, from its capabilities.
//!
//! All native resources live in an [`AcquisitionGuard`]. Dropping a handle in
//! any state releases them, which covers the failure path of a partially
//! successful connect.

use crossbeam::channel::Receiver;
use statum::{machine, state};
use std::fmt;
use tracing::{debug, warn};

use super::types::{ConnectedDeviceInfo, DeviceDescriptor, RawUpdate};
use super::wait::WaitEvent;
use super::DeviceError;
use crate::backend::{DeviceBackend, NativeDevice};

/// How the device delivers its input once acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Sampled by the polling loop at a fixed rate.
    Polled,
    /// Signals a wait primitive serviced by the waiting loop.
    Waitable,
}

/// Why draining a device failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainError {
    /// Input was lost; the device is gone.
    Unplugged,
    /// Any other failure. The device stays connected.
    Failed(DeviceError),
}

/// Owns a native device plus its wait primitive and releases both in reverse
/// acquisition order.
pub struct AcquisitionGuard {
    device: Box<dyn NativeDevice>,
    wait_event: Option<WaitEvent>,
    acquired: bool,
    released: bool,
}

impl AcquisitionGuard {
    fn new(device: Box<dyn NativeDevice>) -> Self {
        Self {
            device,
            wait_event: None,
            acquired: false,
            released: false,
        }
    }

    // Must run before acquire, otherwise the first notifications are lost
    fn register_notification(&mut self) -> Result<(), DeviceError> {
        let wait_event = WaitEvent::new();
        self.device.set_notification(Some(wait_event.signal()))?;
        self.wait_event = Some(wait_event);
        Ok(())
    }

    fn acquire(&mut self) -> Result<(), DeviceError> {
        self.device.acquire()?;
        self.acquired = true;
        Ok(())
    }

    /// Releases the acquisition and the wait primitive. Safe to call more
    /// than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if self.acquired {
            if let Err(e) = self.device.unacquire() {
                warn!(
                    "Failed to unacquire {}: {}",
                    self.device.descriptor().instance_name,
                    e
                );
            }
            self.acquired = false;
        }
        if self.wait_event.take().is_some() {
            if let Err(e) = self.device.set_notification(None) {
                debug!(
                    "Failed to clear notification on {}: {}",
                    self.device.descriptor().instance_name,
                    e
                );
            }
        }
        debug!("Released {}", self.device.descriptor().id);
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for AcquisitionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AcquisitionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionGuard")
            .field("device", &self.device.descriptor().id)
            .field("waitable", &self.wait_event.is_some())
            .field("acquired", &self.acquired)
            .field("released", &self.released)
            .finish()
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum HandleState {
    Created,
    Acquired,
}

#[machine]
#[derive(Debug)]
pub struct DeviceHandle<S: HandleState> {
    guard: AcquisitionGuard,
    info: ConnectedDeviceInfo,
    mode: AcquisitionMode,
}

// Available in every state
impl<S: HandleState> DeviceHandle<S> {
    pub fn info(&self) -> &ConnectedDeviceInfo {
        &self.info
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.info.descriptor
    }

    pub fn is_waitable(&self) -> bool {
        self.mode == AcquisitionMode::Waitable
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }
}

impl DeviceHandle<Created> {
    /// Opens the device through the backend and sizes its input buffer.
    pub fn create(
        backend: &dyn DeviceBackend,
        descriptor: &DeviceDescriptor,
        buffer_size: usize,
    ) -> Result<Self, DeviceError> {
        let mut device = backend.create(descriptor)?;
        device.set_buffer_size(buffer_size)?;

        let capabilities = device.capabilities();
        let info = ConnectedDeviceInfo {
            descriptor: descriptor.clone(),
            capabilities,
            properties: device.properties(),
        };
        let mode = if capabilities.is_waitable() {
            AcquisitionMode::Waitable
        } else {
            AcquisitionMode::Polled
        };

        Ok(Self::new(AcquisitionGuard::new(device), info, mode))
    }

    /// Acquires the device exclusively.
    ///
    /// Waitable devices register their wait primitive first. On failure the
    /// handle is dropped, releasing whatever was already set up.
    pub fn connect(mut self) -> Result<DeviceHandle<Acquired>, DeviceError> {
        if self.mode == AcquisitionMode::Waitable {
            self.guard.register_notification()?;
        }
        self.guard.acquire()?;
        Ok(self.transition())
    }
}

impl DeviceHandle<Acquired> {
    /// Reads every update buffered since the last call, oldest first.
    /// `do_poll` samples the device first, which poll-only devices require.
    pub fn drain_updates(&mut self, do_poll: bool) -> Result<Vec<RawUpdate>, DrainError> {
        let device = &mut self.guard.device;
        let result = if do_poll {
            device.poll().and_then(|_| device.buffered_data())
        } else {
            device.buffered_data()
        };
        result.map_err(|e| {
            if e.is_input_lost() {
                DrainError::Unplugged
            } else {
                DrainError::Failed(e)
            }
        })
    }

    /// Receiver of the device's wait primitive, for waitable devices.
    pub fn wait_receiver(&self) -> Option<Receiver<()>> {
        self.guard.wait_event.as_ref().map(WaitEvent::receiver)
    }

    /// Releases the device and every native resource it holds.
    pub fn disconnect(mut self) {
        self.guard.release();
    }
}
