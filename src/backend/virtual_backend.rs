//! In-memory device port.
//!
//! Plugged devices behave like driver-backed ones: they buffer updates only
//! while acquired, raise their notification signal on new data, and report
//! input loss once unplugged. Tests drive them through [`VirtualDevice`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{DeviceBackend, NativeDevice};
use crate::device::{
    DeviceCapabilities, DeviceCategory, DeviceDescriptor, DeviceError, DeviceId,
    DeviceProperties, JoystickOffset, PovState, RawUpdate, WaitSignal,
};

const DEFAULT_BUFFER_SIZE: usize = 16;

// Description of a virtual device to plug
#[derive(Clone, Debug)]
pub struct VirtualDeviceSpec {
    pub name: String,
    pub category: DeviceCategory,
    pub capabilities: DeviceCapabilities,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl VirtualDeviceSpec {
    pub fn new(name: impl Into<String>, category: DeviceCategory) -> Self {
        Self {
            name: name.into(),
            category,
            capabilities: DeviceCapabilities::default(),
            vendor_id: Some(0x1234),
            product_id: Some(0x5678),
        }
    }

    /// A poll-only gamepad.
    pub fn polled_gamepad(name: impl Into<String>, buttons: u32, povs: u32, axes: u32) -> Self {
        Self::new(name, DeviceCategory::Gamepad).with_controls(buttons, povs, axes, true)
    }

    /// A gamepad that signals when new data is available.
    pub fn waitable_gamepad(name: impl Into<String>, buttons: u32, povs: u32, axes: u32) -> Self {
        Self::new(name, DeviceCategory::Gamepad).with_controls(buttons, povs, axes, false)
    }

    pub fn with_controls(mut self, buttons: u32, povs: u32, axes: u32, poll_only: bool) -> Self {
        self.capabilities = DeviceCapabilities {
            button_count: buttons,
            pov_count: povs,
            axis_count: axes,
            poll_only,
            force_feedback: false,
        };
        self
    }
}

#[derive(Debug)]
struct SlotState {
    descriptor: DeviceDescriptor,
    capabilities: DeviceCapabilities,
    vendor_id: Option<u16>,
    product_id: Option<u16>,
    plugged: bool,
    acquired: bool,
    buffer_size: usize,
    queue: VecDeque<RawUpdate>,
    sequence: u32,
    notification: Option<WaitSignal>,
    fail_create: Option<DeviceError>,
    fail_acquire: Option<DeviceError>,
    fail_read: Option<DeviceError>,
    polls: usize,
    acquisitions: usize,
    releases: usize,
    open_handles: usize,
}

impl SlotState {
    fn push(&mut self, offset: JoystickOffset, value: i32) -> bool {
        if !self.plugged || !self.acquired {
            return false;
        }
        if self.queue.len() >= self.buffer_size {
            warn!(
                "Buffer overflow on {}, dropping oldest update",
                self.descriptor.instance_name
            );
            self.queue.pop_front();
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.queue
            .push_back(RawUpdate::new(offset, value, self.sequence));
        if let Some(signal) = &self.notification {
            signal.set();
        }
        true
    }
}

#[derive(Default)]
struct PortState {
    slots: Vec<Arc<Mutex<SlotState>>>,
    fail_enumeration: Option<DeviceError>,
}

/// Device port holding every plugged [`VirtualDevice`].
#[derive(Clone, Default)]
pub struct VirtualBackend {
    port: Arc<Mutex<PortState>>,
    next_id: Arc<AtomicU64>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug(&self, spec: VirtualDeviceSpec) -> VirtualDevice {
        let serial = self.next_id.fetch_add(1, Ordering::Relaxed);
        let descriptor = DeviceDescriptor {
            id: DeviceId::new(format!("virtual-{}", serial)),
            instance_name: spec.name.clone(),
            product_name: spec.name,
            category: spec.category,
        };
        debug!("Plugging virtual device {}", descriptor.id);

        let slot = Arc::new(Mutex::new(SlotState {
            descriptor,
            capabilities: spec.capabilities,
            vendor_id: spec.vendor_id,
            product_id: spec.product_id,
            plugged: true,
            acquired: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            queue: VecDeque::new(),
            sequence: 0,
            notification: None,
            fail_create: None,
            fail_acquire: None,
            fail_read: None,
            polls: 0,
            acquisitions: 0,
            releases: 0,
            open_handles: 0,
        }));
        self.port.lock().slots.push(Arc::clone(&slot));
        VirtualDevice { slot }
    }

    /// Makes every following enumeration fail with `error`, or succeed again
    /// with `None`.
    pub fn fail_enumeration(&self, error: Option<DeviceError>) {
        self.port.lock().fail_enumeration = error;
    }

    pub fn plugged_count(&self) -> usize {
        self.port
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.lock().plugged)
            .count()
    }

    fn find(&self, id: &DeviceId) -> Option<Arc<Mutex<SlotState>>> {
        self.port
            .lock()
            .slots
            .iter()
            .find(|slot| {
                let slot = slot.lock();
                slot.plugged && slot.descriptor.id == *id
            })
            .cloned()
    }
}

impl DeviceBackend for VirtualBackend {
    fn enumerate(
        &self,
        categories: &[DeviceCategory],
    ) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let port = self.port.lock();
        if let Some(error) = &port.fail_enumeration {
            return Err(error.clone());
        }
        Ok(port
            .slots
            .iter()
            .filter_map(|slot| {
                let slot = slot.lock();
                (slot.plugged && categories.contains(&slot.descriptor.category))
                    .then(|| slot.descriptor.clone())
            })
            .collect())
    }

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn NativeDevice>, DeviceError> {
        let slot = self
            .find(&descriptor.id)
            .ok_or_else(|| DeviceError::NotFound(descriptor.id.to_string()))?;
        let descriptor = {
            let mut state = slot.lock();
            if let Some(error) = state.fail_create.clone() {
                return Err(error);
            }
            state.open_handles += 1;
            state.descriptor.clone()
        };
        Ok(Box::new(VirtualNative {
            slot,
            descriptor,
            acquired: false,
        }))
    }
}

// Native handle opened on a slot
struct VirtualNative {
    slot: Arc<Mutex<SlotState>>,
    descriptor: DeviceDescriptor,
    acquired: bool,
}

impl NativeDevice for VirtualNative {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.slot.lock().capabilities
    }

    fn properties(&self) -> DeviceProperties {
        let slot = self.slot.lock();
        DeviceProperties {
            buffer_size: slot.buffer_size,
            vendor_id: slot.vendor_id,
            product_id: slot.product_id,
            axis_range: (0, 65535),
        }
    }

    fn set_buffer_size(&mut self, size: usize) -> Result<(), DeviceError> {
        let mut slot = self.slot.lock();
        if slot.acquired {
            return Err(DeviceError::Busy);
        }
        slot.buffer_size = size.max(1);
        Ok(())
    }

    fn set_notification(&mut self, signal: Option<WaitSignal>) -> Result<(), DeviceError> {
        let mut slot = self.slot.lock();
        if slot.capabilities.poll_only && signal.is_some() {
            return Err(DeviceError::Unsupported(
                "notification on a polled device".to_string(),
            ));
        }
        slot.notification = signal;
        Ok(())
    }

    fn acquire(&mut self) -> Result<(), DeviceError> {
        let mut slot = self.slot.lock();
        if !slot.plugged {
            return Err(DeviceError::NotRegistered);
        }
        if let Some(error) = slot.fail_acquire.clone() {
            return Err(error);
        }
        if slot.acquired {
            return Err(DeviceError::Busy);
        }
        slot.acquired = true;
        slot.acquisitions += 1;
        self.acquired = true;
        Ok(())
    }

    fn unacquire(&mut self) -> Result<(), DeviceError> {
        if !self.acquired {
            return Ok(());
        }
        let mut slot = self.slot.lock();
        slot.acquired = false;
        slot.queue.clear();
        self.acquired = false;
        Ok(())
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        let mut slot = self.slot.lock();
        if !slot.plugged {
            return Err(DeviceError::InputLost);
        }
        slot.polls += 1;
        Ok(())
    }

    fn buffered_data(&mut self) -> Result<Vec<RawUpdate>, DeviceError> {
        let mut slot = self.slot.lock();
        if !slot.plugged {
            return Err(DeviceError::InputLost);
        }
        if let Some(error) = slot.fail_read.take() {
            return Err(error);
        }
        if !self.acquired {
            return Err(DeviceError::Backend("device not acquired".to_string()));
        }
        Ok(slot.queue.drain(..).collect())
    }
}

impl Drop for VirtualNative {
    fn drop(&mut self) {
        let _ = self.unacquire();
        let mut slot = self.slot.lock();
        slot.notification = None;
        slot.open_handles = slot.open_handles.saturating_sub(1);
        slot.releases += 1;
    }
}

/// Test-side controller of a plugged virtual device.
#[derive(Clone)]
pub struct VirtualDevice {
    slot: Arc<Mutex<SlotState>>,
}

impl VirtualDevice {
    pub fn id(&self) -> DeviceId {
        self.slot.lock().descriptor.id.clone()
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        self.slot.lock().descriptor.clone()
    }

    /// Buffers a raw update. Returns false when the device is not acquired.
    pub fn push(&self, offset: JoystickOffset, value: i32) -> bool {
        self.slot.lock().push(offset, value)
    }

    pub fn press(&self, button: u8) -> bool {
        self.push(JoystickOffset::Button(button), 0x80)
    }

    pub fn release(&self, button: u8) -> bool {
        self.push(JoystickOffset::Button(button), 0)
    }

    pub fn move_axis(&self, offset: JoystickOffset, value: i32) -> bool {
        self.push(offset, value)
    }

    pub fn set_pov(&self, index: u8, state: PovState) -> bool {
        match JoystickOffset::pov(index) {
            Some(offset) => self.push(offset, state.to_raw()),
            None => false,
        }
    }

    /// Removes the device from the port. Open handles report input loss and
    /// waiting readers are woken.
    pub fn unplug(&self) {
        let mut slot = self.slot.lock();
        slot.plugged = false;
        if let Some(signal) = &slot.notification {
            signal.set();
        }
    }

    pub fn fail_create(&self, error: Option<DeviceError>) {
        self.slot.lock().fail_create = error;
    }

    pub fn fail_acquire(&self, error: Option<DeviceError>) {
        self.slot.lock().fail_acquire = error;
    }

    /// Makes the next read fail once with `error`.
    pub fn fail_next_read(&self, error: DeviceError) {
        let mut slot = self.slot.lock();
        slot.fail_read = Some(error);
        if let Some(signal) = &slot.notification {
            signal.set();
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.slot.lock().acquired
    }

    pub fn has_notification(&self) -> bool {
        self.slot.lock().notification.is_some()
    }

    pub fn open_handles(&self) -> usize {
        self.slot.lock().open_handles
    }

    pub fn acquisitions(&self) -> usize {
        self.slot.lock().acquisitions
    }

    pub fn releases(&self) -> usize {
        self.slot.lock().releases
    }

    pub fn polls(&self) -> usize {
        self.slot.lock().polls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerates_only_plugged_devices_of_requested_categories() {
        let backend = VirtualBackend::new();
        let pad = backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 10, 1, 2));
        let _wheel = backend.plug(VirtualDeviceSpec::new("Wheel", DeviceCategory::Driving));

        let found = backend.enumerate(&[DeviceCategory::Gamepad]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, pad.id());

        pad.unplug();
        assert!(backend
            .enumerate(&DeviceCategory::ACCEPTED)
            .unwrap()
            .iter()
            .all(|descriptor| descriptor.id != pad.id()));
    }

    #[test]
    fn buffers_only_while_acquired() {
        let backend = VirtualBackend::new();
        let pad = backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 4, 0, 2));
        let mut native = backend.create(&pad.descriptor()).unwrap();

        assert!(!pad.press(1));
        native.acquire().unwrap();
        assert!(pad.press(1));
        assert!(pad.release(1));

        let updates = native.buffered_data().unwrap();
        assert_eq!(updates.len(), 2);
        assert!(updates[0].sequence < updates[1].sequence);
        assert!(native.buffered_data().unwrap().is_empty());

        pad.unplug();
        assert_eq!(native.buffered_data(), Err(DeviceError::InputLost));
        drop(native);
        assert_eq!(pad.open_handles(), 0);
        assert_eq!(pad.releases(), 1);
    }

    #[test]
    fn enumeration_failure_can_be_injected() {
        let backend = VirtualBackend::new();
        backend.fail_enumeration(Some(DeviceError::Backend("bus reset".into())));
        assert!(backend.enumerate(&DeviceCategory::ACCEPTED).is_err());
        backend.fail_enumeration(None);
        assert!(backend.enumerate(&DeviceCategory::ACCEPTED).is_ok());
    }
}
