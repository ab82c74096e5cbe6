//! Gamepad backend built on gilrs.
//!
//! gilrs is event driven, so every gamepad it reports is a waitable device. A
//! pump thread owns the `Gilrs` context, turns its events into per-gamepad
//! buffered updates and raises the notification signal of the gamepad the
//! event belongs to.

use chrono::{DateTime, Local};
use crossbeam::channel::{self, Sender};
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{DeviceBackend, NativeDevice};
use crate::device::{
    DeviceCapabilities, DeviceCategory, DeviceDescriptor, DeviceError, DeviceId,
    DeviceProperties, JoystickOffset, PovState, RawUpdate, WaitSignal,
};

const PUMP_THREAD_NAME: &str = "joybus-gilrs";
const PUMP_TIMEOUT: Duration = Duration::from_millis(50);
const DEFAULT_BUFFER_SIZE: usize = 128;

// Face, shoulder, menu and thumb buttons in index order. D-pad buttons feed POV 0.
const BUTTON_ORDER: [Button; 15] = [
    Button::South,
    Button::East,
    Button::North,
    Button::West,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
    Button::C,
    Button::Z,
];

const AXIS_COUNT: u32 = 6;

#[derive(Debug, Default, Clone, Copy)]
struct DpadState {
    up: bool,
    right: bool,
    down: bool,
    left: bool,
}

impl DpadState {
    fn pov(&self) -> PovState {
        let vertical = match (self.up, self.down) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        };
        let horizontal = match (self.right, self.left) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        };
        match (vertical, horizontal) {
            (1, 0) => PovState::Up,
            (1, 1) => PovState::UpRight,
            (0, 1) => PovState::Right,
            (-1, 1) => PovState::DownRight,
            (-1, 0) => PovState::Down,
            (-1, -1) => PovState::DownLeft,
            (0, -1) => PovState::Left,
            (1, -1) => PovState::UpLeft,
            _ => PovState::Centered,
        }
    }
}

#[derive(Debug)]
struct PadSlot {
    descriptor: DeviceDescriptor,
    capabilities: DeviceCapabilities,
    vendor_id: Option<u16>,
    product_id: Option<u16>,
    connected: bool,
    acquired: bool,
    buffer_size: usize,
    queue: VecDeque<RawUpdate>,
    sequence: u32,
    notification: Option<WaitSignal>,
    dpad: DpadState,
    // Bumped whenever the gamepad id is reused by a new connection
    generation: u64,
}

impl PadSlot {
    fn from_gamepad(index: usize, gamepad: &Gamepad<'_>) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                id: DeviceId::new(format!("gilrs-{}", index)),
                instance_name: gamepad.name().to_string(),
                product_name: gamepad.os_name().to_string(),
                category: DeviceCategory::Gamepad,
            },
            capabilities: DeviceCapabilities {
                button_count: BUTTON_ORDER.len() as u32,
                pov_count: 1,
                axis_count: AXIS_COUNT,
                poll_only: false,
                force_feedback: gamepad.is_ff_supported(),
            },
            vendor_id: gamepad.vendor_id(),
            product_id: gamepad.product_id(),
            connected: true,
            acquired: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            queue: VecDeque::new(),
            sequence: 0,
            notification: None,
            dpad: DpadState::default(),
            generation: 0,
        }
    }

    fn push(&mut self, offset: JoystickOffset, value: i32, timestamp: DateTime<Local>) {
        if !self.acquired {
            return;
        }
        if self.queue.len() >= self.buffer_size {
            warn!(
                "Buffer overflow on {}, dropping oldest update",
                self.descriptor.instance_name
            );
            self.queue.pop_front();
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.queue.push_back(RawUpdate {
            offset,
            value,
            sequence: self.sequence,
            timestamp,
        });
        if let Some(signal) = &self.notification {
            signal.set();
        }
    }
}

type SharedPads = Arc<Mutex<HashMap<usize, PadSlot>>>;

// A reused gamepad id gets a fresh slot. A device still opened on the old one
// loses its input and is woken so its reader notices.
fn install_slot(pads: &mut HashMap<usize, PadSlot>, index: usize, mut slot: PadSlot) {
    if let Some(old) = pads.get(&index) {
        slot.generation = old.generation.wrapping_add(1);
        if let Some(signal) = &old.notification {
            debug!("Gamepad [{}] reconnected while still open", index);
            signal.set();
        }
    }
    pads.insert(index, slot);
}

/// Backend reading every gamepad gilrs can see.
pub struct GilrsBackend {
    pads: SharedPads,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl GilrsBackend {
    /// Starts the gilrs pump thread and waits until gilrs is initialized.
    ///
    /// Fails when gilrs cannot be initialized on this platform.
    pub fn new() -> Result<Self, DeviceError> {
        let pads: SharedPads = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = channel::bounded(1);

        let pump = thread::Builder::new()
            .name(PUMP_THREAD_NAME.to_string())
            .spawn({
                let pads = Arc::clone(&pads);
                let running = Arc::clone(&running);
                move || run_pump(pads, running, ready_tx)
            })
            .map_err(|e| DeviceError::Backend(format!("failed to spawn gilrs pump: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("gilrs backend ready");
                Ok(Self {
                    pads,
                    running,
                    pump: Some(pump),
                })
            }
            Ok(Err(e)) => {
                let _ = pump.join();
                Err(e)
            }
            Err(_) => {
                let _ = pump.join();
                Err(DeviceError::Backend(
                    "gilrs pump exited during startup".to_string(),
                ))
            }
        }
    }
}

impl Drop for GilrsBackend {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                error!("gilrs pump thread panicked");
            }
        }
    }
}

fn run_pump(pads: SharedPads, running: Arc<AtomicBool>, ready: Sender<Result<(), DeviceError>>) {
    let mut gilrs = match Gilrs::new() {
        Ok(g) => {
            info!("Successfully initialized gilrs");
            g
        }
        Err(e) => {
            error!("Failed to initialize gilrs: {}", e);
            let _ = ready.send(Err(DeviceError::Backend(e.to_string())));
            return;
        }
    };

    {
        let mut pads = pads.lock();
        for (id, gamepad) in gilrs.gamepads() {
            let index: usize = id.into();
            info!("Found gamepad [{}] {}", index, gamepad.name());
            install_slot(&mut pads, index, PadSlot::from_gamepad(index, &gamepad));
        }
    }
    let _ = ready.send(Ok(()));

    while running.load(Ordering::Acquire) {
        let Some(Event { id, event, time, .. }) = gilrs.next_event_blocking(Some(PUMP_TIMEOUT))
        else {
            continue;
        };
        let timestamp = DateTime::<Local>::from(time);
        let index: usize = id.into();

        match event {
            EventType::Connected => {
                if let Some(gamepad) = gilrs.connected_gamepad(id) {
                    info!("Gamepad connected [{}] {}", index, gamepad.name());
                    install_slot(
                        &mut pads.lock(),
                        index,
                        PadSlot::from_gamepad(index, &gamepad),
                    );
                }
            }
            EventType::Disconnected => {
                info!("Gamepad disconnected [{}]", index);
                if let Some(slot) = pads.lock().get_mut(&index) {
                    slot.connected = false;
                    if let Some(signal) = &slot.notification {
                        signal.set();
                    }
                }
            }
            EventType::ButtonPressed(button, _) => {
                handle_button(&pads, id, button, true, timestamp);
            }
            EventType::ButtonReleased(button, _) => {
                handle_button(&pads, id, button, false, timestamp);
            }
            EventType::AxisChanged(axis, value, _) => {
                if let Some((offset, raw)) = map_axis(axis, value) {
                    if let Some(slot) = pads.lock().get_mut(&index) {
                        slot.push(offset, raw, timestamp);
                    }
                } else {
                    debug!("Ignoring unsupported axis: {:?}", axis);
                }
            }
            _ => {}
        }
    }
    debug!("gilrs pump exiting");
}

fn handle_button(
    pads: &SharedPads,
    id: GamepadId,
    button: Button,
    pressed: bool,
    timestamp: DateTime<Local>,
) {
    let index: usize = id.into();
    let mut pads = pads.lock();
    let Some(slot) = pads.get_mut(&index) else {
        return;
    };

    let dpad = match button {
        Button::DPadUp => Some(&mut slot.dpad.up),
        Button::DPadRight => Some(&mut slot.dpad.right),
        Button::DPadDown => Some(&mut slot.dpad.down),
        Button::DPadLeft => Some(&mut slot.dpad.left),
        _ => None,
    };
    if let Some(direction) = dpad {
        *direction = pressed;
        let pov = slot.dpad.pov();
        slot.push(JoystickOffset::PointOfViewControllers0, pov.to_raw(), timestamp);
        return;
    }

    match BUTTON_ORDER.iter().position(|candidate| *candidate == button) {
        Some(position) => slot.push(
            JoystickOffset::Button(position as u8),
            if pressed { 0x80 } else { 0 },
            timestamp,
        ),
        None => debug!("Ignoring unmapped button: {:?}", button),
    }
}

// Scales gilrs' -1.0..=1.0 into the 0..=65535 HID range. Y grows downwards.
fn map_axis(axis: Axis, value: f32) -> Option<(JoystickOffset, i32)> {
    let (offset, value) = match axis {
        Axis::LeftStickX => (JoystickOffset::X, value),
        Axis::LeftStickY => (JoystickOffset::Y, -value),
        Axis::LeftZ => (JoystickOffset::Z, value),
        Axis::RightStickX => (JoystickOffset::RotationX, value),
        Axis::RightStickY => (JoystickOffset::RotationY, -value),
        Axis::RightZ => (JoystickOffset::RotationZ, value),
        _ => return None,
    };
    let scaled = ((value.clamp(-1.0, 1.0) + 1.0) * 0.5 * 65535.0).round() as i32;
    Some((offset, scaled))
}

impl DeviceBackend for GilrsBackend {
    fn enumerate(
        &self,
        categories: &[DeviceCategory],
    ) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut found: Vec<(usize, DeviceDescriptor)> = self
            .pads
            .lock()
            .iter()
            .filter(|(_, slot)| slot.connected && categories.contains(&slot.descriptor.category))
            .map(|(index, slot)| (*index, slot.descriptor.clone()))
            .collect();
        found.sort_by_key(|(index, _)| *index);
        Ok(found.into_iter().map(|(_, descriptor)| descriptor).collect())
    }

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn NativeDevice>, DeviceError> {
        let pads = self.pads.lock();
        let (index, slot) = pads
            .iter()
            .find(|(_, slot)| slot.descriptor.id == descriptor.id)
            .ok_or_else(|| DeviceError::NotFound(descriptor.id.to_string()))?;
        if !slot.connected {
            return Err(DeviceError::NotRegistered);
        }
        Ok(Box::new(GilrsDevice {
            pads: Arc::clone(&self.pads),
            index: *index,
            generation: slot.generation,
            descriptor: descriptor.clone(),
            acquired: false,
        }))
    }
}

struct GilrsDevice {
    pads: SharedPads,
    index: usize,
    generation: u64,
    descriptor: DeviceDescriptor,
    acquired: bool,
}

impl GilrsDevice {
    fn with_slot<T>(
        &self,
        f: impl FnOnce(&mut PadSlot) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut pads = self.pads.lock();
        match pads.get_mut(&self.index) {
            Some(slot) if slot.generation == self.generation => f(slot),
            _ => Err(DeviceError::InputLost),
        }
    }
}

impl NativeDevice for GilrsDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.with_slot(|slot| Ok(slot.capabilities))
            .unwrap_or_default()
    }

    fn properties(&self) -> DeviceProperties {
        self.with_slot(|slot| {
            Ok(DeviceProperties {
                buffer_size: slot.buffer_size,
                vendor_id: slot.vendor_id,
                product_id: slot.product_id,
                axis_range: (0, 65535),
            })
        })
        .unwrap_or_default()
    }

    fn set_buffer_size(&mut self, size: usize) -> Result<(), DeviceError> {
        self.with_slot(|slot| {
            slot.buffer_size = size.max(1);
            Ok(())
        })
    }

    fn set_notification(&mut self, signal: Option<WaitSignal>) -> Result<(), DeviceError> {
        self.with_slot(|slot| {
            slot.notification = signal;
            Ok(())
        })
    }

    fn acquire(&mut self) -> Result<(), DeviceError> {
        self.with_slot(|slot| {
            if !slot.connected {
                return Err(DeviceError::NotRegistered);
            }
            if slot.acquired {
                return Err(DeviceError::Busy);
            }
            slot.acquired = true;
            Ok(())
        })?;
        self.acquired = true;
        Ok(())
    }

    fn unacquire(&mut self) -> Result<(), DeviceError> {
        if !self.acquired {
            return Ok(());
        }
        self.acquired = false;
        self.with_slot(|slot| {
            slot.acquired = false;
            slot.queue.clear();
            Ok(())
        })
    }

    fn poll(&mut self) -> Result<(), DeviceError> {
        self.with_slot(|slot| {
            if slot.connected {
                Ok(())
            } else {
                Err(DeviceError::InputLost)
            }
        })
    }

    fn buffered_data(&mut self) -> Result<Vec<RawUpdate>, DeviceError> {
        self.with_slot(|slot| {
            if !slot.connected {
                return Err(DeviceError::InputLost);
            }
            Ok(slot.queue.drain(..).collect())
        })
    }
}

impl Drop for GilrsDevice {
    fn drop(&mut self) {
        let _ = self.unacquire();
        let _ = self.with_slot(|slot| {
            slot.notification = None;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::WaitEvent;

    fn slot(index: usize) -> PadSlot {
        PadSlot {
            descriptor: DeviceDescriptor {
                id: DeviceId::new(format!("gilrs-{}", index)),
                instance_name: "Pad".to_string(),
                product_name: "Pad".to_string(),
                category: DeviceCategory::Gamepad,
            },
            capabilities: DeviceCapabilities::default(),
            vendor_id: None,
            product_id: None,
            connected: true,
            acquired: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            queue: VecDeque::new(),
            sequence: 0,
            notification: None,
            dpad: DpadState::default(),
            generation: 0,
        }
    }

    // No pump thread, slots are installed by hand
    fn offline_backend() -> GilrsBackend {
        GilrsBackend {
            pads: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            pump: None,
        }
    }

    #[test]
    fn reused_gamepad_id_cuts_off_the_open_device() {
        let backend = offline_backend();
        install_slot(&mut backend.pads.lock(), 0, slot(0));
        let descriptor = slot(0).descriptor;

        let wait_event = WaitEvent::new();
        let mut stale = backend.create(&descriptor).unwrap();
        stale.set_notification(Some(wait_event.signal())).unwrap();
        stale.acquire().unwrap();

        install_slot(&mut backend.pads.lock(), 0, slot(0));
        assert!(wait_event.is_set());
        assert!(matches!(stale.buffered_data(), Err(DeviceError::InputLost)));

        let mut fresh = backend.create(&descriptor).unwrap();
        fresh.acquire().unwrap();
        // Releasing the stale device leaves the new slot alone
        drop(stale);
        if let Some(slot) = backend.pads.lock().get_mut(&0) {
            slot.push(JoystickOffset::X, 7, Local::now());
        }
        assert_eq!(fresh.buffered_data().unwrap().len(), 1);
    }

    #[test]
    fn dpad_combinations_map_to_pov_directions() {
        let mut dpad = DpadState::default();
        assert_eq!(dpad.pov(), PovState::Centered);
        dpad.up = true;
        assert_eq!(dpad.pov(), PovState::Up);
        dpad.right = true;
        assert_eq!(dpad.pov(), PovState::UpRight);
        dpad.up = false;
        dpad.down = true;
        assert_eq!(dpad.pov(), PovState::DownRight);
        dpad.left = true;
        assert_eq!(dpad.pov(), PovState::Down);
    }

    #[test]
    fn axes_scale_to_hid_range() {
        assert_eq!(map_axis(Axis::LeftStickX, -1.0), Some((JoystickOffset::X, 0)));
        assert_eq!(map_axis(Axis::LeftStickX, 1.0), Some((JoystickOffset::X, 65535)));
        assert_eq!(map_axis(Axis::LeftStickY, 1.0), Some((JoystickOffset::Y, 0)));
        assert_eq!(
            map_axis(Axis::RightZ, 0.0),
            Some((JoystickOffset::RotationZ, 32768))
        );
        assert_eq!(map_axis(Axis::DPadX, 1.0), None);
    }

    #[test]
    fn button_order_has_no_duplicates() {
        for (index, button) in BUTTON_ORDER.iter().enumerate() {
            assert_eq!(
                BUTTON_ORDER.iter().position(|candidate| candidate == button),
                Some(index)
            );
        }
    }
}
