//! Waiting loop - blocks until a waitable device signals new input
//!
//! The wait list holds the new-device signal at index 0 followed by one
//! receiver per waitable device. It is rebuilt whenever the set may have
//! changed: on the new-device signal, after a removal, or when a receiver
//! turns out to belong to a released device.

use crossbeam::channel::{Receiver, Select};
use std::sync::Arc;

use super::connection_manager::ConnectionManager;
use super::controller_handle::ControllerError;
use crate::device::DeviceId;

enum Wake {
    NewDevice,
    Device(DeviceId),
    Stale,
}

enum Serviced {
    Kept,
    Removed,
    Gone,
}

/// Body of the waiting thread. Returns once the waitable set is empty.
pub(crate) fn run(manager: Arc<ConnectionManager>) {
    manager.logger().info("Thread started");
    let new_device = manager.new_device_receiver();
    let mut wait_list = build_wait_list(&manager);

    while !manager.is_shutting_down() && !manager.registry().waitable().is_empty() {
        let wake = {
            let mut select = Select::new();
            select.recv(&new_device);
            for (_, receiver) in &wait_list {
                select.recv(receiver);
            }
            let operation = select.select();
            match operation.index() {
                0 => match operation.recv(&new_device) {
                    Ok(()) => Wake::NewDevice,
                    Err(_) => Wake::Stale,
                },
                index => {
                    let (id, receiver) = &wait_list[index - 1];
                    match operation.recv(receiver) {
                        Ok(()) => Wake::Device(id.clone()),
                        Err(_) => Wake::Stale,
                    }
                }
            }
        };

        match wake {
            Wake::NewDevice | Wake::Stale => wait_list = build_wait_list(&manager),
            Wake::Device(id) => match service(&manager, &id) {
                Serviced::Kept => {}
                Serviced::Removed | Serviced::Gone => wait_list = build_wait_list(&manager),
            },
        }
    }

    manager.logger().info("Thread exiting: no devices to wait for");
}

fn build_wait_list(manager: &ConnectionManager) -> Vec<(DeviceId, Receiver<()>)> {
    manager.registry().waitable().lock().wait_receivers()
}

// Drains the device that signalled and publishes its updates
fn service(manager: &ConnectionManager, id: &DeviceId) -> Serviced {
    let (descriptor, drained) = {
        let mut set = manager.registry().waitable().lock();
        let Some(index) = set.position(id) else {
            return Serviced::Gone;
        };
        let handle = set.handle_mut(index);
        let descriptor = handle.descriptor().clone();
        match handle.drain_updates(false) {
            Ok(updates) => (descriptor, Ok(updates)),
            Err(error) => match ControllerError::from_drain(error, &descriptor) {
                ControllerError::DeviceUnplugged(_) => (descriptor, Err(Some(set.remove(index)))),
                other => {
                    manager.logger().error(&other.to_string());
                    (descriptor, Err(None))
                }
            },
        }
    };

    match drained {
        Ok(updates) => {
            manager.publisher().publish_updates(&descriptor, updates);
            Serviced::Kept
        }
        Err(Some(handle)) => {
            manager.release(handle);
            manager
                .publisher()
                .publish_changed(manager.registry().snapshot());
            Serviced::Removed
        }
        Err(None) => Serviced::Kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{VirtualBackend, VirtualDeviceSpec};
    use crate::bus::EventHub;
    use crate::controller::ControllerSettings;
    use crate::events::{ControllerEvent, ControllersChangedEvent};
    use crate::logging::TracingLogger;

    fn setup() -> (VirtualBackend, EventHub, ConnectionManager) {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = ConnectionManager::new(
            Arc::new(backend.clone()),
            &hub,
            ControllerSettings::default(),
            Arc::new(TracingLogger::default()),
        );
        (backend, hub, manager)
    }

    #[test]
    fn service_publishes_signalled_device() {
        let (backend, hub, manager) = setup();
        let (_, mut events) = hub.bus::<ControllerEvent>().subscribe_channel(8);
        let pad = backend.plug(VirtualDeviceSpec::waitable_gamepad("Pad", 4, 0, 2));
        manager.discover();

        let wait_list = build_wait_list(&manager);
        assert_eq!(wait_list.len(), 1);
        pad.press(2);
        assert!(wait_list[0].1.try_recv().is_ok());

        assert!(matches!(service(&manager, &pad.id()), Serviced::Kept));
        assert_eq!(events.try_recv().unwrap().to_string(), "Pad (Button 2 pressed)");
    }

    #[test]
    fn service_removes_unplugged_device() {
        let (backend, hub, manager) = setup();
        let pad = backend.plug(VirtualDeviceSpec::waitable_gamepad("Pad", 4, 0, 2));
        manager.discover();
        let (_, mut changed) = hub.bus::<ControllersChangedEvent>().subscribe_channel(4);

        pad.unplug();
        assert!(matches!(service(&manager, &pad.id()), Serviced::Removed));
        assert_eq!(changed.try_recv().unwrap().count(), 0);
        assert!(matches!(service(&manager, &pad.id()), Serviced::Gone));
        assert!(build_wait_list(&manager).is_empty());
    }
}
