//! Polling loop - services every poll-only device at a fixed rate

use std::sync::Arc;
use std::thread;

use super::connection_manager::ConnectionManager;
use super::controller_handle::ControllerError;
use crate::device::{Acquired, DeviceDescriptor, DeviceHandle, RawUpdate};

/// Body of the polling thread. Returns once the polled set is empty.
pub(crate) fn run(manager: Arc<ConnectionManager>) {
    let interval = manager.settings().polling_interval();
    manager.logger().info(&format!(
        "Thread started polling_hz = {} sleep duration = {} ms",
        manager.settings().polling_hz,
        interval.as_millis()
    ));

    while !manager.is_shutting_down() && !manager.registry().polled().is_empty() {
        thread::sleep(interval);
        poll_pass(&manager);
    }

    manager.logger().info("Thread exiting: no devices to poll");
}

/// Samples every polled device once and publishes what was drained.
///
/// Devices are visited in reverse order while the set is locked; unplugged
/// ones are taken out on the spot. Events and the single changed snapshot
/// for the pass are published after the lock is released. Returns the
/// number of removed devices.
pub(crate) fn poll_pass(manager: &ConnectionManager) -> usize {
    let mut batches: Vec<(DeviceDescriptor, Vec<RawUpdate>)> = Vec::new();
    let mut removed: Vec<DeviceHandle<Acquired>> = Vec::new();
    let mut failures = Vec::new();

    {
        let mut set = manager.registry().polled().lock();
        for index in (0..set.len()).rev() {
            let handle = set.handle_mut(index);
            let descriptor = handle.descriptor().clone();
            match handle.drain_updates(true) {
                Ok(updates) => {
                    if !updates.is_empty() {
                        batches.push((descriptor, updates));
                    }
                }
                Err(error) => match ControllerError::from_drain(error, &descriptor) {
                    ControllerError::DeviceUnplugged(_) => removed.push(set.remove(index)),
                    other => failures.push(other),
                },
            }
        }
    }

    for (descriptor, updates) in batches {
        manager.publisher().publish_updates(&descriptor, updates);
    }
    for failure in failures {
        manager.logger().error(&failure.to_string());
    }

    let count = removed.len();
    for handle in removed {
        manager.release(handle);
    }
    if count > 0 {
        manager.publisher().publish_changed(manager.registry().snapshot());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{VirtualBackend, VirtualDeviceSpec};
    use crate::bus::EventHub;
    use crate::controller::ControllerSettings;
    use crate::device::{DeviceError, JoystickOffset};
    use crate::events::{ControllerEvent, ControllersChangedEvent};
    use crate::logging::TracingLogger;
    use tracing_test::traced_test;

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
    fn pass_publishes_in_drain_order() {
        let (backend, hub, manager) = setup();
        let (_, mut events) = hub.bus::<ControllerEvent>().subscribe_channel(16);
        let pad = backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 10, 1, 2));
        manager.discover();

        pad.press(1);
        pad.move_axis(JoystickOffset::X, 512);
        pad.release(1);

        assert_eq!(poll_pass(&manager), 0);
        let values: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| (event.update.offset, event.update.value))
            .collect();
        assert_eq!(
            values,
            vec![
                (JoystickOffset::Button(1), 0x80),
                (JoystickOffset::X, 512),
                (JoystickOffset::Button(1), 0),
            ]
        );
        assert_eq!(pad.polls(), 1);
    }

    #[test]
    fn removals_are_aggregated_per_pass() {
        let (backend, hub, manager) = setup();
        let first = backend.plug(VirtualDeviceSpec::polled_gamepad("First", 2, 0, 0));
        let second = backend.plug(VirtualDeviceSpec::polled_gamepad("Second", 2, 0, 0));
        let third = backend.plug(VirtualDeviceSpec::polled_gamepad("Third", 2, 0, 0));
        manager.discover();
        let (_, mut changed) = hub.bus::<ControllersChangedEvent>().subscribe_channel(8);

        first.unplug();
        third.unplug();
        assert_eq!(poll_pass(&manager), 2);

        let snapshot = changed.try_recv().unwrap();
        assert_eq!(snapshot.count(), 1);
        assert_eq!(snapshot.devices[0].descriptor.id, second.id());
        assert!(changed.try_recv().is_err());
        assert_eq!(first.releases(), 1);
        assert_eq!(third.releases(), 1);
    }

    #[test]
    #[traced_test]
    fn read_failures_keep_the_device() {
        let (backend, _hub, manager) = setup();
        let pad = backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 2, 0, 0));
        manager.discover();

        pad.fail_next_read(DeviceError::Busy);
        assert_eq!(poll_pass(&manager), 0);
        assert_eq!(manager.registry().polled().len(), 1);
        assert!(logs_contain("Failed to read"));
    }
}
