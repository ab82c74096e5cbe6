//! Connection Manager - discovery, registration and removal of devices
//!
//! The manager is the only component that adds devices to the registry.
//! Discovery runs on the connector thread of the
//! [`ControllerHandle`](super::ControllerHandle) or on demand; the acquisition
//! loops only ever take devices out when they are unplugged.
//!
//! # Locking
//!
//! Every set is locked for a whole loop pass. Discovery inserts under the same
//! lock, so it never changes a set a loop is walking. Events are always
//! published after the set lock and the discovery lock are released;
//! subscribers may call back into the manager.

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::controller_handle::{ControllerError, ControllerSettings};
use super::event_processor::EventPublisher;
use super::loop_thread::LoopThread;
use super::registry::DeviceRegistry;
use super::{polling, waiting};
use crate::backend::DeviceBackend;
use crate::bus::EventHub;
use crate::device::{
    AcquisitionMode, Acquired, ConnectedDeviceInfo, Created, DeviceDescriptor, DeviceError,
    DeviceHandle, DeviceId, WaitEvent,
};
use crate::logging::Logger;

pub const POLLING_THREAD_NAME: &str = "joybus-polling";
pub const WAITING_THREAD_NAME: &str = "joybus-waiting";

pub struct ConnectionManager {
    backend: Arc<dyn DeviceBackend>,
    settings: ControllerSettings,
    logger: Arc<dyn Logger>,
    publisher: EventPublisher,
    registry: DeviceRegistry,
    // Wakes the waiting loop so it rebuilds its wait list
    new_device: WaitEvent,
    // Serializes discovery against itself and against shutdown
    discovery: Mutex<()>,
    shutting_down: AtomicBool,
    polling: Mutex<LoopThread>,
    waiting: Mutex<LoopThread>,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        hub: &EventHub,
        settings: ControllerSettings,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            backend,
            settings,
            logger,
            publisher: EventPublisher::new(hub),
            registry: DeviceRegistry::new(),
            new_device: WaitEvent::new(),
            discovery: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            polling: Mutex::new(LoopThread::new(POLLING_THREAD_NAME)),
            waiting: Mutex::new(LoopThread::new(WAITING_THREAD_NAME)),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub(crate) fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub(crate) fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub(crate) fn new_device_receiver(&self) -> Receiver<()> {
        self.new_device.receiver()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Connects every present device that is not registered yet.
    ///
    /// Each connected device is published as a new snapshot. Failures are
    /// logged and the device is left for the next discovery pass. Returns the
    /// number of devices added.
    pub fn discover(&self) -> usize {
        let pass = {
            let _serial = self.discovery.lock();
            if self.is_shutting_down() {
                return 0;
            }
            self.connect_new()
        };

        // Subscribers run without the discovery lock and may call back in
        match pass {
            Ok(snapshots) => {
                let added = snapshots.len();
                for snapshot in snapshots {
                    self.publisher.publish_changed(snapshot);
                }
                if added > 0 {
                    debug!("Discovery added {} device(s)", added);
                }
                added
            }
            Err(message) => {
                self.publisher.publish_fault(message);
                0
            }
        }
    }

    // One snapshot per added device, or the enumeration failure message
    fn connect_new(&self) -> Result<Vec<Vec<ConnectedDeviceInfo>>, String> {
        let descriptors = self
            .backend
            .enumerate(&self.settings.device_categories)
            .map_err(|e| {
                let error = ControllerError::EnumerationFailed(e).to_string();
                self.logger.error(&error);
                error
            })?;

        let mut snapshots = Vec::new();
        for descriptor in descriptors {
            if self.registry.contains(&descriptor.id) {
                continue;
            }
            match self.connect(&descriptor) {
                Ok(handle) => {
                    if self.register(handle) {
                        snapshots.push(self.registry.snapshot());
                    }
                }
                Err(error) => self.report_connect_failure(&error),
            }
        }
        Ok(snapshots)
    }

    fn connect(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<DeviceHandle<Acquired>, ControllerError> {
        let acquisition_failed = |source: DeviceError| ControllerError::AcquisitionFailed {
            device: descriptor.instance_name.clone(),
            source,
        };
        DeviceHandle::<Created>::create(
            self.backend.as_ref(),
            descriptor,
            self.settings.device_buffer_size,
        )
        .map_err(acquisition_failed)?
        .connect()
        .map_err(acquisition_failed)
    }

    fn register(&self, handle: DeviceHandle<Acquired>) -> bool {
        let descriptor = handle.descriptor().clone();
        match self.registry.insert(handle) {
            Ok(mode) => {
                if mode == AcquisitionMode::Waitable {
                    self.new_device.set();
                }
                self.logger.info(&format!(
                    "Connected {}: {}",
                    descriptor.category, descriptor.instance_name
                ));
                true
            }
            Err(duplicate) => {
                self.logger.warning(&format!(
                    "Device {} is already connected",
                    descriptor.instance_name
                ));
                duplicate.disconnect();
                false
            }
        }
    }

    fn report_connect_failure(&self, error: &ControllerError) {
        match error {
            ControllerError::AcquisitionFailed { source, .. } if source.is_transient() => {
                self.logger.warning(&format!(
                    "{} (often seen while a device is being unplugged)",
                    error
                ));
            }
            _ => self.logger.error(&error.to_string()),
        }
    }

    /// Removes the device from whichever set holds it and releases it.
    /// Returns false if it was not connected.
    pub fn remove_device(&self, id: &DeviceId) -> bool {
        let Some(handle) = self.registry.remove(id) else {
            return false;
        };
        let waitable = handle.is_waitable();
        self.release(handle);
        if waitable {
            self.new_device.set();
        }
        self.publisher.publish_changed(self.registry.snapshot());
        true
    }

    pub(crate) fn release(&self, handle: DeviceHandle<Acquired>) {
        let descriptor = handle.descriptor();
        self.logger.info(&format!(
            "Disconnected {}: {}",
            descriptor.category, descriptor.instance_name
        ));
        handle.disconnect();
    }

    /// Point-in-time copy of every connected device, polled ones first.
    pub fn snapshot(&self) -> Vec<ConnectedDeviceInfo> {
        self.registry.snapshot()
    }

    /// Starts each loop whose set has devices and whose thread is not alive.
    pub fn ensure_loops(self: &Arc<Self>) -> Result<(), ControllerError> {
        if self.is_shutting_down() {
            return Ok(());
        }
        if !self.registry.polled().is_empty() {
            let manager = Arc::clone(self);
            self.polling
                .lock()
                .start(move || polling::run(manager))
                .map_err(|e| {
                    ControllerError::Initialization(format!("Failed to spawn polling thread: {}", e))
                })?;
        }
        if !self.registry.waitable().is_empty() {
            let manager = Arc::clone(self);
            self.waiting
                .lock()
                .start(move || waiting::run(manager))
                .map_err(|e| {
                    ControllerError::Initialization(format!("Failed to spawn waiting thread: {}", e))
                })?;
        }
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.polling.lock().is_running()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.lock().is_running()
    }

    /// Releases every device and stops both loops. Further discovery is a
    /// no-op.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = {
            let _serial = self.discovery.lock();
            self.registry.drain()
        };
        let released = handles.len();
        for handle in handles {
            self.release(handle);
        }
        self.new_device.set();

        let mut polling = self.polling.lock().take();
        polling.join();
        let mut waiting = self.waiting.lock().take();
        waiting.join();
        self.logger
            .info(&format!("Shut down, released {} device(s)", released));
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{VirtualBackend, VirtualDeviceSpec};
    use crate::events::{ControllersChangedEvent, EnumerationFault};
    use crate::logging::TracingLogger;
    use crossbeam::channel;
    use std::thread;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn manager(backend: &VirtualBackend, hub: &EventHub) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(backend.clone()),
            hub,
            ControllerSettings::default(),
            Arc::new(TracingLogger::default()),
        )
    }

    #[test]
    fn discovery_routes_and_deduplicates() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = manager(&backend, &hub);
        backend.plug(VirtualDeviceSpec::polled_gamepad("Polled", 10, 1, 2));
        backend.plug(VirtualDeviceSpec::waitable_gamepad("Waitable", 4, 0, 2));

        assert_eq!(manager.discover(), 2);
        assert_eq!(manager.discover(), 0);
        assert_eq!(manager.registry().polled().len(), 1);
        assert_eq!(manager.registry().waitable().len(), 1);
    }

    #[test]
    fn each_connection_publishes_a_snapshot() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = manager(&backend, &hub);
        let (_, mut changed) = hub.bus::<ControllersChangedEvent>().subscribe_channel(8);
        backend.plug(VirtualDeviceSpec::polled_gamepad("A", 1, 0, 0));
        backend.plug(VirtualDeviceSpec::polled_gamepad("B", 1, 0, 0));

        manager.discover();
        assert_eq!(changed.try_recv().map(|e| e.count()).ok(), Some(1));
        assert_eq!(changed.try_recv().map(|e| e.count()).ok(), Some(2));
    }

    #[test]
    fn changed_subscribers_may_discover_again() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = Arc::new(manager(&backend, &hub));
        let nested = Arc::new(Mutex::new(Vec::new()));
        {
            let weak = Arc::downgrade(&manager);
            let nested = Arc::clone(&nested);
            hub.subscribe(move |_, _: &ControllersChangedEvent| {
                if let Some(manager) = weak.upgrade() {
                    let added = manager.discover();
                    nested.lock().push(added);
                }
            });
        }
        backend.plug(VirtualDeviceSpec::polled_gamepad("Polled", 1, 0, 0));
        backend.plug(VirtualDeviceSpec::waitable_gamepad("Waitable", 1, 0, 0));

        let (done_tx, done_rx) = channel::bounded(1);
        let worker = Arc::clone(&manager);
        thread::spawn(move || {
            let _ = done_tx.send(worker.discover());
        });

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(3)), Ok(2));
        // Both devices were registered before the first snapshot went out
        assert_eq!(*nested.lock(), vec![0, 0]);
    }

    #[test]
    #[traced_test]
    fn enumeration_failure_publishes_fault() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = manager(&backend, &hub);
        let (_, mut faults) = hub.bus::<EnumerationFault>().subscribe_channel(4);
        backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 1, 0, 0));
        backend.fail_enumeration(Some(DeviceError::Backend("driver gone".to_string())));

        assert_eq!(manager.discover(), 0);
        assert!(manager.snapshot().is_empty());
        assert!(faults.try_recv().unwrap().message.contains("driver gone"));
        assert!(logs_contain("Failed to enumerate devices"));
    }

    #[test]
    #[traced_test]
    fn transient_failures_log_a_warning() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = manager(&backend, &hub);
        let pad = backend.plug(VirtualDeviceSpec::polled_gamepad("Flaky", 1, 0, 0));
        pad.fail_acquire(Some(DeviceError::NotRegistered));

        assert_eq!(manager.discover(), 0);
        assert!(logs_contain("often seen while a device is being unplugged"));
        assert_eq!(pad.open_handles(), 0);

        pad.fail_acquire(None);
        assert_eq!(manager.discover(), 1);
    }

    #[test]
    fn remove_device_is_idempotent() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = manager(&backend, &hub);
        let pad = backend.plug(VirtualDeviceSpec::waitable_gamepad("Pad", 1, 0, 0));
        manager.discover();

        assert!(manager.remove_device(&pad.id()));
        assert!(!manager.remove_device(&pad.id()));
        assert_eq!(pad.releases(), 1);
        assert!(!pad.is_acquired());
    }

    #[test]
    fn shutdown_stops_discovery() {
        let backend = VirtualBackend::new();
        let hub = EventHub::new();
        let manager = manager(&backend, &hub);
        let pad = backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 1, 0, 0));
        manager.discover();

        manager.shutdown();
        assert_eq!(pad.releases(), 1);
        assert_eq!(manager.discover(), 0);
        assert!(manager.snapshot().is_empty());
    }
}
