//! Controller Handle - public entry point of the device subsystem
//!
//! Wires a [`DeviceBackend`] and an [`EventHub`] to a [`ConnectionManager`],
//! runs the first discovery and keeps the connector thread alive until
//! shutdown.
//!

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::connection_manager::ConnectionManager;
use super::loop_thread::LoopThread;
use crate::backend::DeviceBackend;
use crate::bus::EventHub;
use crate::device::{
    offsets, ConnectedDeviceInfo, DeviceCategory, DeviceDescriptor, DeviceError, DeviceId,
    DrainError,
};
use crate::logging::{Logger, TracingLogger};

pub const CONNECTOR_THREAD_NAME: &str = "joybus-connector";

/// Configuration settings for the controller subsystem
///
/// # Examples
///
/// ```rust
/// use joybus::controller::ControllerSettings;
///
/// // Faster sampling for flight sticks
/// let settings = ControllerSettings {
///     polling_hz: 120,
///     ..ControllerSettings::default()
/// };
/// assert_eq!(settings.polling_interval().as_millis(), 8);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Pause between two discovery passes of the connector thread
    pub connection_interval_ms: u64,

    /// Rate at which poll-only devices are sampled
    ///
    /// The polling loop sleeps `1000 / polling_hz` milliseconds between
    /// passes.
    pub polling_hz: u32,

    /// Number of updates a device buffers between two reads
    ///
    /// Once full, the oldest update is dropped.
    pub device_buffer_size: usize,

    /// Device categories enumerated during discovery
    pub device_categories: Vec<DeviceCategory>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            connection_interval_ms: 500,
            polling_hz: 60,
            device_buffer_size: 128,
            device_categories: DeviceCategory::ACCEPTED.to_vec(),
        }
    }
}

impl ControllerSettings {
    pub fn connection_interval(&self) -> Duration {
        Duration::from_millis(self.connection_interval_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.polling_hz.max(1)))
    }
}

/// Errors of the controller subsystem
///
/// Only [`ControllerError::Initialization`] reaches the caller. Everything
/// else is local to one device or one discovery pass and ends up in the log.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Input was lost; the device is removed
    #[error("Device unplugged: {0}")]
    DeviceUnplugged(DeviceId),

    /// The device could not be opened or acquired
    ///
    /// It is not registered and is retried on the next discovery pass.
    #[error("Failed to acquire {device}: {source}")]
    AcquisitionFailed {
        device: String,
        #[source]
        source: DeviceError,
    },

    /// The backend could not list devices
    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(#[source] DeviceError),

    /// Reading a device failed without losing it
    #[error("Failed to read {device}: {source}")]
    ReadFailed {
        device: DeviceId,
        #[source]
        source: DeviceError,
    },

    /// A thread or resource needed at startup was not available
    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl ControllerError {
    pub fn from_drain(error: DrainError, device: &DeviceDescriptor) -> Self {
        match error {
            DrainError::Unplugged => ControllerError::DeviceUnplugged(device.id.clone()),
            DrainError::Failed(source) => ControllerError::ReadFailed {
                device: device.id.clone(),
                source,
            },
        }
    }
}

/// Handle for managing the controller subsystem lifecycle
///
/// # Threading Model
///
/// ```text
/// joybus-connector ─ discover() every connection_interval_ms
///        │
///        ├─► joybus-polling  (poll-only devices, polling_hz)
///        └─► joybus-waiting  (waitable devices, blocks on wait primitives)
/// ```
///
/// The loops start on demand and end by themselves once their set is empty;
/// the connector restarts them when devices show up again.
///
/// # Resource Management
///
/// [`ControllerHandle::shutdown`] (also run on drop) stops the connector,
/// releases every device and joins the loops.
pub struct ControllerHandle {
    manager: Arc<ConnectionManager>,
    connector: Mutex<LoopThread>,
    connector_stop: Mutex<Option<Sender<()>>>,
}

impl ControllerHandle {
    /// Creates the subsystem without starting any thread.
    ///
    /// `logger` defaults to a [`TracingLogger`], which only writes once a
    /// `tracing` subscriber is installed. Call
    /// [`init_console`](crate::logging::init_console) first to get console
    /// output with timestamps and thread names.
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        hub: &EventHub,
        settings: Option<ControllerSettings>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Creating controller with settings: {:?}", settings);
        let logger = logger.unwrap_or_else(|| Arc::new(TracingLogger::default()));

        Self {
            manager: Arc::new(ConnectionManager::new(backend, hub, settings, logger)),
            connector: Mutex::new(LoopThread::new(CONNECTOR_THREAD_NAME)),
            connector_stop: Mutex::new(None),
        }
    }

    /// Creates and initializes the subsystem in one step.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use joybus::backend::{VirtualBackend, VirtualDeviceSpec};
    /// use joybus::logging::{init_console, LoggingSettings};
    /// use joybus::{ControllerHandle, EventHub};
    /// use std::sync::Arc;
    ///
    /// // Console sink for the default logger
    /// init_console(&LoggingSettings::default());
    ///
    /// let backend = VirtualBackend::new();
    /// backend.plug(VirtualDeviceSpec::polled_gamepad("Pad", 10, 1, 2));
    /// let hub = EventHub::new();
    ///
    /// let controller = ControllerHandle::spawn(Arc::new(backend), &hub, None, None)?;
    /// assert_eq!(controller.connected_count(), 1);
    /// controller.shutdown();
    /// # Ok::<(), joybus::ControllerError>(())
    /// ```
    pub fn spawn(
        backend: Arc<dyn DeviceBackend>,
        hub: &EventHub,
        settings: Option<ControllerSettings>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Self, ControllerError> {
        let handle = Self::new(backend, hub, settings, logger);
        handle.initialize()?;
        Ok(handle)
    }

    /// Builds the offset tables, connects the devices present right now,
    /// starts the loops they need and then the connector thread.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Initialization`] if a thread could not be spawned.
    pub fn initialize(&self) -> Result<(), ControllerError> {
        info!("Initializing controller");
        offsets::initialize();

        let found = self.manager.discover();
        info!("Initial discovery connected {} device(s)", found);
        self.manager.ensure_loops()?;

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let manager = Arc::clone(&self.manager);
        let started = self
            .connector
            .lock()
            .start(move || run_connector(manager, stop_rx))
            .map_err(|e| {
                ControllerError::Initialization(format!("Failed to spawn connector thread: {}", e))
            })?;
        if started {
            *self.connector_stop.lock() = Some(stop_tx);
        }
        Ok(())
    }

    /// Runs one discovery pass right away. Returns the number of devices
    /// added.
    pub fn discover(&self) -> Result<usize, ControllerError> {
        let added = self.manager.discover();
        self.manager.ensure_loops()?;
        Ok(added)
    }

    /// Point-in-time list of connected devices, polled ones first.
    pub fn connected_devices(&self) -> Vec<ConnectedDeviceInfo> {
        self.manager.snapshot()
    }

    pub fn connected_count(&self) -> usize {
        self.manager.registry().len()
    }

    /// Disconnects a device. Returns false if it was not connected.
    pub fn remove_device(&self, id: &DeviceId) -> bool {
        self.manager.remove_device(id)
    }

    pub fn is_polling(&self) -> bool {
        self.manager.is_polling()
    }

    pub fn is_waiting(&self) -> bool {
        self.manager.is_waiting()
    }

    pub fn is_connecting(&self) -> bool {
        self.connector.lock().is_running()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Stops the connector, releases every device and joins the loops.
    pub fn shutdown(&self) {
        if let Some(stop) = self.connector_stop.lock().take() {
            let _ = stop.send(());
        }
        let mut connector = self.connector.lock().take();
        connector.join();
        self.manager.shutdown();
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_connector(manager: Arc<ConnectionManager>, stop: channel::Receiver<()>) {
    let interval = manager.settings().connection_interval();
    manager.logger().info(&format!(
        "Thread started with re/connection interval = {} ms",
        interval.as_millis()
    ));

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        manager.discover();
        if let Err(e) = manager.ensure_loops() {
            manager.logger().error_with("Failed to start acquisition loop: ", &e);
        }
    }

    manager.logger().info("Thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.connection_interval(), Duration::from_millis(500));
        assert_eq!(settings.polling_interval(), Duration::from_millis(16));
        assert_eq!(settings.device_categories.len(), 5);
        assert!(!settings.device_categories.contains(&DeviceCategory::Other));
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        let settings = ControllerSettings {
            polling_hz: 0,
            ..ControllerSettings::default()
        };
        assert_eq!(settings.polling_interval(), Duration::from_secs(1));
    }

    #[test]
    fn drain_errors_map_to_controller_errors() {
        let device = DeviceDescriptor {
            id: DeviceId::new("pad"),
            instance_name: "Pad".to_string(),
            product_name: "Pad".to_string(),
            category: DeviceCategory::Gamepad,
        };
        assert!(matches!(
            ControllerError::from_drain(DrainError::Unplugged, &device),
            ControllerError::DeviceUnplugged(id) if id == device.id
        ));
        let error = ControllerError::from_drain(DrainError::Failed(DeviceError::Busy), &device);
        assert_eq!(error.to_string(), "Failed to read pad: Device busy");
    }
}
