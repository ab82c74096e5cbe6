//! Event Processor - turns drained updates into bus events
//!
//! Both acquisition loops and discovery publish through one [`EventPublisher`].
//! It classifies every [`RawUpdate`] into a [`ControllerEvent`] and owns the
//! bus handles for the three topics the controller emits.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::bus::{EventBus, EventHub};
use crate::device::{ConnectedDeviceInfo, DeviceDescriptor, RawUpdate};
use crate::events::{ControllerEvent, ControllersChangedEvent, EnumerationFault};

/// Sender name attached to every event the controller publishes.
pub const EVENT_SENDER: &str = "joybus::controller";

#[derive(Clone)]
pub struct EventPublisher {
    controller_events: Arc<EventBus<ControllerEvent>>,
    changed_events: Arc<EventBus<ControllersChangedEvent>>,
    faults: Arc<EventBus<EnumerationFault>>,
}

impl EventPublisher {
    pub fn new(hub: &EventHub) -> Self {
        Self {
            controller_events: hub.bus::<ControllerEvent>(),
            changed_events: hub.bus::<ControllersChangedEvent>(),
            faults: hub.bus::<EnumerationFault>(),
        }
    }

    /// Publishes one event per classified update, in drain order. Returns the
    /// number of events published.
    pub fn publish_updates(&self, device: &DeviceDescriptor, updates: Vec<RawUpdate>) -> usize {
        let mut published = 0;
        for update in updates {
            match ControllerEvent::from_update(device, update) {
                Some(event) => {
                    trace!("{}", event);
                    self.controller_events.publish(EVENT_SENDER, &event);
                    published += 1;
                }
                None => trace!("Skipping unclassified update on {}", device.id),
            }
        }
        published
    }

    pub fn publish_changed(&self, devices: Vec<ConnectedDeviceInfo>) {
        debug!("Publishing device list with {} entries", devices.len());
        self.changed_events
            .publish(EVENT_SENDER, &ControllersChangedEvent { devices });
    }

    pub fn publish_fault(&self, message: String) {
        self.faults
            .publish(EVENT_SENDER, &EnumerationFault { message });
    }
}
