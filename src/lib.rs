//! joybus - HID game controller manager with an in-process event bus
//!
//! Devices are discovered through a [`backend::DeviceBackend`], serviced by a
//! polling or a waiting loop depending on their capabilities, and every input
//! update is published as a [`events::ControllerEvent`] on an
//! [`bus::EventHub`].

pub mod backend;
pub mod bus;
pub mod config;
pub mod controller;
pub mod device;
pub mod events;
pub mod logging;

pub use bus::{CollectingBus, EventBus, EventHub, SubscriptionId};
pub use controller::{ControllerError, ControllerHandle, ControllerSettings};
pub use events::{ControllerEvent, ControllerEventKind, ControllersChangedEvent, EnumerationFault};
