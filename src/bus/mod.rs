//! In-process publish/subscribe
//!
//! [`EventHub`] hands out one shared bus per event type. Plain
//! [`EventBus`]es broadcast, [`CollectingBus`]es also gather the value every
//! subscriber returns.

pub mod collecting_bus;
pub mod event_bus;
pub mod hub;

pub use collecting_bus::{CollectingBus, CollectingHandler};
pub use event_bus::{EventBus, Handler, SubscriptionId};
pub use hub::EventHub;
