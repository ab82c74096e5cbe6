use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::collecting_bus::CollectingBus;
use super::event_bus::{EventBus, SubscriptionId};

type AnyBus = Arc<dyn Any + Send + Sync>;

/// Registry of buses keyed by event type.
///
/// One hub is created by the application root and shared with every
/// component that publishes or subscribes. Each bus is created on first use
/// and lives as long as the hub.
#[derive(Default)]
pub struct EventHub {
    buses: RwLock<HashMap<TypeId, AnyBus>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared bus for events of type `T`.
    pub fn bus<T: Send + Sync + 'static>(&self) -> Arc<EventBus<T>> {
        self.get_or_create::<EventBus<T>>()
    }

    /// Shared collecting bus for events of type `T` answered with `R`.
    pub fn collecting_bus<T, R>(&self) -> Arc<CollectingBus<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.get_or_create::<CollectingBus<T, R>>()
    }

    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionId
    where
        T: Send + Sync + 'static,
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.bus::<T>().subscribe(handler)
    }

    pub fn unsubscribe<T: Send + Sync + 'static>(&self, id: SubscriptionId) -> bool {
        self.bus::<T>().unsubscribe(id)
    }

    pub fn publish<T: Send + Sync + 'static>(&self, sender: &str, event: &T) {
        self.bus::<T>().publish(sender, event);
    }

    fn get_or_create<B: Default + Send + Sync + 'static>(&self) -> Arc<B> {
        let key = TypeId::of::<B>();
        if let Some(bus) = self.buses.read().get(&key) {
            if let Ok(bus) = Arc::clone(bus).downcast::<B>() {
                return bus;
            }
        }

        let mut buses = self.buses.write();
        let entry = buses.entry(key).or_insert_with(|| {
            debug!("Creating {}", type_name::<B>());
            Arc::new(B::default())
        });
        match Arc::clone(entry).downcast::<B>() {
            Ok(bus) => bus,
            Err(_) => {
                let bus = Arc::new(B::default());
                *entry = Arc::clone(&bus) as AnyBus;
                bus
            }
        }
    }
}
