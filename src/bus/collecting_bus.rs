use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use super::event_bus::SubscriptionId;

pub type CollectingHandler<T, R> = Arc<dyn Fn(&str, &T) -> R + Send + Sync>;

/// Event bus whose subscribers answer each event.
///
/// Same delivery rules as [`EventBus`](super::EventBus); `publish` returns the
/// answers in subscription order.
pub struct CollectingBus<T, R> {
    handlers: RwLock<Arc<Vec<(SubscriptionId, CollectingHandler<T, R>)>>>,
    next_id: AtomicU64,
}

impl<T, R> CollectingBus<T, R> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &T) -> R + Send + Sync + 'static,
    {
        let id = SubscriptionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        let mut updated: Vec<_> = handlers.iter().cloned().collect();
        updated.push((id, Arc::new(handler) as CollectingHandler<T, R>));
        *handlers = Arc::new(updated);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        let updated: Vec<_> = handlers
            .iter()
            .filter(|(candidate, _)| *candidate != id)
            .cloned()
            .collect();
        if updated.len() == before {
            return false;
        }
        *handlers = Arc::new(updated);
        true
    }

    /// Returns every subscriber's answer, or `None` when nobody was
    /// subscribed. Answers of panicking handlers are left out.
    pub fn publish(&self, sender: &str, event: &T) -> Option<Vec<R>> {
        let handlers = Arc::clone(&self.handlers.read());
        if handlers.is_empty() {
            return None;
        }

        let mut answers = Vec::with_capacity(handlers.len());
        for (id, handler) in handlers.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(sender, event))) {
                Ok(answer) => answers.push(answer),
                Err(_) => error!(
                    "Subscriber {:?} panicked while handling event from {}",
                    id, sender
                ),
            }
        }
        Some(answers)
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn clear(&self) {
        *self.handlers.write() = Arc::new(Vec::new());
    }
}

impl<T, R> Default for CollectingBus<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    const BUS_MESSAGE: i32 = 17;
    const SUBSCRIBER_COUNT: usize = 23;

    #[test]
    fn returns_answers_in_subscription_order() {
        let bus = CollectingBus::<i32, i32>::new();
        let total = Arc::new(Mutex::new(0));
        for _ in 0..SUBSCRIBER_COUNT {
            let total = Arc::clone(&total);
            bus.subscribe(move |_, value: &i32| {
                let mut total = total.lock();
                *total += *value;
                *total
            });
        }

        let answers = bus.publish("test", &BUS_MESSAGE).unwrap();
        assert_eq!(answers.len(), SUBSCRIBER_COUNT);
        for (index, answer) in answers.iter().enumerate() {
            assert_eq!(*answer, (index as i32 + 1) * BUS_MESSAGE);
        }
        assert_eq!(answers.last(), Some(&(23 * 17)));
    }

    #[test]
    fn no_subscribers_yields_none() {
        let bus = CollectingBus::<i32, i32>::new();
        assert_eq!(bus.publish("test", &0), None);

        let id = bus.subscribe(|_, value| *value);
        assert!(bus.unsubscribe(id));
        assert_eq!(bus.publish("test", &0), None);
    }

    #[test]
    fn panicking_handler_is_skipped() {
        let bus = CollectingBus::<i32, i32>::new();
        bus.subscribe(|_, value| *value);
        bus.subscribe(|_, _| panic!("handler failure"));
        bus.subscribe(|_, value| *value * 2);

        assert_eq!(bus.publish("test", &3), Some(vec![3, 6]));
    }
}
