use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

/// Token identifying one subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

pub type Handler<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Synchronous publish/subscribe channel for one event type.
///
/// Handlers run on the publishing thread, in subscription order. The handler
/// list is replaced as a whole on every (un)subscribe, so a publish always
/// sees a complete list and handlers may (un)subscribe from inside a
/// callback.
pub struct EventBus<T> {
    handlers: RwLock<Arc<Vec<(SubscriptionId, Handler<T>)>>>,
    next_id: AtomicU64,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.subscribe_handler(Arc::new(handler))
    }

    /// Registers an already shared handler. The same handler may be
    /// registered several times and then runs once per subscription.
    pub fn subscribe_handler(&self, handler: Handler<T>) -> SubscriptionId {
        let id = SubscriptionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        let mut updated = Vec::with_capacity(handlers.len() + 1);
        updated.extend(handlers.iter().cloned());
        updated.push((id, handler));
        *handlers = Arc::new(updated);
        trace!("Subscribed {:?}", id);
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        if !handlers.iter().any(|(candidate, _)| *candidate == id) {
            return false;
        }
        let updated: Vec<_> = handlers
            .iter()
            .filter(|(candidate, _)| *candidate != id)
            .cloned()
            .collect();
        *handlers = Arc::new(updated);
        true
    }

    /// Delivers `event` to every current subscriber.
    ///
    /// A panicking handler is logged and skipped; later handlers still run.
    pub fn publish(&self, sender: &str, event: &T) {
        let handlers = Arc::clone(&self.handlers.read());
        for (id, handler) in handlers.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(sender, event)));
            if outcome.is_err() {
                error!("Subscriber {:?} panicked while handling event from {}", id, sender);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn clear(&self) {
        *self.handlers.write() = Arc::new(Vec::new());
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Forwards every event into a bounded tokio channel.
    ///
    /// Events are dropped with a warning while the channel is full; once the
    /// receiver is dropped the subscription stays registered but forwards
    /// nothing.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionId, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.subscribe(move |_sender, event: &T| {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Subscriber channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        });
        (id, rx)
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
