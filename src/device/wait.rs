//! Auto-reset wait primitives.
//!
//! A [`WaitEvent`] is a one-slot channel: signalling while a signal is already
//! pending is a no-op, and receiving the pending signal resets the event.
//! Receivers can be combined with [`crossbeam::channel::Select`] to wait on
//! several events at once.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

#[derive(Debug)]
pub struct WaitEvent {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl WaitEvent {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(1);
        Self { sender, receiver }
    }

    pub fn set(&self) {
        signal(&self.sender);
    }

    /// Sending side handed to whatever raises the event.
    pub fn signal(&self) -> WaitSignal {
        WaitSignal {
            sender: self.sender.clone(),
        }
    }

    /// Receiving side; becomes disconnected once the event and every
    /// [`WaitSignal`] created from it are dropped.
    pub fn receiver(&self) -> Receiver<()> {
        self.receiver.clone()
    }

    pub fn is_set(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Waits for the event and resets it. Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for WaitEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle that raises a [`WaitEvent`].
#[derive(Clone, Debug)]
pub struct WaitSignal {
    sender: Sender<()>,
}

impl WaitSignal {
    pub fn set(&self) {
        signal(&self.sender);
    }
}

fn signal(sender: &Sender<()>) {
    match sender.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        // Nobody waits anymore
        Err(TrySendError::Disconnected(())) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::Select;

    #[test]
    fn auto_resets_after_wait() {
        let event = WaitEvent::new();
        event.set();
        event.set();
        assert!(event.is_set());
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(!event.is_set());
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn select_reports_the_signalled_event() {
        let first = WaitEvent::new();
        let second = WaitEvent::new();
        second.signal().set();

        let receivers = [first.receiver(), second.receiver()];
        let mut select = Select::new();
        for receiver in &receivers {
            select.recv(receiver);
        }
        let operation = select.select();
        let index = operation.index();
        assert!(operation.recv(&receivers[index]).is_ok());
        assert_eq!(index, 1);
    }

    #[test]
    fn dropped_event_disconnects_receiver() {
        let event = WaitEvent::new();
        let receiver = event.receiver();
        drop(event);
        assert!(receiver.recv().is_err());
    }
}
