use std::io;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Slot for one named background thread that is started on demand.
#[derive(Debug)]
pub(crate) struct LoopThread {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl LoopThread {
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns `body` unless the previous thread is still alive. Returns
    /// whether a new thread was started.
    pub(crate) fn start<F>(&mut self, body: F) -> io::Result<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_running() {
            return Ok(false);
        }
        self.reap();

        let handle = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(body)?;
        debug!("Started thread {}", self.name);
        self.handle = Some(handle);
        Ok(true)
    }

    /// Moves the running thread out, leaving an empty slot behind. Lets the
    /// caller join without holding the lock around the slot.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            name: self.name,
            handle: self.handle.take(),
        }
    }

    /// Waits for the thread to end. Skipped when called from the thread
    /// itself.
    pub(crate) fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Thread {} panicked", self.name);
        }
    }

    // Collects a finished thread so its panic, if any, gets logged
    fn reap(&mut self) {
        if self.handle.as_ref().is_some_and(JoinHandle::is_finished) {
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::time::Duration;

    #[test]
    fn start_is_a_noop_while_alive() {
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let mut worker = LoopThread::new("joybus-test");

        assert!(worker
            .start(move || {
                let _ = release_rx.recv();
            })
            .unwrap());
        assert!(worker.is_running());
        assert!(!worker.start(|| {}).unwrap());

        drop(release_tx);
        worker.join();
        assert!(!worker.is_running());
    }

    #[test]
    fn finished_thread_can_be_restarted() {
        let mut worker = LoopThread::new("joybus-test");
        assert!(worker.start(|| {}).unwrap());
        while worker.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.start(|| {}).unwrap());
        worker.join();
    }

    #[test]
    fn thread_carries_its_name() {
        let (name_tx, name_rx) = channel::bounded(1);
        let mut worker = LoopThread::new("joybus-named");
        worker
            .start(move || {
                let _ = name_tx.send(thread::current().name().map(str::to_string));
            })
            .unwrap();
        assert_eq!(name_rx.recv().unwrap().as_deref(), Some("joybus-named"));
        worker.join();
    }
}
