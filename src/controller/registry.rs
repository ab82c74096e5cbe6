//! Device registry - the polled and the waitable set
//!
//! Each set keeps its handles behind a mutex that a loop holds for a whole
//! pass, plus a cache of the handles' [`ConnectedDeviceInfo`] in the same
//! order. Snapshots and membership checks read the caches only, so they never
//! wait for a pass to finish.

use crossbeam::channel::Receiver;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::device::{AcquisitionMode, Acquired, ConnectedDeviceInfo, DeviceHandle, DeviceId};

#[derive(Default)]
pub struct DeviceSet {
    handles: Mutex<Vec<DeviceHandle<Acquired>>>,
    infos: RwLock<Vec<ConnectedDeviceInfo>>,
}

impl DeviceSet {
    /// Locks the set for a pass.
    pub(crate) fn lock(&self) -> SetGuard<'_> {
        SetGuard {
            handles: self.handles.lock(),
            infos: &self.infos,
        }
    }

    pub fn len(&self) -> usize {
        self.infos.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.read().is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.infos.read().iter().any(|info| info.descriptor.id == *id)
    }

    pub fn infos(&self) -> Vec<ConnectedDeviceInfo> {
        self.infos.read().clone()
    }
}

/// Exclusive access to one set. Keeps handles and info cache aligned.
pub(crate) struct SetGuard<'a> {
    handles: MutexGuard<'a, Vec<DeviceHandle<Acquired>>>,
    infos: &'a RwLock<Vec<ConnectedDeviceInfo>>,
}

impl SetGuard<'_> {
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn position(&self, id: &DeviceId) -> Option<usize> {
        self.handles
            .iter()
            .position(|handle| handle.descriptor().id == *id)
    }

    pub(crate) fn handle_mut(&mut self, index: usize) -> &mut DeviceHandle<Acquired> {
        &mut self.handles[index]
    }

    pub(crate) fn push(&mut self, handle: DeviceHandle<Acquired>) {
        self.infos.write().push(handle.info().clone());
        self.handles.push(handle);
    }

    pub(crate) fn remove(&mut self, index: usize) -> DeviceHandle<Acquired> {
        self.infos.write().remove(index);
        self.handles.remove(index)
    }

    pub(crate) fn drain(&mut self) -> Vec<DeviceHandle<Acquired>> {
        self.infos.write().clear();
        self.handles.drain(..).collect()
    }

    /// Wait receivers of every handle in the set, keyed by device.
    pub(crate) fn wait_receivers(&self) -> Vec<(DeviceId, Receiver<()>)> {
        self.handles
            .iter()
            .filter_map(|handle| {
                handle
                    .wait_receiver()
                    .map(|receiver| (handle.descriptor().id.clone(), receiver))
            })
            .collect()
    }
}

/// Authoritative record of every connected device.
#[derive(Default)]
pub struct DeviceRegistry {
    polled: DeviceSet,
    waitable: DeviceSet,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn polled(&self) -> &DeviceSet {
        &self.polled
    }

    pub fn waitable(&self) -> &DeviceSet {
        &self.waitable
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.polled.contains(id) || self.waitable.contains(id)
    }

    /// Routes the handle into the set matching its acquisition mode. Hands
    /// the handle back if the device is already registered.
    pub(crate) fn insert(
        &self,
        handle: DeviceHandle<Acquired>,
    ) -> Result<AcquisitionMode, DeviceHandle<Acquired>> {
        if self.contains(&handle.descriptor().id) {
            return Err(handle);
        }
        let mode = handle.mode();
        match mode {
            AcquisitionMode::Polled => self.polled.lock().push(handle),
            AcquisitionMode::Waitable => self.waitable.lock().push(handle),
        }
        Ok(mode)
    }

    /// Takes the device out of whichever set holds it.
    pub(crate) fn remove(&self, id: &DeviceId) -> Option<DeviceHandle<Acquired>> {
        for set in [&self.polled, &self.waitable] {
            if !set.contains(id) {
                continue;
            }
            let mut guard = set.lock();
            if let Some(index) = guard.position(id) {
                return Some(guard.remove(index));
            }
        }
        None
    }

    /// Takes every handle out of both sets.
    pub(crate) fn drain(&self) -> Vec<DeviceHandle<Acquired>> {
        let mut handles = self.polled.lock().drain();
        handles.extend(self.waitable.lock().drain());
        handles
    }

    /// Polled devices first, then waitable ones.
    pub fn snapshot(&self) -> Vec<ConnectedDeviceInfo> {
        let mut devices = self.polled.infos();
        devices.extend(self.waitable.infos());
        devices
    }

    pub fn len(&self) -> usize {
        self.polled.len() + self.waitable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
