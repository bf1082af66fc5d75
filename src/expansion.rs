//! Expansion features: auxiliary modules (firmware update, test reporting, proximity,
//! active pen, ...) that follow the controller lifecycle.
//!
//! Registration is decoupled from the controller: a feature may be registered before
//! the controller exists. Inserts and removals are only applied when the controller
//! drains the registry from its deferred work, so `init` and `remove` always run with
//! the device quiescent.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;
use spin::Mutex;

use crate::data_types::DeviceIdentity;

/// Identity of an expansion feature; at most one registration per kind is expected.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeatureKind {
    Device,
    FirmwareUpdater,
    TestReporting,
    Proximity,
    ActivePen,
    Gesture,
    Video,
    Debug,
    Custom(u8),
}

/// What a feature callback may touch while the controller holds its locks.
pub struct ExpansionContext<'a, T> {
    pub bus: &'a mut T,
    pub delay: &'a mut dyn DelayNs,
    pub identity: &'a DeviceIdentity,
}

/// Lifecycle callbacks of an expansion feature.
///
/// Callbacks run with the controller's reset lock held; they must not call back into
/// lifecycle methods or the registry.
pub trait ExpansionFeature<T> {
    fn kind(&self) -> FeatureKind;

    fn init(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    fn remove(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    fn reset(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    fn reinit(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    fn suspend(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    fn resume(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    /// Called after every serviced interrupt with the first interrupt-source byte.
    fn attention(&mut self, _ctx: &mut ExpansionContext<'_, T>, _sources: u8) {}

    fn early_suspend(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}

    fn late_resume(&mut self, _ctx: &mut ExpansionContext<'_, T>) {}
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryState {
    PendingInsert,
    Attached,
    PendingRemove,
}

struct Entry<T> {
    feature: Box<dyn ExpansionFeature<T> + Send>,
    state: EntryState,
}

/// Shared list of expansion features, drained by the controller.
pub struct ExpansionRegistry<T> {
    entries: Mutex<Vec<Entry<T>>>,
    drain_requested: AtomicBool,
}

impl<T> Default for ExpansionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ExpansionRegistry<T> {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            drain_requested: AtomicBool::new(false),
        }
    }

    /// Queue `feature` for insertion at the next drain.
    pub fn register(&self, feature: Box<dyn ExpansionFeature<T> + Send>) {
        log::debug!("expansion {:?} registered", feature.kind());
        self.entries.lock().push(Entry {
            feature,
            state: EntryState::PendingInsert,
        });
        self.drain_requested.store(true, Ordering::Release);
    }

    /// Queue removal of the feature of `kind`.
    ///
    /// A feature that was never drained is dropped without any callback.
    pub fn unregister(&self, kind: FeatureKind) {
        let mut entries = self.entries.lock();
        entries.retain(|e| !(e.state == EntryState::PendingInsert && e.feature.kind() == kind));
        let mut queued = false;
        for entry in entries.iter_mut().filter(|e| e.feature.kind() == kind) {
            if entry.state == EntryState::Attached {
                entry.state = EntryState::PendingRemove;
                queued = true;
            }
        }
        if queued {
            self.drain_requested.store(true, Ordering::Release);
        }
    }

    /// State of the feature of `kind`, if registered.
    pub fn state(&self, kind: FeatureKind) -> Option<EntryState> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.feature.kind() == kind)
            .map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub(crate) fn request_drain(&self) {
        self.drain_requested.store(true, Ordering::Release);
    }

    /// True when inserts or removals wait for a drain.
    pub fn drain_pending(&self) -> bool {
        self.drain_requested.load(Ordering::Acquire)
    }

    pub(crate) fn take_drain_request(&self) -> bool {
        self.drain_requested.swap(false, Ordering::AcqRel)
    }

    /// Apply pending inserts (`init`) and removals (`remove`).
    pub(crate) fn drain(&self, ctx: &mut ExpansionContext<'_, T>) {
        self.entries.lock().retain_mut(|entry| match entry.state {
            EntryState::PendingInsert => {
                log::info!("expansion {:?} attached", entry.feature.kind());
                entry.feature.init(ctx);
                entry.state = EntryState::Attached;
                true
            }
            EntryState::PendingRemove => {
                log::info!("expansion {:?} removed", entry.feature.kind());
                entry.feature.remove(ctx);
                false
            }
            EntryState::Attached => true,
        });
    }

    /// Run `f` on every attached feature, in registration order.
    pub(crate) fn for_each_attached(&self, mut f: impl FnMut(&mut (dyn ExpansionFeature<T> + Send))) {
        for entry in self
            .entries
            .lock()
            .iter_mut()
            .filter(|e| e.state == EntryState::Attached)
        {
            f(entry.feature.as_mut());
        }
    }
}
