//! Keyed state storage across composition passes.
//!
//! A composition pass is bracketed by [`KeyedStore::begin_pass`] and
//! [`KeyedStore::end_pass`]. Within it, `remember_with_key` hands back the
//! same state for the same key every pass, creating it on first access. Keys
//! that were not accessed during a pass are reclaimed when it ends, running
//! the value's [`Disposable`] hook if it was registered with one.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::Result;
use crate::observer::untracked;
use crate::typed::{AnyValue, Typed, UntypedState, untyped_state};

/// Cleanup run when a remembered value is reclaimed.
pub trait Disposable: Send + Sync + 'static {
    fn dispose(&self);
}

type ReclaimHook = Box<dyn Fn(&AnyValue) + Send + Sync>;

struct Slot {
    cell: UntypedState,
    accessed: bool,
    on_reclaim: Option<ReclaimHook>,
}

#[derive(Default)]
pub struct KeyedStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeyedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a pass: every key is unaccessed until remembered again.
    pub fn begin_pass(&self) {
        for slot in self.slots.lock().values_mut() {
            slot.accessed = false;
        }
    }

    /// Key-based remember returning the type-erased state.
    pub fn remember_state_with_key<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        init: impl FnOnce() -> T,
    ) -> UntypedState {
        self.slot(key.into(), init, None)
    }

    /// Key-based remember. Fails with `TypeMismatch` if the key already holds
    /// a value of another type.
    pub fn remember_with_key<T: Clone + PartialEq + Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        init: impl FnOnce() -> T,
    ) -> Result<Typed<T>> {
        let key = key.into();
        let cell = self.slot(key.clone(), init, None);
        Self::typed(cell, &key)
    }

    /// Like `remember_with_key`, and `T::dispose` runs on the value held when
    /// the key is reclaimed.
    pub fn remember_disposable<T: Disposable + Clone + PartialEq>(
        &self,
        key: impl Into<String>,
        init: impl FnOnce() -> T,
    ) -> Result<Typed<T>> {
        let key = key.into();
        let hook: ReclaimHook = Box::new(|value: &AnyValue| {
            if let Some(v) = value.downcast_ref::<T>() {
                v.dispose();
            }
        });
        let cell = self.slot(key.clone(), init, Some(hook));
        Self::typed(cell, &key)
    }

    fn typed<T: Clone + PartialEq + Send + Sync + 'static>(
        cell: UntypedState,
        key: &str,
    ) -> Result<Typed<T>> {
        Typed::wrap_keyed(cell, key).inspect_err(|err| {
            log::warn!("remember_with_key: {err}");
        })
    }

    fn slot<T: Any + Send + Sync>(
        &self,
        key: String,
        init: impl FnOnce() -> T,
        on_reclaim: Option<ReclaimHook>,
    ) -> UntypedState {
        if let Some(slot) = self.slots.lock().get_mut(&key) {
            slot.accessed = true;
            return slot.cell.clone();
        }

        // init may remember other keys, so it runs without the lock held
        let fresh = untyped_state(init());
        let mut slots = self.slots.lock();
        let slot = slots.entry(key).or_insert_with(|| Slot {
            cell: fresh,
            accessed: true,
            on_reclaim,
        });
        slot.accessed = true;
        slot.cell.clone()
    }

    /// Ends a pass, reclaiming every key that was not accessed during it.
    /// Returns how many were reclaimed.
    pub fn end_pass(&self) -> usize {
        let reclaimed: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock();
            let stale: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| !slot.accessed)
                .map(|(key, _)| key.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|key| slots.remove_entry(&key))
                .collect()
        };

        let count = reclaimed.len();
        for (key, slot) in reclaimed {
            log::debug!("keyed store: reclaiming '{key}'");
            if let Some(hook) = slot.on_reclaim {
                let value = untracked(|| slot.cell.get());
                hook(&value);
            }
        }
        count
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for KeyedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStore")
            .field("slots", &self.len())
            .finish()
    }
}
