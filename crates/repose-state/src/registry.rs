//! Multi-subscriber notification with idempotent unsubscription.
//!
//! `notify_all` snapshots the callbacks under a read lock and invokes them
//! with no lock held, so a callback may subscribe or unsubscribe (on any
//! registry) without deadlocking. A callback unsubscribed while a batch is
//! in flight is skipped for the rest of that batch.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use slotmap::SlotMap;
use smallvec::SmallVec;

slotmap::new_key_type! {
    pub struct SubId;
}

pub type Callback = Arc<dyn Fn() + Send + Sync>;

type Subscribers = RwLock<SlotMap<SubId, Callback>>;

#[derive(Clone, Default)]
pub struct Registry {
    subs: Arc<Subscribers>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribe_callback(Arc::new(f))
    }

    pub fn subscribe_callback(&self, cb: Callback) -> Subscription {
        let id = self.subs.write().insert(cb);
        Subscription {
            subs: Arc::downgrade(&self.subs),
            id,
        }
    }

    /// Invokes every subscriber on the calling thread. Order is unspecified.
    pub fn notify_all(&self) {
        let snapshot: SmallVec<[(SubId, Callback); 4]> = self
            .subs
            .read()
            .iter()
            .map(|(id, cb)| (id, cb.clone()))
            .collect();

        for (id, cb) in snapshot {
            // unsubscribed by an earlier callback of this batch
            if !self.subs.read().contains_key(id) {
                continue;
            }
            cb();
        }
    }

    pub fn clear(&self) {
        self.subs.write().clear();
    }

    pub fn count(&self) -> usize {
        self.subs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("subscribers", &self.count())
            .finish()
    }
}

/// A registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    subs: Weak<Subscribers>,
    id: SubId,
}

impl Subscription {
    /// Removes the callback. Safe to call any number of times; slot keys are
    /// versioned, so a repeated call can never remove another subscriber.
    pub fn unsubscribe(&self) {
        if let Some(subs) = self.subs.upgrade() {
            subs.write().remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.subs
            .upgrade()
            .is_some_and(|subs| subs.read().contains_key(self.id))
    }

    /// Keeps the callback registered for as long as its registry lives.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
