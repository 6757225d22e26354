use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::observer::{self, Dependency};
use crate::policy::{MutationPolicy, SharedPolicy, StructuralEquality};
use crate::registry::{Callback, Registry, Subscription};
use crate::wave::Wave;

/// Anything that can be read (and tracked) and subscribed to.
///
/// Implemented by [`MutableState`] and [`DerivedState`](crate::DerivedState).
pub trait State<T>: Send + Sync {
    fn get(&self) -> T;

    fn subscribe_callback(&self, cb: Callback) -> Subscription;
}

/// A state cell holding a value directly.
///
/// Cloning gives another handle to the same cell.
pub struct MutableState<T> {
    inner: Arc<MutableInner<T>>,
}

struct MutableInner<T> {
    value: RwLock<T>,
    version: AtomicU64,
    policy: SharedPolicy<T>,
    on_change: RwLock<Option<Callback>>,
    subscribers: Registry,
}

impl<T> Clone for MutableState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> MutableState<T> {
    /// A state compared with [`StructuralEquality`].
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_policy(value, StructuralEquality)
    }

    pub fn with_policy(value: T, policy: impl MutationPolicy<T>) -> Self {
        Self::with_shared_policy(value, Arc::new(policy))
    }

    pub fn with_shared_policy(value: T, policy: SharedPolicy<T>) -> Self {
        Self {
            inner: Arc::new(MutableInner {
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                policy,
                on_change: RwLock::new(None),
                subscribers: Registry::new(),
            }),
        }
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        observer::track(&*self.inner);
        self.inner.value.read().clone()
    }

    /// Reads the value by reference. The read is tracked like `get`.
    ///
    /// `f` runs under the read lock and must not write to this state.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        observer::track(&*self.inner);
        f(&self.inner.value.read())
    }

    /// Stores `value` unless the policy finds it equivalent to the current
    /// one. Returns whether a change happened. On change, the on-change
    /// callback and every subscriber run on this thread before returning.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write();
            if self.inner.policy.equivalent(&current, &value) {
                return false;
            }
            *current = value;
            self.inner.version.fetch_add(1, Ordering::AcqRel);
        }
        self.notify();
        true
    }

    /// Read-modify-write under the write lock, judged by the policy like `set`.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool
    where
        T: Clone,
    {
        {
            let mut current = self.inner.value.write();
            let mut next = current.clone();
            f(&mut next);
            if self.inner.policy.equivalent(&current, &next) {
                return false;
            }
            *current = next;
            self.inner.version.fetch_add(1, Ordering::AcqRel);
        }
        self.notify();
        true
    }

    fn notify(&self) {
        let _wave = Wave::begin();
        let on_change = self.inner.on_change.read().clone();
        if let Some(cb) = on_change {
            cb();
        }
        self.inner.subscribers.notify_all();
    }

    /// Installs the single legacy change callback, replacing any previous one.
    /// It runs before the subscribers on every real change.
    pub fn set_on_change(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_change.write() = Some(Arc::new(f));
    }

    pub fn clear_on_change(&self) {
        *self.inner.on_change.write() = None;
    }

    pub fn subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.subscribers.subscribe(f)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.count()
    }

    /// Bumped once per real change.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &dyn MutationPolicy<T> {
        &*self.inner.policy
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T: Send + Sync + 'static> Dependency for MutableInner<T> {
    fn dependency_id(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn subscribe_dependent(&self, on_change: Callback) -> Subscription {
        self.subscribers.subscribe_callback(on_change)
    }
}

impl<T: Clone + Send + Sync + 'static> State<T> for MutableState<T> {
    fn get(&self) -> T {
        MutableState::get(self)
    }

    fn subscribe_callback(&self, cb: Callback) -> Subscription {
        self.inner.subscribers.subscribe_callback(cb)
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableState")
            .field("value", &*self.inner.value.read())
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .field("subscribers", &self.inner.subscribers.count())
            .finish()
    }
}

pub fn mutable_state<T: PartialEq + Send + Sync + 'static>(value: T) -> MutableState<T> {
    MutableState::new(value)
}
