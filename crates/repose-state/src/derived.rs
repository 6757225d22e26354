//! # Derived state
//!
//! [`DerivedState<T>`] caches the result of a calculation over other states.
//! There is no dependency list to declare: every state read while the
//! calculation runs becomes a dependency, and the set is rebuilt from scratch
//! on each recompute, so branches that were not taken this time are not
//! subscribed to.
//!
//! ```rust
//! use repose_state::*;
//!
//! let root = mutable_state(1);
//! let doubled = derived_state({
//!     let root = root.clone();
//!     move || root.get() * 2
//! });
//!
//! assert_eq!(doubled.get(), 2);
//! root.set(5);
//! assert_eq!(doubled.get(), 10);
//! ```
//!
//! ## Laziness and eagerness
//!
//! A change upstream only marks the cell invalid and forwards the
//! invalidation to derived states that read it. Nothing is recomputed until
//! somebody calls `get`.
//!
//! The exception: while a derived state has at least one value subscriber
//! (attached with [`DerivedState::subscribe`]), an invalidation recomputes it
//! before the triggering write returns, and the subscribers run only if the
//! policy says the new value differs from the cached one. Attaching the
//! first subscriber therefore switches the cell from lazy to eager.
//! Downstream derived states are wired to the separate invalidation channel
//! and are not value subscribers.
//!
//! Eager work normally runs on the writer's thread. An invalidation that
//! lands while another thread is recomputing the cell is replayed by that
//! thread once its run commits, so the follow-up recompute and any
//! subscriber calls then happen on the reading thread instead.
//!
//! ## Failure
//!
//! A calculation built with [`DerivedState::try_new`] may return an error,
//! and any calculation may panic. Either way nothing is committed: the cached
//! value and the previous dependency subscriptions stay as they were, the
//! partial set gathered by the failed run is dropped, and the cell stays
//! invalid so the next read retries. The next invalidation from a committed
//! dependency still propagates and, with value subscribers attached,
//! schedules another eager attempt.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{BoxError, Result, StateError};
use crate::observer::{self, ComputingGuard, Dependency};
use crate::policy::{MutationPolicy, SharedPolicy, StructuralEquality};
use crate::registry::{Callback, Registry, Subscription};
use crate::state::State;
use crate::wave::{self, EagerRecompute, Wave};

type Calculation<T> = dyn Fn() -> std::result::Result<T, BoxError> + Send + Sync;

pub struct DerivedState<T> {
    inner: Arc<DerivedInner<T>>,
}

struct DerivedInner<T> {
    calculation: Box<Calculation<T>>,
    policy: SharedPolicy<T>,
    value: RwLock<Option<T>>,
    initialized: AtomicBool,
    invalid: AtomicBool,
    /// Set by a failed run; lets the next invalidation through although
    /// `invalid` is already set.
    failed: AtomicBool,
    /// Bumped on every invalidation, including ones that arrive mid-recompute.
    generation: AtomicU64,
    version: AtomicU64,
    /// Serializes recomputation only; readers of a current value never wait.
    recompute_lock: Mutex<()>,
    upstream: Mutex<Vec<Subscription>>,
    /// Handed to every dependency; holds this cell weakly.
    on_invalidate: Callback,
    /// Value-change subscribers.
    subscribers: Registry,
    /// Downstream derived states.
    invalidations: Registry,
}

impl<T> Clone for DerivedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> DerivedState<T> {
    pub fn new(f: impl Fn() -> T + Send + Sync + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::with_policy(f, StructuralEquality)
    }

    pub fn with_policy(
        f: impl Fn() -> T + Send + Sync + 'static,
        policy: impl MutationPolicy<T>,
    ) -> Self {
        Self::build(Box::new(move || Ok::<T, BoxError>(f())), Arc::new(policy))
    }

    /// A derived state whose calculation can fail. Errors surface from
    /// [`try_get`](Self::try_get) and are never cached.
    pub fn try_new<E>(f: impl Fn() -> std::result::Result<T, E> + Send + Sync + 'static) -> Self
    where
        T: PartialEq,
        E: Into<BoxError>,
    {
        Self::try_with_policy(f, StructuralEquality)
    }

    pub fn try_with_policy<E>(
        f: impl Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        policy: impl MutationPolicy<T>,
    ) -> Self
    where
        E: Into<BoxError>,
    {
        Self::build(
            Box::new(move || f().map_err(|err| -> BoxError { err.into() })),
            Arc::new(policy),
        )
    }

    fn build(calculation: Box<Calculation<T>>, policy: SharedPolicy<T>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<DerivedInner<T>>| {
            let weak = weak.clone();
            let on_invalidate: Callback = Arc::new(move || {
                if let Some(cell) = weak.upgrade() {
                    cell.invalidate();
                }
            });
            DerivedInner {
                calculation,
                policy,
                value: RwLock::new(None),
                initialized: AtomicBool::new(false),
                invalid: AtomicBool::new(true),
                failed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                version: AtomicU64::new(0),
                recompute_lock: Mutex::new(()),
                upstream: Mutex::new(Vec::new()),
                on_invalidate,
                subscribers: Registry::new(),
                invalidations: Registry::new(),
            }
        });
        Self { inner }
    }

    /// Returns the current value, recomputing first if it is stale.
    ///
    /// # Panics
    ///
    /// Panics if the calculation fails or reads this state from inside its
    /// own run. Use [`try_get`](Self::try_get) to handle those as errors.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_get(&self) -> Result<T>
    where
        T: Clone,
    {
        self.try_with(T::clone)
    }

    /// Like `get`, but borrows the cached value instead of cloning it.
    ///
    /// # Panics
    ///
    /// Same conditions as [`get`](Self::get).
    ///
    /// `f` runs under the read lock and must not read this state again.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(out) => out,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        // subscribe before refreshing: an invalidation landing between the
        // refresh and the read must reach the reader
        if !observer::is_computing(self.inner.id()) {
            observer::track(&*self.inner);
        }
        self.inner.refresh()?;
        let value = self.inner.value.read();
        value.as_ref().map(f).ok_or(StateError::Cycle)
    }

    /// Attaches a value-change subscriber. From now on the cell recomputes
    /// eagerly on invalidation and `f` runs only when the recomputed value
    /// differs from the cached one.
    ///
    /// A cell that was never computed is computed here so its dependencies
    /// are wired up; a failure of that first run is logged and retried on
    /// the next read.
    pub fn subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Subscription {
        let sub = self.inner.subscribers.subscribe(f);
        self.ensure_computed();
        sub
    }

    fn ensure_computed(&self) {
        if self.inner.initialized.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = self.inner.recompute() {
            log::warn!("derived state: initial computation on subscribe failed: {err}");
        }
    }

    /// Marks the cached value stale, as if a dependency had changed.
    pub fn invalidate(&self) {
        let _wave = Wave::begin();
        self.inner.invalidate();
    }

    pub fn is_invalid(&self) -> bool {
        !self.inner.is_current()
    }

    /// Bumped once per successful recompute.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.count()
    }

    /// Number of states read by the last successful calculation.
    pub fn dependency_count(&self) -> usize {
        self.inner.upstream.lock().len()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T: Send + Sync + 'static> DerivedInner<T> {
    fn id(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn is_current(&self) -> bool {
        self.initialized.load(Ordering::Acquire) && !self.invalid.load(Ordering::Acquire)
    }

    fn refresh(self: &Arc<Self>) -> Result<()> {
        if self.is_current() {
            return Ok(());
        }
        self.recompute()
    }

    fn recompute(self: &Arc<Self>) -> Result<()> {
        let Some(computing) = ComputingGuard::enter(self.id()) else {
            return Err(StateError::Cycle);
        };
        let lock = self.recompute_lock.lock();
        // another thread may have finished while we waited
        if self.is_current() {
            return Ok(());
        }

        let generation = self.generation.load(Ordering::Acquire);
        log::trace!("derived state {:#x}: recomputing", self.id());

        let (result, subscriptions) = {
            let _mark = FailOnUnwind(&self.failed);
            observer::observe(self.on_invalidate.clone(), || (self.calculation)())
        };
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                drop(subscriptions);
                self.failed.store(true, Ordering::Release);
                drop(lock);
                drop(computing);
                if self.generation.load(Ordering::Acquire) != generation {
                    let _wave = Wave::begin();
                    self.invalidate();
                }
                return Err(StateError::Calculation(err));
            }
        };

        let stale = std::mem::replace(&mut *self.upstream.lock(), subscriptions);
        drop(stale);

        let changed = {
            let mut cached = self.value.write();
            match cached.as_ref() {
                Some(prev) if self.policy.equivalent(prev, &value) => false,
                Some(_) => {
                    *cached = Some(value);
                    true
                }
                None => {
                    *cached = Some(value);
                    false
                }
            }
        };
        self.version.fetch_add(1, Ordering::AcqRel);
        self.initialized.store(true, Ordering::Release);
        self.failed.store(false, Ordering::Release);
        self.invalid.store(false, Ordering::Release);

        drop(lock);
        drop(computing);

        if changed {
            self.subscribers.notify_all();
        }

        // an invalidation that arrived mid-run found `invalid` already set and
        // stopped there; replay it so the fresh value is not taken as current
        if self.generation.load(Ordering::Acquire) != generation {
            let _wave = Wave::begin();
            self.invalidate();
        }
        Ok(())
    }

    fn invalidate(self: &Arc<Self>) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if self.invalid.swap(true, Ordering::AcqRel)
            && !self.failed.swap(false, Ordering::AcqRel)
        {
            return;
        }
        log::trace!("derived state {:#x}: invalidated", self.id());
        self.invalidations.notify_all();
        if !self.subscribers.is_empty() {
            wave::schedule(self.clone());
        }
    }
}

/// Flags a failed run when the calculation unwinds.
struct FailOnUnwind<'a>(&'a AtomicBool);

impl Drop for FailOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::Release);
        }
    }
}

impl<T: Send + Sync + 'static> EagerRecompute for DerivedInner<T> {
    fn cell_id(&self) -> usize {
        self.id()
    }

    fn recompute_eagerly(self: Arc<Self>) {
        match self.refresh() {
            Ok(()) => {}
            // already computing further up this thread; it replays the
            // invalidation itself once done
            Err(StateError::Cycle) => {}
            Err(err) => log::warn!("derived state {:#x}: eager recompute failed: {err}", self.id()),
        }
    }
}

impl<T: Send + Sync + 'static> Dependency for DerivedInner<T> {
    fn dependency_id(&self) -> usize {
        self.id()
    }

    fn subscribe_dependent(&self, on_change: Callback) -> Subscription {
        self.invalidations.subscribe_callback(on_change)
    }
}

impl<T: Clone + Send + Sync + 'static> State<T> for DerivedState<T> {
    fn get(&self) -> T {
        DerivedState::get(self)
    }

    fn subscribe_callback(&self, cb: Callback) -> Subscription {
        let sub = self.inner.subscribers.subscribe_callback(cb);
        self.ensure_computed();
        sub
    }
}

impl<T: fmt::Debug> fmt::Debug for DerivedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedState")
            .field("cached", &*self.inner.value.read())
            .field("invalid", &self.inner.invalid.load(Ordering::Acquire))
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

pub fn derived_state<T: PartialEq + Send + Sync + 'static>(
    f: impl Fn() -> T + Send + Sync + 'static,
) -> DerivedState<T> {
    DerivedState::new(f)
}
