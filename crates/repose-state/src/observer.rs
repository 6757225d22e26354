//! Read tracking.
//!
//! While a derived state runs its calculation, a tracker is installed in a
//! thread-local slot. Every `get` on any state reports itself to the tracker,
//! which subscribes the computing cell to it. Nested derived reads install
//! their own tracker for their own calculation, so the outer tracker only ever
//! sees the inner cell, never its dependencies.
//!
//! The previous slot value is restored by a guard on every exit path,
//! including a panicking calculation.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::registry::{Callback, Subscription};

/// Something a calculation can depend on.
pub(crate) trait Dependency: Send + Sync {
    /// Stable identity, used to subscribe only once per calculation.
    fn dependency_id(&self) -> usize;

    /// Registers `on_change` to run whenever this dependency may have changed.
    fn subscribe_dependent(&self, on_change: Callback) -> Subscription;
}

struct Tracker {
    on_change: Callback,
    seen: SmallVec<[usize; 8]>,
    subscriptions: Vec<Subscription>,
}

thread_local! {
    static CURRENT_OBSERVER: RefCell<Option<Tracker>> = const { RefCell::new(None) };
    static COMPUTING: RefCell<SmallVec<[usize; 8]>> = RefCell::new(SmallVec::new());
}

/// Restores the previously installed tracker when dropped.
struct ObserverScope {
    prev: Option<Option<Tracker>>,
}

impl ObserverScope {
    fn install(tracker: Option<Tracker>) -> Self {
        let prev = CURRENT_OBSERVER.with(|slot| slot.replace(tracker));
        Self { prev: Some(prev) }
    }

    fn restore(&mut self) -> Option<Tracker> {
        match self.prev.take() {
            Some(prev) => CURRENT_OBSERVER.with(|slot| slot.replace(prev)),
            None => None,
        }
    }
}

impl Drop for ObserverScope {
    fn drop(&mut self) {
        // a tracker still installed here belongs to an aborted calculation;
        // dropping it cancels the partial subscription set
        drop(self.restore());
    }
}

/// Runs `f` with a fresh tracker that subscribes `on_change` to every
/// dependency read. Returns the result with the new subscription set.
pub(crate) fn observe<R>(on_change: Callback, f: impl FnOnce() -> R) -> (R, Vec<Subscription>) {
    let mut scope = ObserverScope::install(Some(Tracker {
        on_change,
        seen: SmallVec::new(),
        subscriptions: Vec::new(),
    }));
    let out = f();
    let subscriptions = scope
        .restore()
        .map(|tracker| tracker.subscriptions)
        .unwrap_or_default();
    (out, subscriptions)
}

/// Reports a read to the active tracker, if any.
pub(crate) fn track(dep: &dyn Dependency) {
    CURRENT_OBSERVER.with(|slot| {
        let mut slot = slot.borrow_mut();
        let Some(tracker) = slot.as_mut() else {
            return;
        };
        let id = dep.dependency_id();
        if tracker.seen.contains(&id) {
            return;
        }
        tracker.seen.push(id);
        let sub = dep.subscribe_dependent(tracker.on_change.clone());
        tracker.subscriptions.push(sub);
    });
}

/// Runs `f` without recording any of its reads as dependencies.
///
/// ```rust
/// use repose_state::*;
///
/// let a = mutable_state(1);
/// let b = mutable_state(10);
/// let sum = derived_state({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + untracked(|| b.get())
/// });
/// assert_eq!(sum.get(), 11);
///
/// b.set(20);
/// assert_eq!(sum.get(), 11); // `b` is not a dependency
/// ```
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = ObserverScope::install(None);
    f()
}

/// Whether reads on this thread are currently being recorded.
pub fn is_tracking() -> bool {
    CURRENT_OBSERVER.with(|slot| slot.borrow().is_some())
}

/// Whether the cell `id` is running its calculation on this thread.
pub(crate) fn is_computing(id: usize) -> bool {
    COMPUTING.with(|stack| stack.borrow().contains(&id))
}

/// Marks a cell as computing on this thread until dropped.
pub(crate) struct ComputingGuard {
    id: usize,
}

impl ComputingGuard {
    /// `None` if the cell is already computing further up this thread's stack.
    pub(crate) fn enter(id: usize) -> Option<Self> {
        COMPUTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                return None;
            }
            stack.push(id);
            Some(Self { id })
        })
    }
}

impl Drop for ComputingGuard {
    fn drop(&mut self) {
        COMPUTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.id) {
                stack.remove(pos);
            }
        });
    }
}
