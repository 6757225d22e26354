use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::derived::DerivedState;
use crate::observer::untracked;
use crate::policy::NeverEqual;

type Cleanup = Box<dyn FnOnce() + Send>;

/// Cleanup handle. Clones share the same cleanup.
#[derive(Clone)]
pub struct Dispose(Arc<Mutex<Option<Cleanup>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(f)))))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.lock().take();
        if let Some(f) = f {
            f()
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl fmt::Debug for Dispose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispose")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Helper to build the cleanup returned from an effect body.
pub fn on_unmount(f: impl FnOnce() + Send + 'static) -> Dispose {
    Dispose::new(f)
}

/// Runs `f` now and again after every change to a state it read.
///
/// The effect lives while the returned handle (or a clone of it) does;
/// [`Dispose::run`] stops it early. Reruns happen on the writer's thread.
pub fn effect(f: impl Fn() + Send + Sync + 'static) -> Dispose {
    effect_with_cleanup(move || {
        f();
        Dispose::new(|| {})
    })
}

/// Like [`effect`], but each run returns a cleanup that is invoked before
/// the next run and when the effect is disposed.
pub fn effect_with_cleanup(f: impl Fn() -> Dispose + Send + Sync + 'static) -> Dispose {
    let last: Arc<Mutex<Option<Dispose>>> = Arc::new(Mutex::new(None));

    let cell = DerivedState::with_policy(
        {
            let last = last.clone();
            move || {
                let previous = last.lock().take();
                if let Some(previous) = previous {
                    untracked(|| previous.run());
                }
                let cleanup = f();
                *last.lock() = Some(cleanup);
            }
        },
        NeverEqual,
    );
    // a value subscriber keeps the cell eager; it also runs the first pass
    let keepalive = cell.subscribe(|| {});

    Dispose::new(move || {
        keepalive.unsubscribe();
        drop(cell);
        let cleanup = last.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
    })
}
