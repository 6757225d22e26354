//! Invalidation waves.
//!
//! A write delivers invalidations through the whole graph first. Derived
//! states that must recompute eagerly (they have value subscribers) are
//! queued while the wave is open and recomputed when the outermost wave on
//! this thread closes, still before the write returns. A diamond therefore
//! recomputes its sink once, after both arms are already invalid.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

pub(crate) trait EagerRecompute: Send + Sync {
    fn cell_id(&self) -> usize;

    fn recompute_eagerly(self: Arc<Self>);
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static PENDING: RefCell<Vec<Arc<dyn EagerRecompute>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct Wave(());

impl Wave {
    pub(crate) fn begin() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Wave(())
    }
}

impl Drop for Wave {
    fn drop(&mut self) {
        let depth = DEPTH.with(|d| {
            let n = d.get().saturating_sub(1);
            d.set(n);
            n
        });
        if depth > 0 {
            return;
        }
        if std::thread::panicking() {
            PENDING.with(|p| p.borrow_mut().clear());
            return;
        }
        flush();
    }
}

/// Queues `cell` for the end of the current wave, or runs it now if no wave
/// is open on this thread.
pub(crate) fn schedule(cell: Arc<dyn EagerRecompute>) {
    if DEPTH.with(Cell::get) == 0 {
        cell.recompute_eagerly();
        return;
    }
    PENDING.with(|p| {
        let mut pending = p.borrow_mut();
        let id = cell.cell_id();
        if !pending.iter().any(|queued| queued.cell_id() == id) {
            pending.push(cell);
        }
    });
}

fn flush() {
    loop {
        let batch = PENDING.with(|p| std::mem::take(&mut *p.borrow_mut()));
        if batch.is_empty() {
            break;
        }
        log::trace!("flushing {} eager recompute(s)", batch.len());
        for cell in batch {
            cell.recompute_eagerly();
        }
    }
}
