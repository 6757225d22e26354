//! # State, Derived State, and Effects
//!
//! Repose keeps UI state in small reactive cells instead of mutable widget
//! fields. There are three main pieces:
//!
//! - `MutableState<T>` — holds a value; writes the mutation policy considers
//!   equivalent are ignored.
//! - `DerivedState<T>` — a cached calculation over other states, recomputed
//!   only when something it read last time changed.
//! - `effect` — side-effects that rerun when their inputs change.
//!
//! All of them are `Send + Sync` handles; cloning one shares the same cell.
//!
//! ## Mutable state
//!
//! ```rust
//! use repose_state::*;
//!
//! let count = mutable_state(0);
//! count.set(1);
//! count.update(|v| *v += 1);
//! assert_eq!(count.get(), 2);
//! ```
//!
//! ## Derived state
//!
//! Reads are tracked: no dependency list is declared.
//!
//! ```rust
//! use repose_state::*;
//!
//! let first = mutable_state("Jane".to_string());
//! let last = mutable_state("Doe".to_string());
//!
//! let full = derived_state({
//!     let first = first.clone();
//!     let last = last.clone();
//!     move || format!("{} {}", first.get(), last.get())
//! });
//!
//! assert_eq!(full.get(), "Jane Doe");
//! last.set("Smith".to_string());
//! assert_eq!(full.get(), "Jane Smith");
//! ```
//!
//! A derived state is lazy until it gets a value subscriber, then eager:
//! see the [`derived`] module docs.
//!
//! ## Threading
//!
//! Everything runs on the caller's thread. A `set` delivers its whole
//! notification wave (invalidations, eager recomputes, subscribers) before it
//! returns. Each cell is consistent on its own; there is no transaction
//! spanning several cells, so a derived state reading two states written
//! from different threads can observe one new and one old value.
//!
//! ## Keyed storage
//!
//! [`KeyedStore`] keeps states alive across composition passes by key and
//! hands them out through [`Typed`] accessors.

pub mod derived;
pub mod effects;
pub mod error;
pub mod observer;
pub mod policy;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod typed;
mod wave;


pub use derived::*;
pub use effects::*;
pub use error::{BoxError, StateError};
pub use observer::{is_tracking, untracked};
pub use policy::*;
pub use registry::*;
pub use runtime::*;
pub use state::*;
pub use typed::*;
