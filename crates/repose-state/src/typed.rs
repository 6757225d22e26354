//! Strongly typed access to type-erased state.
//!
//! Keyed storage holds every state as a `MutableState<AnyValue>`. [`Typed<T>`]
//! wraps one of those after checking, once, that the stored value really is a
//! `T`. A mismatch is reported as [`StateError::TypeMismatch`] at wrap time,
//! never coerced.

use std::any::{Any, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, StateError};
use crate::observer::untracked;
use crate::policy::{Identity, ReferentialEquality};
use crate::registry::{Callback, Subscription};
use crate::state::{MutableState, State};

/// A shared, type-erased value that remembers its concrete type name.
#[derive(Clone)]
pub struct AnyValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl AnyValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl Identity for AnyValue {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyValue").field(&self.type_name).finish()
    }
}

pub type UntypedState = MutableState<AnyValue>;

/// An untyped state; every `set` of a new `AnyValue` counts as a change.
pub fn untyped_state<T: Any + Send + Sync>(value: T) -> UntypedState {
    MutableState::with_policy(AnyValue::new(value), ReferentialEquality)
}

pub struct Typed<T> {
    cell: UntypedState,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Typed<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Typed<T> {
    pub fn wrap(cell: UntypedState) -> Result<Self> {
        Self::wrap_keyed(cell, "<unkeyed>")
    }

    pub(crate) fn wrap_keyed(cell: UntypedState, key: &str) -> Result<Self> {
        let (matches, found) = untracked(|| cell.with(|v| (v.is::<T>(), v.type_name())));
        if !matches {
            return Err(StateError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
                found,
            });
        }
        Ok(Self {
            cell,
            _marker: PhantomData,
        })
    }

    /// # Panics
    ///
    /// Panics if a value of another type was stored through
    /// [`untyped`](Self::untyped) after wrapping.
    pub fn get(&self) -> T {
        let value = self.cell.with(|v| v.downcast_ref::<T>().cloned());
        match value {
            Some(value) => value,
            None => panic!(
                "typed state expected {}, found {}",
                type_name::<T>(),
                untracked(|| self.cell.with(AnyValue::type_name)),
            ),
        }
    }

    /// Stores `value` unless it equals the current one.
    pub fn set(&self, value: T) -> bool {
        self.cell.update(|current| {
            if current.downcast_ref::<T>() != Some(&value) {
                *current = AnyValue::new(value);
            }
        })
    }

    /// Read-modify-write; stores the result unless it equals the current value.
    ///
    /// # Panics
    ///
    /// Same condition as [`get`](Self::get).
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        self.cell.update(|current| {
            let Some(old) = current.downcast_ref::<T>() else {
                panic!(
                    "typed state expected {}, found {}",
                    type_name::<T>(),
                    current.type_name(),
                );
            };
            let mut next = old.clone();
            f(&mut next);
            let changed = next != *old;
            if changed {
                *current = AnyValue::new(next);
            }
        })
    }

    pub fn subscribe(&self, f: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.cell.subscribe(f)
    }

    pub fn untyped(&self) -> &UntypedState {
        &self.cell
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> State<T> for Typed<T> {
    fn get(&self) -> T {
        Typed::get(self)
    }

    fn subscribe_callback(&self, cb: Callback) -> Subscription {
        self.cell.subscribe_callback(cb)
    }
}

impl<T: fmt::Debug + Clone + PartialEq + Send + Sync + 'static> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = untracked(|| self.cell.with(|v| v.downcast_ref::<T>().cloned()));
        f.debug_tuple("Typed").field(&value).finish()
    }
}
