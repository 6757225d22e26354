//! # Mutation policies
//!
//! A policy decides whether writing a value to a state is a real change.
//! `MutableState::set` with a value the policy judges equivalent to the
//! current one does nothing at all: no store, no notification.
//!
//! - [`StructuralEquality`] — `PartialEq` (the default).
//! - [`ReferentialEquality`] — identity for shared pointers, plain equality
//!   for primitives.
//! - [`NeverEqual`] — every write is a change (signal-like use).
//! - [`CustomPolicy`] — caller-supplied functions, built with
//!   [`CustomPolicy::builder`].
//!
//! Policies may also offer a three-way [`merge`](MutationPolicy::merge) for
//! callers layering optimistic conflict resolution on top of a state. The
//! engine itself never calls it.

use std::sync::Arc;

use crate::error::{Result, StateError};

pub trait MutationPolicy<T>: Send + Sync + 'static {
    fn equivalent(&self, a: &T, b: &T) -> bool;

    /// Resolve a conflicting write. `None` means the conflict is unresolved.
    fn merge(&self, _previous: &T, _current: &T, _proposed: &T) -> Option<T> {
        None
    }
}

pub type SharedPolicy<T> = Arc<dyn MutationPolicy<T>>;

#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralEquality;

impl<T: PartialEq> MutationPolicy<T> for StructuralEquality {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        a == b
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NeverEqual;

impl<T> MutationPolicy<T> for NeverEqual {
    fn equivalent(&self, _a: &T, _b: &T) -> bool {
        false
    }
}

/// Identity comparison used by [`ReferentialEquality`].
pub trait Identity {
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl Identity for &'static str {
    fn same(&self, other: &Self) -> bool {
        std::ptr::eq(*self, *other)
    }
}

macro_rules! identity_by_value {
    ($($t:ty),* $(,)?) => {
        $(impl Identity for $t {
            fn same(&self, other: &Self) -> bool {
                self == other
            }
        })*
    };
}

identity_by_value!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, (),
);

#[derive(Clone, Copy, Debug, Default)]
pub struct ReferentialEquality;

impl<T: Identity> MutationPolicy<T> for ReferentialEquality {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        a.same(b)
    }
}

type EquivalentFn<T> = dyn Fn(&T, &T) -> bool + Send + Sync;
type MergeFn<T> = dyn Fn(&T, &T, &T) -> Option<T> + Send + Sync;

pub struct CustomPolicy<T> {
    equivalent: Box<EquivalentFn<T>>,
    merge: Option<Box<MergeFn<T>>>,
}

impl<T: 'static> CustomPolicy<T> {
    pub fn builder() -> CustomPolicyBuilder<T> {
        CustomPolicyBuilder {
            equivalent: None,
            merge: None,
        }
    }

    /// Shorthand for a policy with only an equivalence function.
    pub fn new(equivalent: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            equivalent: Box::new(equivalent),
            merge: None,
        }
    }
}

impl<T: 'static> MutationPolicy<T> for CustomPolicy<T> {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        (self.equivalent)(a, b)
    }

    fn merge(&self, previous: &T, current: &T, proposed: &T) -> Option<T> {
        self.merge
            .as_ref()
            .and_then(|m| m(previous, current, proposed))
    }
}

pub struct CustomPolicyBuilder<T> {
    equivalent: Option<Box<EquivalentFn<T>>>,
    merge: Option<Box<MergeFn<T>>>,
}

impl<T: 'static> CustomPolicyBuilder<T> {
    pub fn equivalent(mut self, f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equivalent = Some(Box::new(f));
        self
    }

    pub fn merge(mut self, f: impl Fn(&T, &T, &T) -> Option<T> + Send + Sync + 'static) -> Self {
        self.merge = Some(Box::new(f));
        self
    }

    /// Fails with [`StateError::MissingComparison`] when no equivalence
    /// function was given.
    pub fn build(self) -> Result<CustomPolicy<T>> {
        let equivalent = self.equivalent.ok_or(StateError::MissingComparison)?;
        Ok(CustomPolicy {
            equivalent,
            merge: self.merge,
        })
    }
}
