//! Cell for state with a single logical owner
//!
//! Saved task contexts are written by whichever thread is suspending the
//! task and read by whichever thread resumes it. The runtime's status
//! protocol guarantees those accesses never overlap, but the compiler cannot
//! see that, so the state lives in an [`ExclusiveCell`].

use core::cell::UnsafeCell;

/// An `UnsafeCell` that is `Send + Sync`.
///
/// # Safety Invariants
///
/// At most one thread accesses the contents at a time, and hand-offs between
/// threads happen through a release/acquire pair (a status CAS or a lock).
/// Violating this is a data race.
#[repr(transparent)]
pub struct ExclusiveCell<T> {
    inner: UnsafeCell<T>,
}

impl<T> ExclusiveCell<T> {
    /// Wrap a value
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
        }
    }

    /// Raw pointer to the contents.
    ///
    /// Dereferencing it is subject to the type's safety invariants.
    pub const fn get(&self) -> *mut T {
        self.inner.get()
    }

    /// Mutable access through a unique borrow
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Unwrap the value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for ExclusiveCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// SAFETY: see the type-level invariants; access is serialized externally
unsafe impl<T: Send> Send for ExclusiveCell<T> {}
unsafe impl<T: Send> Sync for ExclusiveCell<T> {}
