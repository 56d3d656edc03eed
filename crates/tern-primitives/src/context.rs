//! Saved execution contexts
//!
//! A [`Context`] is the callee-saved register set of a suspended execution:
//! stack pointer, resume address and whatever the ABI requires the callee to
//! preserve. [`switch`] saves the current execution into one context and
//! resumes another; it returns when something later switches back.
//!
//! # Safety Invariants
//!
//! 1. A context is resumed at most once per save
//! 2. The stack a context refers to outlives every resume of it
//! 3. Only one execution runs on a given stack at a time

use crate::arch;
use crate::region::StackRegion;

/// First function a fresh task context runs. It receives the argument given
/// to [`Context::for_entry`] and must never return.
pub type TaskEntry = unsafe extern "C" fn(*mut u8) -> !;

/// Saved register state of a suspended execution.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Context(arch::Context);

impl Context {
    /// A context with nothing saved in it. Only valid as a `from` argument.
    pub const fn empty() -> Self {
        Self(arch::Context::empty())
    }

    /// A context that, when resumed, calls `entry(arg)` at the top of `stack`.
    pub fn for_entry(stack: &StackRegion, entry: TaskEntry, arg: *mut u8) -> Self {
        Self(arch::Context::fresh(
            stack.top() as usize,
            entry as usize,
            arg as usize,
        ))
    }

    /// Saved stack pointer
    pub fn sp(&self) -> usize {
        self.0.sp
    }

    /// Saved resume address
    pub fn pc(&self) -> usize {
        self.0.pc
    }
}

/// Save the current execution into `from` and resume `to`.
///
/// # Safety
///
/// - Both pointers must be valid for the duration of the switch
/// - `to` must hold a context produced by [`Context::for_entry`] or by an
///   earlier `switch` out of it, and not resumed since
/// - `from` and `to` must not alias
#[inline]
pub unsafe fn switch(from: *mut Context, to: *const Context) {
    debug_assert!(!core::ptr::eq(from, to), "switch: from and to alias");
    // SAFETY: Context is repr(transparent) over the arch save area; the
    // caller upholds the resume-once and liveness rules
    unsafe { arch::switch(from.cast(), to.cast()) }
}

/// Run `f(arg)` on `stack`, then return on the caller's stack.
///
/// The caller's stack pointer and resume address are recorded in `save`
/// for the duration of the call.
///
/// # Safety
///
/// - `stack` must not be in use by any other execution
/// - `f` must return normally; unwinding out of it is undefined behavior
/// - `save` must be valid for writes
#[inline]
pub unsafe fn call_on_stack(
    stack: &StackRegion,
    f: unsafe extern "C" fn(*mut u8),
    arg: *mut u8,
    save: *mut Context,
) {
    // SAFETY: stack top is aligned and owned; caller upholds the rest
    unsafe { arch::call_on_stack(arg, f, stack.top(), save.cast()) }
}
