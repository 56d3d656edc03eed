//! Running closures on the worker's system stack
//!
//! Task stacks are small and owned by the task; some runtime work must not
//! run on them. [`switch_to_system_stack`] saves the task's stack pointer
//! and resume address into the task's saved context, runs a closure at the
//! top of the worker's system stack, and comes back.
//!
//! The switch is a stack transfer, not a suspension: the task stays
//! `Running` and the worker stays bound to it throughout.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tern_core::{StackContext, TaskStatus};
use tern_primitives::context;
use tracing::trace;

use crate::fatal::{self, FatalError};
use crate::task::PanicPayload;
use crate::worker;

/// Closure and result slots, living on the task stack for the duration of
/// the call.
struct SystemCall<F, R> {
    f: Option<F>,
    result: Option<R>,
    panic: Option<PanicPayload>,
}

unsafe extern "C" fn run_on_system_stack<F, R>(arg: *mut u8)
where
    F: FnOnce() -> R,
{
    // SAFETY: `arg` points at the caller's SystemCall, which outlives this
    // call and is not touched by the caller until it returns
    let call = unsafe { &mut *arg.cast::<SystemCall<F, R>>() };
    if let Some(f) = call.f.take() {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(r) => call.result = Some(r),
            Err(payload) => call.panic = Some(payload),
        }
    }
}

/// Run `f` on the current worker's system stack and return its result.
///
/// Must be called from a running task's own stack. Calling it with no task,
/// from the system stack itself, or while the task is in a syscall is
/// fatal. `f` may bracket a syscall of its own, which then must end before
/// `f` returns. A panic in `f` is re-raised on the task stack.
pub fn switch_to_system_stack<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let Some((worker, task)) = worker::current() else {
        fatal::throw(FatalError::UnexpectedContext("no task on this thread"))
    };
    match worker.context() {
        StackContext::Task => {}
        StackContext::System => {
            fatal::throw(FatalError::UnexpectedContext("already on the system stack"))
        }
        StackContext::Scheduler => {
            fatal::throw(FatalError::UnexpectedContext("not on a task stack"))
        }
    }
    if task.status() == TaskStatus::InSyscall {
        fatal::throw(FatalError::UnexpectedContext("task is in a syscall"));
    }

    let mut call = SystemCall {
        f: Some(f),
        result: None,
        panic: None,
    };

    worker.set_context(StackContext::System);
    trace!(worker = %worker.id(), task = %task.id(), "switch to system stack");
    // SAFETY: the system stack belongs to this worker, which is bound to
    // this thread and not on it; the trampoline catches every panic
    unsafe {
        context::call_on_stack(
            worker.system_stack(),
            run_on_system_stack::<F, R>,
            (&raw mut call).cast(),
            task.saved_context(),
        )
    };

    match worker::current() {
        Some((w, t)) if Arc::ptr_eq(&t, &task) && Arc::ptr_eq(&w, &worker) => {}
        _ => fatal::throw(FatalError::WrongTask),
    }
    // A pinned syscall entered on the system stack must also end there
    if task.status() == TaskStatus::InSyscall {
        fatal::throw(FatalError::SyscallOnSystemStack);
    }
    worker.set_context(StackContext::Task);
    trace!(worker = %worker.id(), task = %task.id(), "back on task stack");

    if let Some(payload) = call.panic.take() {
        panic::resume_unwind(payload);
    }
    match call.result.take() {
        Some(r) => r,
        None => fatal::throw(FatalError::UnexpectedContext("system stack call produced no result")),
    }
}
