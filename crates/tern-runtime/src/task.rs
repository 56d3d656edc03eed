//! Task descriptors, entry and exit
//!
//! A task owns its stack and a saved context. Its status is an atomic word
//! changed only by compare-and-swap along the edges of the task state
//! machine; any other change is fatal.
//!
//! A task never publishes itself as `Runnable` from its own stack. Yielding
//! only raises a flag; the thread that executed the task makes the
//! `Running -> Runnable` edge after the switch back has saved the task's
//! registers, so no other thread can resume a half-saved context.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tern_core::{StackContext, SyscallMark, TaskId, TaskStatus, TaskView, TransitionError, WorkerId};
use tern_primitives::{context, Context, ExclusiveCell, StackError, StackRegion};
use tracing::{debug, trace};

use crate::fatal::{self, FatalError};
use crate::worker;

type Entry = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// A lightweight task.
pub struct Task {
    id: TaskId,
    status: AtomicU8,
    worker: AtomicU64,
    syscall_mark: AtomicI32,
    /// Set by `yield_now`, consumed by `Worker::execute`
    yielding: AtomicBool,
    /// Parked in a deferred syscall exit, waiting on its own thread
    awaiting_worker: AtomicBool,
    stack: StackRegion,
    /// The task's own registers while it is not on its stack
    ctx: ExclusiveCell<Context>,
    /// Where to go when the task suspends: the executing host thread
    resume: ExclusiveCell<Context>,
    entry: Mutex<Option<Entry>>,
    panic: Mutex<Option<PanicPayload>>,
}

impl Task {
    pub(crate) fn new<F>(stack_size: usize, entry: F) -> Result<Arc<Self>, StackError>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Arc::new(Self {
            id: TaskId::next(),
            status: AtomicU8::new(TaskStatus::Runnable as u8),
            worker: AtomicU64::new(0),
            syscall_mark: AtomicI32::new(0),
            yielding: AtomicBool::new(false),
            awaiting_worker: AtomicBool::new(false),
            stack: StackRegion::new(stack_size)?,
            ctx: ExclusiveCell::new(Context::empty()),
            resume: ExclusiveCell::new(Context::empty()),
            entry: Mutex::new(Some(Box::new(entry))),
            panic: Mutex::new(None),
        });

        let fresh = Context::for_entry(&task.stack, task_main, Arc::as_ptr(&task).cast_mut().cast());
        // SAFETY: the task is not shared yet
        unsafe { *task.ctx.get() = fresh };

        debug!(task = %task.id, stack = task.stack.size(), "task created");
        Ok(task)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(TaskStatus::Dead)
    }

    /// The worker running this task, if any
    pub fn worker(&self) -> Option<WorkerId> {
        WorkerId::from_raw(self.worker.load(Ordering::Acquire))
    }

    pub(crate) fn set_worker(&self, worker: Option<WorkerId>) {
        self.worker
            .store(worker.map_or(0, |w| w.0), Ordering::Release);
    }

    /// Mark recorded by the last syscall entry
    pub fn syscall_mark(&self) -> SyscallMark {
        SyscallMark(self.syscall_mark.load(Ordering::Relaxed))
    }

    pub(crate) fn set_syscall_mark(&self, mark: SyscallMark) {
        self.syscall_mark.store(mark.0, Ordering::Relaxed);
    }

    /// The task's own stack
    pub fn stack(&self) -> &StackRegion {
        &self.stack
    }

    /// Stack pointer saved by the last switch away from the task's stack.
    ///
    /// # Safety
    ///
    /// The saved context is written without synchronization by whichever
    /// thread switches the task. Call this only on the thread currently
    /// executing the task (for example from its system stack), or while the
    /// task is suspended and no thread is executing it.
    pub unsafe fn saved_sp(&self) -> usize {
        // SAFETY: forwarded from the caller
        unsafe { (*self.ctx.get()).sp() }
    }

    /// Move `from -> to` or throw.
    pub(crate) fn transition(&self, from: TaskStatus, to: TaskStatus) {
        fatal::check(self.try_transition(from, to));
    }

    pub(crate) fn try_transition(
        &self,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<(), TransitionError> {
        from.check_transition(to)?;
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| TransitionError {
                from: TaskStatus::from_u8(actual).unwrap_or(TaskStatus::Dead),
                to,
            })
    }

    pub(crate) fn saved_context(&self) -> *mut Context {
        self.ctx.get()
    }

    pub(crate) fn resume_context(&self) -> *mut Context {
        self.resume.get()
    }

    /// Consume the yield flag raised by `yield_now`.
    pub(crate) fn take_yield(&self) -> bool {
        self.yielding.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn awaiting_worker(&self) -> bool {
        self.awaiting_worker.load(Ordering::Acquire)
    }

    pub(crate) fn set_awaiting_worker(&self, awaiting: bool) {
        self.awaiting_worker.store(awaiting, Ordering::Release);
    }

    pub(crate) fn take_panic(&self) -> Option<PanicPayload> {
        self.panic.lock().take()
    }

    /// Observable state for invariant checks
    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id,
            status: self.status(),
            worker: self.worker(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("worker", &self.worker())
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Entry and Exit
// ============================================================================

/// First frame on every task stack.
///
/// Runs the entry, then the exit routine, then switches back to the
/// executing thread for good. Panics from either are caught here and
/// carried out through [`Worker::execute`](crate::Worker::execute).
unsafe extern "C" fn task_main(arg: *mut u8) -> ! {
    // SAFETY: `arg` is the task's own Arc pointer; the executing thread
    // holds a strong reference for as long as the task runs
    let task = unsafe { &*arg.cast_const().cast::<Task>() };

    let entry = task.entry.lock().take();
    let ran = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(entry) = entry {
            entry();
        }
    }));
    let exited = panic::catch_unwind(AssertUnwindSafe(|| exit_current(task)));
    if let Err(payload) = ran.and(exited) {
        *task.panic.lock() = Some(payload);
    }

    // SAFETY: the resume context was saved by `execute` on this thread
    unsafe { context::switch(task.saved_context(), task.resume_context()) };

    // A dead task is never resumed
    std::process::abort()
}

/// Exit routine: the task's entry has returned.
fn exit_current(task: &Task) {
    let Some((worker, current)) = worker::current() else {
        fatal::throw(FatalError::UnexpectedContext("task exit with no worker"))
    };
    let held = worker::locks_held();
    if held > 0 {
        fatal::throw(FatalError::LocksHeld("task exit", held));
    }
    task.transition(TaskStatus::Running, TaskStatus::Dead);
    debug!(task = %task.id, worker = %worker.id(), "task exited");
    worker.scheduler.task_exited(&current);
}

/// Give up the worker and let the scheduler run something else.
///
/// The task becomes `Runnable` once `Worker::execute` is back on the
/// executing thread; it continues from here the next time some worker
/// executes it.
pub fn yield_now() {
    let Some((worker, task)) = worker::current() else {
        fatal::throw(FatalError::UnexpectedContext("yield outside a task"))
    };
    if worker.context() != StackContext::Task {
        fatal::throw(FatalError::UnexpectedContext("yield off the task stack"));
    }
    let held = worker::locks_held();
    if held > 0 {
        fatal::throw(FatalError::LocksHeld("yield", held));
    }

    task.yielding.store(true, Ordering::Release);
    trace!(task = %task.id, worker = %worker.id(), "yield");
    let (from, to) = (task.saved_context(), task.resume_context());
    // Arcs on a suspended stack would pin the worker and the task
    drop(worker);
    drop(task);
    // SAFETY: the executing thread keeps the task alive while it is
    // suspended and resumes it at most once
    unsafe { context::switch(from, to) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_runnable_and_unassigned() {
        let task = Task::new(16 * 1024, || {}).unwrap();
        assert_eq!(task.status(), TaskStatus::Runnable);
        assert_eq!(task.worker(), None);
        // Not shared yet, so nothing else touches the saved context
        assert!(task.stack().contains(unsafe { task.saved_sp() }));
    }

    #[test]
    fn test_try_transition() {
        let task = Task::new(16 * 1024, || {}).unwrap();
        assert!(task
            .try_transition(TaskStatus::Runnable, TaskStatus::Running)
            .is_ok());
        assert_eq!(task.status(), TaskStatus::Running);

        // Edge is legal but the status word does not match
        let err = task
            .try_transition(TaskStatus::Runnable, TaskStatus::Running)
            .unwrap_err();
        assert_eq!(err.from, TaskStatus::Running);

        // Not an edge at all
        assert!(task
            .try_transition(TaskStatus::Running, TaskStatus::Running)
            .is_err());
    }

    #[test]
    fn test_yield_flag_is_consumed_once() {
        let task = Task::new(16 * 1024, || {}).unwrap();
        assert!(!task.take_yield());
        task.yielding.store(true, Ordering::Release);
        assert!(task.take_yield());
        assert!(!task.take_yield());
        assert_eq!(task.status(), TaskStatus::Runnable);
    }

    #[test]
    fn test_view() {
        let task = Task::new(16 * 1024, || {}).unwrap();
        task.set_worker(Some(WorkerId(9)));
        let v = task.view();
        assert_eq!(v.id, task.id());
        assert_eq!(v.worker, Some(WorkerId(9)));
    }
}
