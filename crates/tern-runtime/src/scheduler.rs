//! Scheduler interface
//!
//! Run queues and load balancing live outside the kernel. The kernel calls
//! into the scheduler at the syscall boundary and when a task exits; the
//! scheduler calls back into the kernel with [`Worker::retake`] and
//! [`Worker::execute`].

use std::sync::Arc;

use tern_core::SyscallHint;

use crate::task::Task;
use crate::worker::Worker;

/// Outcome of [`Scheduler::reattach`].
pub enum Reattach {
    /// Continue the task on this idle worker now.
    Worker(Arc<Worker>),
    /// No worker is free. The task becomes `Runnable` and the calling
    /// thread waits in [`Scheduler::await_worker`].
    ///
    /// The task is still on its own stack on that thread. It must not be
    /// passed to [`Worker::execute`] while it waits; the worker returned by
    /// `await_worker` continues it on the waiting thread. `execute` treats a
    /// violation as fatal.
    Deferred,
}

/// Callbacks from the kernel into the external scheduler.
///
/// Every method runs on the thread of the task concerned, on that task's own
/// stack, with no runtime lock held.
pub trait Scheduler: Send + Sync + 'static {
    /// `worker` has entered a syscall on behalf of its task and may be
    /// retaken with [`Worker::retake`], immediately for a
    /// [`SyscallHint::Blocking`] call.
    fn detach(&self, worker: &Arc<Worker>, hint: SyscallHint);

    /// `task` is leaving a syscall but `previous` was retaken meanwhile.
    /// Return an idle worker to continue on, or defer.
    fn reattach(&self, task: &Arc<Task>, previous: &Arc<Worker>) -> Reattach;

    /// Block until an idle worker is available for `task`.
    fn await_worker(&self, task: &Arc<Task>) -> Arc<Worker>;

    /// `task` has finished; it is `Dead` and about to leave its worker.
    fn task_exited(&self, _task: &Arc<Task>) {}
}
