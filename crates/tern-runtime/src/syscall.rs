//! Syscall boundary protocol
//!
//! A task about to block in the operating system brackets the call with
//! [`enter_syscall`] and [`exit_syscall`]. In between, its worker is
//! detached: the scheduler may [`retake`](crate::Worker::retake) it and run
//! other tasks on it while this host thread waits in the kernel.
//!
//! On exit the task first tries to reclaim its own worker (a single CAS on
//! the worker's syscall slot, racing any retake). If the worker is gone,
//! the scheduler supplies another one now or the task waits for one.
//!
//! A syscall made from the system stack is pinned: the worker's system
//! stack is in use, so the worker is never offered for retake and the exit
//! always keeps it.

use std::sync::Arc;

use tern_core::{StackContext, SyscallHint, SyscallMark, TaskStatus};
use tracing::debug;

use crate::fatal::{self, FatalError};
use crate::scheduler::Reattach;
use crate::task::Task;
use crate::worker::{self, Worker};

/// The current task is about to make a syscall that may block.
pub fn enter_syscall(mark: SyscallMark) {
    enter(mark, SyscallHint::Normal);
}

/// Like [`enter_syscall`], for calls known to block for a long time. The
/// scheduler is told so and may hand the worker off right away.
pub fn enter_syscall_blocking(mark: SyscallMark) {
    enter(mark, SyscallHint::Blocking);
}

fn enter(mark: SyscallMark, hint: SyscallHint) {
    let (worker, task) = running();
    if task.status() == TaskStatus::InSyscall {
        fatal::throw(FatalError::NestedSyscall);
    }
    let pinned = match worker.context() {
        StackContext::Task => false,
        StackContext::System => true,
        StackContext::Scheduler => {
            fatal::throw(FatalError::UnexpectedContext("syscall entry outside a task"))
        }
    };

    task.transition(TaskStatus::Running, TaskStatus::InSyscall);
    task.set_syscall_mark(mark);
    worker.begin_syscall(task.id(), !pinned);
    if pinned {
        debug!(
            task = %task.id(),
            worker = %worker.id(),
            mark = mark.0,
            "enter syscall on the system stack"
        );
        return;
    }
    debug!(task = %task.id(), worker = %worker.id(), mark = mark.0, ?hint, "enter syscall");

    worker.scheduler.detach(&worker, hint);
}

/// The current task's syscall has returned.
///
/// On return the task is `Running` on a worker bound to this thread; that
/// worker may differ from the one it entered the syscall on.
pub fn exit_syscall(mark: SyscallMark) {
    let (previous, task) = running();
    if task.status() != TaskStatus::InSyscall {
        fatal::throw(FatalError::NotInSyscall);
    }

    if previous.context() == StackContext::System {
        previous.end_pinned_syscall();
        task.transition(TaskStatus::InSyscall, TaskStatus::Running);
        debug!(
            task = %task.id(),
            worker = %previous.id(),
            mark = mark.0,
            "exit syscall on the system stack"
        );
        return;
    }

    if previous.try_end_syscall(task.id()) {
        task.transition(TaskStatus::InSyscall, TaskStatus::Running);
        debug!(task = %task.id(), worker = %previous.id(), mark = mark.0, "exit syscall");
        return;
    }

    // `previous` may already be running another thread's task
    worker::unbind_worker();
    let scheduler = Arc::clone(&previous.scheduler);
    let next = match scheduler.reattach(&task, &previous) {
        Reattach::Worker(next) => {
            task.transition(TaskStatus::InSyscall, TaskStatus::Running);
            next
        }
        Reattach::Deferred => {
            task.set_awaiting_worker(true);
            task.transition(TaskStatus::InSyscall, TaskStatus::Runnable);
            debug!(task = %task.id(), "exit syscall deferred, waiting for a worker");
            let next = scheduler.await_worker(&task);
            task.transition(TaskStatus::Runnable, TaskStatus::Running);
            task.set_awaiting_worker(false);
            next
        }
    };
    next.adopt_from_syscall(&task);
    debug!(
        task = %task.id(),
        from = %previous.id(),
        to = %next.id(),
        mark = mark.0,
        "exit syscall on new worker"
    );
}

fn running() -> (Arc<Worker>, Arc<Task>) {
    match worker::current() {
        Some(pair) => pair,
        None => fatal::throw(FatalError::UnexpectedContext("syscall outside a task")),
    }
}
