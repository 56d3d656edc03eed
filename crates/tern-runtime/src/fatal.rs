//! Fatal runtime errors
//!
//! Invariant violations are never returned to callers. They are logged and
//! reported through [`Host::report_fatal`], which does not return. The host
//! is the one bound to the current thread: the running worker's host, or
//! the host of a runtime entered with [`Runtime::enter`](crate::Runtime::enter).
//! A thread with neither aborts.

use tern_core::{TaskId, TransitionError, WorkerId};
use tern_host::Host;
use tracing::error;

use crate::worker;

/// An unrecoverable runtime invariant violation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    #[error("called from unexpected execution context: {0}")]
    UnexpectedContext(&'static str),

    #[error("system stack call returned to a different task")]
    WrongTask,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("entersyscall inside entersyscall")]
    NestedSyscall,

    #[error("exitsyscall: task is not in a syscall")]
    NotInSyscall,

    #[error("worker {0} is not idle")]
    WorkerBusy(WorkerId),

    #[error("task {0} is waiting for a worker on its own thread")]
    AwaitingWorker(TaskId),

    #[error("system stack call returned inside a syscall")]
    SyscallOnSystemStack,

    #[error("lock: lock already held by this thread")]
    Reentrant,

    #[error("unlock of unlocked lock")]
    UnlockOfUnlocked,

    #[error("{0} while holding {1} runtime locks")]
    LocksHeld(&'static str, u32),

    #[error("string scan reached {0} bytes without a terminator")]
    Unterminated(usize),
}

/// Report `err` on the current thread's host.
#[cold]
pub fn throw(err: FatalError) -> ! {
    match worker::fatal_host() {
        Some(host) => report(&*host, err),
        None => {
            error!(%err, "fatal error with no host bound to this thread");
            std::process::abort()
        }
    }
}

/// Report `err` on `host`.
#[cold]
pub fn report(host: &dyn Host, err: FatalError) -> ! {
    let message = err.to_string();
    error!(message = %message, "fatal error");
    host.report_fatal(&message)
}

/// Unwrap a transition result or throw.
pub(crate) fn check<T>(result: Result<T, TransitionError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => throw(e.into()),
    }
}
