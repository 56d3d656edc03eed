//! Tern Runtime Kernel
//!
//! The engine of the Tern runtime: it moves lightweight tasks on and off
//! their own stacks, brackets blocking syscalls so the scheduler can reuse
//! workers, and provides the runtime lock and the barrier-aware memory
//! helpers everything above it needs.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        tern-runtime                           │
//! │                                                               │
//! │  Worker::execute ──► task stack ──► switch_to_system_stack    │
//! │        ▲                 │                    │               │
//! │        │            yield / exit        system stack          │
//! │        │                 │                                    │
//! │        └──── Scheduler ◄─┴── enter_syscall / exit_syscall     │
//! │                                                               │
//! │  lock::Mutex     malloc     string     wbarrier     fatal     │
//! └───────────────────────────────────────────────────────────────┘
//!        │ unsafe primitives          │ host services
//!        ▼                            ▼
//!  tern-primitives              tern-host::Host
//! ```
//!
//! # Module Organization
//!
//! - `worker` - workers, per-thread binding, `execute` and `retake`
//! - `task` - task descriptors, entry/exit, `yield_now`
//! - `stack_switch` - `switch_to_system_stack`
//! - `syscall` - the syscall boundary protocol
//! - `scheduler` - the interface to the external scheduler
//! - `lock` - the runtime mutex
//! - `malloc` - allocation trampoline to the host
//! - `string` - runtime strings and slices
//! - `wbarrier` - barrier-gated pointer stores and typed copies
//! - `config` - stack sizes
//! - `fatal` - unrecoverable errors

pub mod config;
pub mod fatal;
pub mod lock;
pub mod malloc;
pub mod scheduler;
pub mod stack_switch;
pub mod string;
pub mod syscall;
pub mod task;
pub mod wbarrier;
pub mod worker;

use std::sync::Arc;

use tern_core::RuntimeSnapshot;
use tern_host::Host;
use tern_primitives::StackError;
use tracing::debug;

pub use config::{ConfigError, RuntimeConfig};
pub use fatal::FatalError;
pub use lock::{Mutex, MutexGuard, RawMutex};
pub use scheduler::{Reattach, Scheduler};
pub use stack_switch::switch_to_system_stack;
pub use string::{RawString, RtStr};
pub use syscall::{enter_syscall, enter_syscall_blocking, exit_syscall};
pub use task::{yield_now, Task};
pub use worker::{current_task, current_worker, Suspension, Worker};

// Re-export the shared vocabulary
pub use tern_core::{StackContext, SyscallHint, SyscallMark, TaskId, TaskStatus, TypeDesc, WorkerId};
pub use tern_host::{AllocError, AllocRequest};

/// Factory for workers and tasks sharing one host and one scheduler.
pub struct Runtime {
    host: Arc<dyn Host>,
    scheduler: Arc<dyn Scheduler>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(
        host: Arc<dyn Host>,
        scheduler: Arc<dyn Scheduler>,
        config: RuntimeConfig,
    ) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        debug!(?config, "runtime created");
        Ok(Self {
            host,
            scheduler,
            config,
        })
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create an idle worker with its own system stack.
    pub fn new_worker(&self) -> Result<Arc<Worker>, StackError> {
        Worker::new(
            Arc::clone(&self.host),
            Arc::clone(&self.scheduler),
            self.config.system_stack_size,
        )
    }

    /// Create a `Runnable` task that will run `entry` on its own stack.
    pub fn new_task<F>(&self, entry: F) -> Result<Arc<Task>, StackError>
    where
        F: FnOnce() + Send + 'static,
    {
        Task::new(self.config.task_stack_size, entry)
    }

    /// Route fatal errors raised on this thread outside any task to this
    /// runtime's host until the guard is dropped.
    pub fn enter(&self) -> EnterGuard {
        EnterGuard {
            previous: worker::swap_entered_host(Some(Arc::clone(&self.host))),
        }
    }
}

/// Returned by [`Runtime::enter`].
#[must_use = "the runtime is exited when the guard is dropped"]
pub struct EnterGuard {
    previous: Option<Arc<dyn Host>>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        worker::swap_entered_host(self.previous.take());
    }
}

/// Capture the observable state of `workers` and `tasks` for
/// [`tern_core::check_all_invariants`].
pub fn snapshot(workers: &[Arc<Worker>], tasks: &[Arc<Task>]) -> RuntimeSnapshot {
    RuntimeSnapshot {
        workers: workers.iter().map(|w| w.view()).collect(),
        tasks: tasks.iter().map(|t| t.view()).collect(),
    }
}
