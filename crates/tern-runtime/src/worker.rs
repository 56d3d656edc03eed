//! Workers and per-thread runtime state
//!
//! A [`Worker`] is the unit the scheduler hands out: a dedicated system
//! stack, at most one current task, and the syscall bookkeeping that lets the
//! scheduler take it back while its task is blocked. A host thread runs a
//! task by calling [`Worker::execute`], which switches onto the task's stack
//! and returns once the task yields, finishes, or panics.
//!
//! # Thread Binding
//!
//! While a task runs, the host thread's [`ThreadState`] names the worker
//! and the task. The binding follows the execution, not the worker: when a
//! task leaving a syscall is moved to a different worker, the thread is
//! rebound to that worker and `execute` cleans up whichever worker is bound
//! when the task finally suspends.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::cell::RefCell;
use std::panic;
use std::sync::Arc;

use parking_lot::Mutex;
use tern_core::{StackContext, TaskId, TaskStatus, WorkerId, WorkerView};
use tern_host::Host;
use tern_primitives::{context, StackError, StackRegion};
use tracing::{debug, trace};

use crate::fatal::{self, FatalError};
use crate::scheduler::Scheduler;
use crate::task::Task;

// ============================================================================
// Thread State
// ============================================================================

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Runtime state of one host thread.
struct ThreadState {
    worker: Option<Arc<Worker>>,
    task: Option<Arc<Task>>,
    /// Host of an entered runtime, used for fatal reports off-worker
    host: Option<Arc<dyn Host>>,
    /// Host of the worker this thread was unbound from while its task
    /// waits in the scheduler for a new one
    parked_host: Option<Arc<dyn Host>>,
    /// Runtime locks held by this thread
    locks: u32,
    /// Nonzero, unique per thread; identifies lock owners
    token: u64,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            worker: None,
            task: None,
            host: None,
            parked_host: None,
            locks: 0,
            token: NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed),
        }
    }
}

thread_local! {
    static STATE: RefCell<ThreadState> = RefCell::new(ThreadState::new());
}

/// The worker and task bound to this thread, if a task is running.
pub(crate) fn current() -> Option<(Arc<Worker>, Arc<Task>)> {
    STATE.with(|s| {
        let s = s.borrow();
        Some((s.worker.clone()?, s.task.clone()?))
    })
}

/// The worker bound to this thread
pub fn current_worker() -> Option<Arc<Worker>> {
    STATE.with(|s| s.borrow().worker.clone())
}

/// The task running on this thread
pub fn current_task() -> Option<Arc<Task>> {
    STATE.with(|s| s.borrow().task.clone())
}

pub(crate) fn fatal_host() -> Option<Arc<dyn Host>> {
    STATE.with(|s| {
        let s = s.borrow();
        s.worker
            .as_ref()
            .map(|w| Arc::clone(&w.host))
            .or_else(|| s.parked_host.clone())
            .or_else(|| s.host.clone())
    })
}

/// Replace the thread's fallback host, returning the previous one.
pub(crate) fn swap_entered_host(host: Option<Arc<dyn Host>>) -> Option<Arc<dyn Host>> {
    STATE.with(|s| core::mem::replace(&mut s.borrow_mut().host, host))
}

fn rebind_worker(worker: Arc<Worker>) {
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.worker = Some(worker);
        s.parked_host = None;
    });
}

/// Detach this thread from its worker while the task stays bound.
///
/// Used while a task leaving a syscall asks the scheduler for a worker: the
/// old worker may already run another thread's task, so nothing done here
/// (lock counting in particular) may touch it.
pub(crate) fn unbind_worker() {
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        if let Some(w) = s.worker.take() {
            s.parked_host = Some(Arc::clone(&w.host));
        }
    });
}

pub(crate) fn thread_token() -> u64 {
    STATE.with(|s| s.borrow().token)
}

pub(crate) fn locks_held() -> u32 {
    STATE.with(|s| s.borrow().locks)
}

/// Count a runtime lock acquisition on this thread and its worker.
pub(crate) fn lock_acquired() {
    let worker = STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.locks += 1;
        s.worker.clone()
    });
    if let Some(w) = worker {
        w.locks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Count a runtime lock release on this thread and its worker.
pub(crate) fn lock_released() {
    let worker = STATE.with(|s| {
        let mut s = s.borrow_mut();
        s.locks = s.locks.saturating_sub(1);
        s.worker.clone()
    });
    if let Some(w) = worker {
        // The worker may have been retaken and re-adopted since the lock was
        // taken, resetting its count
        let _ = w
            .locks
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

// ============================================================================
// Worker
// ============================================================================

/// How a call to [`Worker::execute`] ended.
#[derive(Debug)]
pub struct Suspension {
    /// Task status after the switch back: `Runnable` or `Dead`
    pub status: TaskStatus,
    /// The worker the task was on when it suspended, now idle. Differs from
    /// the executing worker if the task was reattached after a syscall.
    pub worker: Arc<Worker>,
}

/// A worker: system stack, current task, syscall state.
pub struct Worker {
    id: WorkerId,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) system_stack: StackRegion,
    current: Mutex<Option<Arc<Task>>>,
    context: AtomicU8,
    in_syscall: AtomicBool,
    /// Id of the task in a syscall on this worker; zero when none. Exit and
    /// retake race to clear it.
    syscall_task: AtomicU64,
    locks: AtomicU32,
}

impl Worker {
    pub(crate) fn new(
        host: Arc<dyn Host>,
        scheduler: Arc<dyn Scheduler>,
        system_stack_size: usize,
    ) -> Result<Arc<Self>, StackError> {
        let worker = Arc::new(Self {
            id: WorkerId::next(),
            host,
            scheduler,
            system_stack: StackRegion::new(system_stack_size)?,
            current: Mutex::new(None),
            context: AtomicU8::new(StackContext::Scheduler as u8),
            in_syscall: AtomicBool::new(false),
            syscall_task: AtomicU64::new(0),
            locks: AtomicU32::new(0),
        });
        debug!(worker = %worker.id, stack = worker.system_stack.size(), "worker created");
        Ok(worker)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Which stack this worker is executing on
    pub fn context(&self) -> StackContext {
        StackContext::from_u8(self.context.load(Ordering::Acquire))
            .unwrap_or(StackContext::Scheduler)
    }

    pub(crate) fn set_context(&self, ctx: StackContext) {
        self.context.store(ctx as u8, Ordering::Release);
    }

    /// The task currently assigned to this worker
    pub fn current(&self) -> Option<Arc<Task>> {
        self.current.lock().clone()
    }

    pub fn in_syscall(&self) -> bool {
        self.in_syscall.load(Ordering::Acquire)
    }

    /// Runtime locks held by the execution on this worker
    pub fn locks(&self) -> u32 {
        self.locks.load(Ordering::Relaxed)
    }

    /// The dedicated system stack
    pub fn system_stack(&self) -> &StackRegion {
        &self.system_stack
    }

    /// Whether the worker has no task and sits in the scheduler context.
    pub fn is_idle(&self) -> bool {
        self.current.lock().is_none() && self.context() == StackContext::Scheduler
    }

    /// Run `task` on this worker until it yields, exits or panics.
    ///
    /// Called by the scheduler on a host thread that is not already running
    /// a task. A panic raised by the task (including a fatal report from a
    /// panicking host) is propagated to the caller after the worker has
    /// been cleaned up.
    pub fn execute(self: &Arc<Self>, task: &Arc<Task>) -> Suspension {
        if current_task().is_some() {
            fatal::report(
                &*self.host,
                FatalError::UnexpectedContext("execute called from a running task"),
            );
        }
        if !self.is_idle() {
            fatal::report(&*self.host, FatalError::WorkerBusy(self.id));
        }

        if let Err(e) = task.try_transition(TaskStatus::Runnable, TaskStatus::Running) {
            fatal::report(&*self.host, e.into());
        }
        // The task's own thread is still on its stack, waiting in the
        // scheduler for a worker
        if task.awaiting_worker() {
            fatal::report(&*self.host, FatalError::AwaitingWorker(task.id()));
        }
        self.adopt(task);
        STATE.with(|s| {
            let mut s = s.borrow_mut();
            s.worker = Some(Arc::clone(self));
            s.task = Some(Arc::clone(task));
        });

        trace!(worker = %self.id, task = %task.id(), "switch to task");
        // SAFETY: the task is Running and bound to this thread only; its
        // saved context was produced by `for_entry` or by its last suspend
        unsafe { context::switch(task.resume_context(), task.saved_context()) };

        let (bound, _) = STATE.with(|s| {
            let mut s = s.borrow_mut();
            s.parked_host = None;
            (s.worker.take(), s.task.take())
        });
        let worker = bound.unwrap_or_else(|| Arc::clone(self));
        worker.release();

        // The task's registers are saved and this thread is off its stack:
        // only now may another thread pick it up
        if task.take_yield() {
            if let Err(e) = task.try_transition(TaskStatus::Running, TaskStatus::Runnable) {
                fatal::report(&*worker.host, e.into());
            }
            trace!(worker = %worker.id, task = %task.id(), "task yielded");
            return Suspension {
                status: TaskStatus::Runnable,
                worker,
            };
        }

        let status = task.status();
        trace!(worker = %worker.id, task = %task.id(), ?status, "task suspended");
        if let Some(payload) = task.take_panic() {
            panic::resume_unwind(payload);
        }
        Suspension { status, worker }
    }

    /// Take this worker back from a task blocked in a syscall.
    ///
    /// Returns `false` if no task is in a syscall here or the task already
    /// left it. On success the worker is idle and the task will look for a
    /// new worker when its syscall returns.
    pub fn retake(&self) -> bool {
        let mut current = self.current.lock();
        let tid = self.syscall_task.load(Ordering::Acquire);
        if tid == 0
            || self
                .syscall_task
                .compare_exchange(tid, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return false;
        }

        if let Some(task) = current.take() {
            task.set_worker(None);
        }
        self.in_syscall.store(false, Ordering::Release);
        self.locks.store(0, Ordering::Relaxed);
        self.set_context(StackContext::Scheduler);
        debug!(worker = %self.id, task = tid, "worker retaken");
        true
    }

    /// Make `task` this worker's current task.
    pub(crate) fn adopt(&self, task: &Arc<Task>) {
        let mut current = self.current.lock();
        if current.is_some() || self.context() != StackContext::Scheduler {
            drop(current);
            fatal::report(&*self.host, FatalError::WorkerBusy(self.id));
        }
        *current = Some(Arc::clone(task));
        task.set_worker(Some(self.id));
        self.set_context(StackContext::Task);
    }

    /// Adopt a task leaving a syscall on this thread and bind to it.
    pub(crate) fn adopt_from_syscall(self: &Arc<Self>, task: &Arc<Task>) {
        self.adopt(task);
        self.locks.store(locks_held(), Ordering::Relaxed);
        rebind_worker(Arc::clone(self));
        debug!(worker = %self.id, task = %task.id(), "task reattached");
    }

    /// Drop the current task and return to the scheduler context.
    fn release(&self) {
        if let Some(task) = self.current.lock().take() {
            task.set_worker(None);
        }
        self.in_syscall.store(false, Ordering::Release);
        self.syscall_task.store(0, Ordering::Release);
        self.set_context(StackContext::Scheduler);
    }

    /// Mark `task` as in a syscall on this worker. Only a retakeable
    /// syscall publishes the task for [`retake`](Self::retake).
    pub(crate) fn begin_syscall(&self, task: TaskId, retakeable: bool) {
        self.in_syscall.store(true, Ordering::Release);
        if retakeable {
            self.syscall_task.store(task.0, Ordering::Release);
        }
    }

    /// Leave a syscall that was never published for retake.
    pub(crate) fn end_pinned_syscall(&self) {
        self.in_syscall.store(false, Ordering::Release);
    }

    /// Fast syscall exit: reclaim this worker unless it was retaken.
    pub(crate) fn try_end_syscall(&self, task: TaskId) -> bool {
        if self
            .syscall_task
            .compare_exchange(task.0, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.in_syscall.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Observable state for invariant checks
    pub fn view(&self) -> WorkerView {
        let current = self.current.lock();
        WorkerView {
            id: self.id,
            context: self.context(),
            current: current.as_ref().map(|t| t.id()),
            in_syscall: self.in_syscall(),
            locks: self.locks(),
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("context", &self.context())
            .field("in_syscall", &self.in_syscall())
            .field("locks", &self.locks())
            .finish_non_exhaustive()
    }
}
