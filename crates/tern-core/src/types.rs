//! Core runtime types
//!
//! Plain data shared by the primitives and the runtime engine. The status
//! and context enums are `repr(u8)` so the runtime can keep them in atomics.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Task identifier. Zero is reserved to encode "no task" in atomic slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Decode an atomic slot value; zero means none.
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(TaskId(raw))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Worker identifier. Zero is reserved to encode "no worker".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl WorkerId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Decode an atomic slot value; zero means none.
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(WorkerId(raw))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskStatus {
    /// Ready to run, not on any worker
    Runnable = 1,
    /// Executing on a worker
    Running = 2,
    /// Blocked in an operating-system call
    InSyscall = 3,
    /// Entry function returned
    Dead = 4,
}

/// An illegal status transition was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("illegal task status transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl TaskStatus {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(TaskStatus::Runnable),
            2 => Some(TaskStatus::Running),
            3 => Some(TaskStatus::InSyscall),
            4 => Some(TaskStatus::Dead),
            _ => None,
        }
    }

    /// Whether `self -> to` is an edge of the task state machine.
    ///
    /// Every edge either enters or leaves `Running`, except the deferred
    /// reattach edge `InSyscall -> Runnable`.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Runnable, Running)
                | (Running, Runnable)
                | (Running, InSyscall)
                | (Running, Dead)
                | (InSyscall, Running)
                | (InSyscall, Runnable)
        )
    }

    /// Validate `self -> to`.
    pub fn check_transition(self, to: TaskStatus) -> Result<(), TransitionError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(TransitionError { from: self, to })
        }
    }
}

/// Which stack a worker is executing on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StackContext {
    /// Idle, or in the scheduler loop on the host thread's stack
    Scheduler = 0,
    /// On the current task's own stack
    Task = 1,
    /// On the worker's dedicated system stack
    System = 2,
}

impl StackContext {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(StackContext::Scheduler),
            1 => Some(StackContext::Task),
            2 => Some(StackContext::System),
            _ => None,
        }
    }
}

/// Caller-supplied tag recorded on syscall entry/exit for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyscallMark(pub i32);

/// Scheduling hint passed to the scheduler when a worker enters a syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallHint {
    /// Ordinary call; the scheduler may retake the worker if it takes long
    Normal,
    /// Known to block for a long or unbounded time; hand off right away
    Blocking,
}

/// Minimal type descriptor consumed by the allocation and typed-copy paths.
///
/// Reflection proper is external; the runtime only needs the size, the
/// alignment and whether the type holds pointers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeDesc {
    /// Size in bytes
    pub size: usize,
    /// Alignment in bytes (power of two)
    pub align: usize,
    /// Length of the prefix that may contain pointers; zero for scalar data
    pub ptrdata: usize,
    /// Name for diagnostics
    pub name: &'static str,
}

impl TypeDesc {
    /// Pointer-free type
    pub const fn scalar(name: &'static str, size: usize, align: usize) -> Self {
        Self {
            size,
            align,
            ptrdata: 0,
            name,
        }
    }

    /// Type whose first `ptrdata` bytes may contain pointers
    pub const fn with_pointers(
        name: &'static str,
        size: usize,
        align: usize,
        ptrdata: usize,
    ) -> Self {
        Self {
            size,
            align,
            ptrdata,
            name,
        }
    }

    /// Whether a write of this type must consult the write barrier
    pub const fn has_pointers(&self) -> bool {
        self.ptrdata != 0
    }
}

/// Descriptor for raw bytes (string and byte-slice backing memory).
pub const BYTE_TYPE: TypeDesc = TypeDesc::scalar("uint8", 1, 1);
