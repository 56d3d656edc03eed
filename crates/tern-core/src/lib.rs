//! Tern Core - Pure Runtime State
//!
//! This crate holds the **pure, platform-free** part of the Tern runtime
//! kernel: identifiers, the task status machine, the process-wide
//! write-barrier flags, and the small arithmetic/string helpers the runtime
//! needs before any higher-level facility exists.
//!
//! Nothing here switches stacks or touches raw memory. That lives in
//! `tern-primitives` (unsafe) and `tern-runtime` (the engine that drives it).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       tern-core                             │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │  TaskStatus   │    │ WriteBarrier  │                   │
//! │   │  transitions  │    │    State      │                   │
//! │   └───────────────┘    └───────────────┘                   │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │  round/align  │    │  Invariants   │                   │
//! │   │  strings      │    │  Assertions   │                   │
//! │   └───────────────┘    └───────────────┘                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ used by
//!                              ▼
//!        tern-primitives (unsafe TCB)  ·  tern-runtime (engine)
//! ```
//!
//! # Module Organization
//!
//! - `types` - TaskId, WorkerId, TaskStatus, StackContext, TypeDesc
//! - `align` - `round` and stack/page alignment constants
//! - `barrier` - WriteBarrierState owned by the collector
//! - `strings` - `index`, `has_prefix`, `parse_leading_int`
//! - `invariants` - checks over runtime snapshots

#![no_std]
#![forbid(unsafe_code)]
extern crate alloc;

pub mod align;
pub mod barrier;
pub mod invariants;
pub mod strings;
pub mod types;

pub use align::{round, PAGE_SIZE, STACK_ALIGN};
pub use barrier::{BarrierFlags, GcPhase, WriteBarrierState};
pub use invariants::{
    assert_invariants, check_all_invariants, InvariantViolation, RuntimeSnapshot, TaskView,
    WorkerView,
};
pub use strings::{has_prefix, index, parse_leading_int};
pub use types::{
    StackContext, SyscallHint, SyscallMark, TaskId, TaskStatus, TransitionError, TypeDesc,
    WorkerId, BYTE_TYPE,
};
