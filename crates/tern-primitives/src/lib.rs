//! Tern Unsafe Primitives - Consolidated Unsafe Code TCB
//!
//! This crate contains the unsafe code of the Tern runtime kernel,
//! consolidated into a single auditable location. `tern-core` forbids unsafe
//! code outright and `tern-runtime` only reaches raw memory through here
//! (plus the closure trampolines it hands to [`context::call_on_stack`]).
//!
//! # Design Principles
//!
//! 1. **Minimal unsafe surface**: Only truly necessary unsafe operations
//! 2. **Bounds-known memory**: Raw addresses travel as [`region::MemRegion`]
//!    with debug-checked offsets
//! 3. **Auditable**: Small, focused modules for review
//! 4. **Verified**: Loom models for every atomic protocol
//!
//! # Module Organization
//!
//! - `mem` - copy, zero, equality, NUL scan
//! - `region` - memory regions and guarded stack mappings
//! - `atomic` - pointer CAS and the publication barrier
//! - `context` - saved register state, context switch, run-on-stack
//! - `sync` - interior-mutable cell for single-owner saved state
//! - `loom_tests` - Concurrency models using loom (with `loom` feature)
//!
//! # Supported Targets
//!
//! Context switching is hand-written for the x86_64 and aarch64 unix ABIs.

#![no_std]

#[cfg(test)]
extern crate std;

#[cfg(not(all(unix, any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("tern-primitives supports x86_64 and aarch64 on unix targets");

mod arch;
pub mod atomic;
pub mod context;
pub mod mem;
pub mod region;
pub mod sync;

#[cfg(any(test, feature = "loom"))]
mod loom_tests;

// Re-export commonly used items
pub use atomic::{cas_pointer, load_published, publication_barrier};
pub use context::{Context, TaskEntry};
pub use region::{MemRegion, StackError, StackRegion};
pub use sync::ExclusiveCell;
