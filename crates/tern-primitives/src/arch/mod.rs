//! Per-architecture register save areas and switch routines
//!
//! Each backend provides the same four items:
//!
//! - `Context`: `repr(C)` save area whose first two words are `sp` and `pc`
//! - `switch`: save callee-saved state into one context, resume another
//! - `task_start`: first code a fresh task runs; calls its entry with its arg
//! - `call_on_stack`: run a function on another stack and come back

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub(crate) use self::x86_64::{call_on_stack, switch, task_start, Context};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub(crate) use self::aarch64::{call_on_stack, switch, task_start, Context};
