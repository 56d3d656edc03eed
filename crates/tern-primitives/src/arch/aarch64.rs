//! AArch64 AAPCS64 backend

use core::arch::naked_asm;

/// Callee-saved state of a suspended execution.
///
/// Field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Context {
    pub sp: usize,  // 0
    pub pc: usize,  // 8
    x: [usize; 10], // 16: x19..x28
    fp: usize,      // 96: x29
    lr: usize,      // 104: x30
    d: [u64; 8],    // 112: d8..d15
}

impl Context {
    pub(crate) const fn empty() -> Self {
        Self {
            sp: 0,
            pc: 0,
            x: [0; 10],
            fp: 0,
            lr: 0,
            d: [0; 8],
        }
    }

    /// A context that starts in [`task_start`], which calls `entry(arg)`.
    ///
    /// `sp` must be 16-byte aligned.
    pub(crate) fn fresh(sp: usize, entry: usize, arg: usize) -> Self {
        let mut ctx = Self::empty();
        ctx.sp = sp;
        ctx.pc = task_start as *const () as usize;
        ctx.x[0] = arg;
        ctx.x[1] = entry;
        ctx
    }
}

/// Save into `from` (x0), resume `to` (x1).
///
/// Returns when something switches back into `from`.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(from: *mut Context, to: *const Context) {
    naked_asm!(
        "stp x19, x20, [x0, #16]",
        "stp x21, x22, [x0, #32]",
        "stp x23, x24, [x0, #48]",
        "stp x25, x26, [x0, #64]",
        "stp x27, x28, [x0, #80]",
        "stp x29, x30, [x0, #96]",
        "stp d8, d9, [x0, #112]",
        "stp d10, d11, [x0, #128]",
        "stp d12, d13, [x0, #144]",
        "stp d14, d15, [x0, #160]",
        "mov x9, sp",
        "adr x10, 2f",
        "stp x9, x10, [x0]",
        "ldp x19, x20, [x1, #16]",
        "ldp x21, x22, [x1, #32]",
        "ldp x23, x24, [x1, #48]",
        "ldp x25, x26, [x1, #64]",
        "ldp x27, x28, [x1, #80]",
        "ldp x29, x30, [x1, #96]",
        "ldp d8, d9, [x1, #112]",
        "ldp d10, d11, [x1, #128]",
        "ldp d12, d13, [x1, #144]",
        "ldp d14, d15, [x1, #160]",
        "ldp x9, x10, [x1]",
        "mov sp, x9",
        "br x10",
        "2:",
        "ret",
    )
}

/// Entry trampoline for fresh contexts: `arg` in x19, `entry` in x20.
///
/// The entry never returns; falling out of it traps.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn task_start() -> ! {
    naked_asm!(
        "mov x0, x19",
        "blr x20",
        "brk #0x1",
    )
}

/// Call `f(arg)` with the stack pointer at `top`, recording the caller's
/// `sp` and resume `pc` in `save`.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn call_on_stack(
    arg: *mut u8,
    f: unsafe extern "C" fn(*mut u8),
    top: *mut u8,
    save: *mut Context,
) {
    naked_asm!(
        "stp x29, x30, [sp, #-16]!",
        "mov x29, sp",
        "mov x9, sp",
        "str x9, [x3]",
        "adr x9, 2f",
        "str x9, [x3, #8]",
        "mov sp, x2",
        "blr x1",
        "2:",
        "mov sp, x29",
        "ldp x29, x30, [sp], #16",
        "ret",
    )
}
