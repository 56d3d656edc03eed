//! x86_64 System V backend

use core::arch::naked_asm;

/// Callee-saved state of a suspended execution.
///
/// Field offsets are hard-coded in the assembly below.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Context {
    pub sp: usize, // 0x00
    pub pc: usize, // 0x08
    rbx: usize,    // 0x10
    rbp: usize,    // 0x18
    r12: usize,    // 0x20
    r13: usize,    // 0x28
    r14: usize,    // 0x30
    r15: usize,    // 0x38
    mxcsr: u32,    // 0x40
    fpucw: u32,    // 0x44
}

/// Default MXCSR: all exceptions masked, round to nearest.
const MXCSR_DEFAULT: u32 = 0x1F80;
/// Default x87 control word: all exceptions masked, 64-bit precision.
const FPUCW_DEFAULT: u32 = 0x037F;

impl Context {
    pub(crate) const fn empty() -> Self {
        Self {
            sp: 0,
            pc: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: 0,
            fpucw: 0,
        }
    }

    /// A context that starts in [`task_start`], which calls `entry(arg)`.
    ///
    /// `sp` must be 16-byte aligned.
    pub(crate) fn fresh(sp: usize, entry: usize, arg: usize) -> Self {
        Self {
            sp,
            pc: task_start as *const () as usize,
            rbx: arg,
            r12: entry,
            mxcsr: MXCSR_DEFAULT,
            fpucw: FPUCW_DEFAULT,
            ..Self::empty()
        }
    }
}

/// Save into `from` (rdi), resume `to` (rsi).
///
/// Returns when something switches back into `from`.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(from: *mut Context, to: *const Context) {
    naked_asm!(
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr dword ptr [rdi + 0x40]",
        "fnstcw word ptr [rdi + 0x44]",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi], rsp",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr dword ptr [rsi + 0x40]",
        "fldcw word ptr [rsi + 0x44]",
        "mov rsp, [rsi]",
        "jmp qword ptr [rsi + 0x08]",
        "2:",
        "ret",
    )
}

/// Entry trampoline for fresh contexts: `entry` in r12, `arg` in rbx.
///
/// The entry never returns; falling out of it traps.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn task_start() -> ! {
    naked_asm!(
        "mov rdi, rbx",
        "call r12",
        "ud2",
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
        "push rbp",
        "mov rbp, rsp",
        "mov [rcx], rsp",
        "lea rax, [rip + 2f]",
        "mov [rcx + 0x08], rax",
        "mov rsp, rdx",
        "call rsi",
        "2:",
        "mov rsp, rbp",
        "pop rbp",
        "ret",
    )
}
