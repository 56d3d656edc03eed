//! Size rounding helpers used for stack and allocation sizing.

/// Alignment of every stack top handed to a context switch.
pub const STACK_ALIGN: usize = 16;

/// Granularity of stack region sizes.
pub const PAGE_SIZE: usize = 4096;

/// Round `n` up to a multiple of `a`. `a` must be a power of two.
///
/// Wraps on overflow like the raw arithmetic it mirrors; callers that size
/// allocations validate `n` first.
#[inline]
pub const fn round(n: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    n.wrapping_add(a - 1) & !(a - 1)
}

/// Round `n` down to a multiple of `a`. `a` must be a power of two.
#[inline]
pub const fn round_down(n: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    n & !(a - 1)
}

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: round yields the smallest multiple of `a` not below `n`
    #[kani::proof]
    fn round_is_next_multiple() {
        let n: usize = kani::any();
        let shift: u32 = kani::any();
        kani::assume(shift < 16);
        let a = 1usize << shift;
        kani::assume(n <= usize::MAX - a);

        let r = round(n, a);
        kani::assert(r % a == 0, "result must be a multiple of a");
        kani::assert(r >= n, "result must not be below n");
        kani::assert(r < n + a, "result must be the next multiple");
    }
}
