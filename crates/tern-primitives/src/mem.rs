//! Raw memory primitives
//!
//! The barrier-free byte movers everything else is built on. None of these
//! consult the write barrier; typed, barrier-aware copies live in
//! `tern-runtime::wbarrier`.

use core::ptr;

/// Largest address range the heap can span.
#[cfg(target_pointer_width = "64")]
pub const MAX_MEM: usize = (1 << 39) - 1;

/// Largest address range the heap can span.
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_MEM: usize = u32::MAX as usize;

/// Backstop for NUL scans. A string this long means the pointer was bad.
pub const NUL_SCAN_LIMIT: usize = MAX_MEM / 2 - 1;

/// Copy `n` bytes from `src` to `dst`.
///
/// # Safety
///
/// - `src` must be readable and `dst` writable for `n` bytes
/// - The ranges must not overlap (checked in debug builds only)
#[inline]
pub unsafe fn copy(dst: *mut u8, src: *const u8, n: usize) {
    if n == 0 {
        return;
    }
    debug_assert!(
        (dst as usize).wrapping_add(n) <= src as usize
            || (src as usize).wrapping_add(n) <= dst as usize,
        "copy: overlapping ranges"
    );
    // SAFETY: caller guarantees validity and disjointness
    unsafe { ptr::copy_nonoverlapping(src, dst, n) }
}

/// Clear `n` bytes starting at `p`.
///
/// # Safety
///
/// `p` must be writable for `n` bytes.
#[inline]
pub unsafe fn zero(p: *mut u8, n: usize) {
    if n == 0 {
        return;
    }
    // SAFETY: caller guarantees `p..p+n` is writable
    unsafe { ptr::write_bytes(p, 0, n) }
}

/// Byte-wise equality of two `n`-byte ranges. Not constant time.
///
/// # Safety
///
/// Both pointers must be readable for `n` bytes.
#[inline]
pub unsafe fn equal(a: *const u8, b: *const u8, n: usize) -> bool {
    if n == 0 || a == b {
        return true;
    }
    // SAFETY: caller guarantees both ranges are readable
    unsafe { core::slice::from_raw_parts(a, n) == core::slice::from_raw_parts(b, n) }
}

/// Length of the NUL-terminated byte string at `s`; zero for null.
///
/// Stops at [`NUL_SCAN_LIMIT`] if no terminator is found before it; callers
/// treat a result equal to the limit as a corrupt pointer.
///
/// # Safety
///
/// `s` must be null or point to readable memory up to its terminator.
pub unsafe fn find_null(s: *const u8) -> usize {
    if s.is_null() {
        return 0;
    }
    let mut len = 0;
    // SAFETY: caller guarantees readability up to the terminator
    while len < NUL_SCAN_LIMIT && unsafe { *s.add(len) } != 0 {
        len += 1;
    }
    len
}

/// Safe copy between equal-length slices.
///
/// # Panics
///
/// Panics if the lengths differ.
pub fn copy_bytes(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "copy_bytes: length mismatch");
    // SAFETY: distinct borrows cannot overlap; lengths checked above
    unsafe { copy(dst.as_mut_ptr(), src.as_ptr(), src.len()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy() {
        let src = [1u8, 2, 3, 4, 5];
        let mut dst = [0u8; 5];
        unsafe { copy(dst.as_mut_ptr(), src.as_ptr(), 5) };
        assert_eq!(dst, src);
    }

    #[test]
    fn test_copy_zero_len_dangling() {
        let p = core::ptr::NonNull::<u8>::dangling().as_ptr();
        unsafe { copy(p, p, 0) };
    }

    #[test]
    fn test_zero() {
        let mut buf = [0xAAu8; 8];
        unsafe { zero(buf.as_mut_ptr().add(2), 4) };
        assert_eq!(buf, [0xAA, 0xAA, 0, 0, 0, 0, 0xAA, 0xAA]);
    }

    #[test]
    fn test_equal() {
        let a = *b"runtime";
        let b = *b"runtimE";
        unsafe {
            assert!(equal(a.as_ptr(), a.as_ptr(), 7));
            assert!(equal(a.as_ptr(), b.as_ptr(), 6));
            assert!(!equal(a.as_ptr(), b.as_ptr(), 7));
            assert!(equal(a.as_ptr(), b.as_ptr(), 0));
        }
    }

    #[test]
    fn test_find_null() {
        let s = b"hello\0world\0";
        unsafe {
            assert_eq!(find_null(s.as_ptr()), 5);
            assert_eq!(find_null(s.as_ptr().add(6)), 5);
            assert_eq!(find_null(s.as_ptr().add(5)), 0);
            assert_eq!(find_null(core::ptr::null()), 0);
        }
    }

    #[test]
    fn test_copy_bytes() {
        let mut dst = [0u8; 3];
        copy_bytes(&mut dst, b"abc");
        assert_eq!(&dst, b"abc");
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_copy_bytes_length_mismatch() {
        let mut dst = [0u8; 2];
        copy_bytes(&mut dst, b"abc");
    }
}
