//! Allocation trampoline
//!
//! The runtime never manages heap memory itself. Every allocation is
//! forwarded to [`Host::allocate`] and failures come back to the caller
//! unchanged.

use core::ptr::NonNull;

use tern_core::TypeDesc;
use tern_host::{AllocError, AllocRequest, Host};
use tern_primitives::mem::MAX_MEM;
use tracing::trace;

/// Shared base address for all zero-byte allocations. Never written.
static ZERO_BASE: u64 = 0;

/// The address every zero-size request returns.
pub fn zero_base() -> NonNull<u8> {
    NonNull::from(&ZERO_BASE).cast()
}

/// Allocate `size` bytes, typed or untyped, optionally zeroed.
///
/// Zero-byte requests return [`zero_base`] without calling the host.
pub fn allocate(
    host: &dyn Host,
    size: usize,
    ty: Option<&TypeDesc>,
    zero: bool,
) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
        return Ok(zero_base());
    }
    if size > MAX_MEM {
        return Err(AllocError::SizeOverflow);
    }
    let req = AllocRequest { size, ty, zero };
    let ptr = host.allocate(&req)?;
    trace!(size, ty = ty.map(|t| t.name), "allocated");
    Ok(ptr)
}

/// Allocate one zeroed object of type `ty`.
pub fn new_object(host: &dyn Host, ty: &TypeDesc) -> Result<NonNull<u8>, AllocError> {
    allocate(host, ty.size, Some(ty), true)
}

/// Allocate a zeroed array of `n` elements of type `ty`.
pub fn new_array(host: &dyn Host, ty: &TypeDesc, n: usize) -> Result<NonNull<u8>, AllocError> {
    let size = array_size(ty, n)?;
    allocate(host, size, Some(ty), true)
}

/// Byte size of `n` elements of `ty`, bounded by the heap's address range.
pub(crate) fn array_size(ty: &TypeDesc, n: usize) -> Result<usize, AllocError> {
    ty.size
        .checked_mul(n)
        .filter(|&size| size <= MAX_MEM)
        .ok_or(AllocError::SizeOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::BYTE_TYPE;
    use tern_host::TestHost;

    static PAIR: TypeDesc = TypeDesc::with_pointers("pair", 16, 8, 16);

    #[test]
    fn test_zero_size_skips_host() {
        let host = TestHost::new();
        let a = allocate(&host, 0, None, true).unwrap();
        let b = new_array(&host, &PAIR, 0).unwrap();
        assert_eq!(a, zero_base());
        assert_eq!(b, zero_base());
        assert_eq!(host.allocation_count(), 0);
    }

    #[test]
    fn test_new_object_zeroed() {
        let host = TestHost::new();
        let p = new_object(&host, &PAIR).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(host.allocation_count(), 1);
    }

    #[test]
    fn test_new_array_overflow() {
        let host = TestHost::new();
        assert_eq!(
            new_array(&host, &PAIR, usize::MAX / 8),
            Err(AllocError::SizeOverflow)
        );
        assert_eq!(
            new_array(&host, &BYTE_TYPE, MAX_MEM + 1),
            Err(AllocError::SizeOverflow)
        );
        assert_eq!(host.allocation_count(), 0);
    }

    #[test]
    fn test_failure_forwarded() {
        let host = TestHost::new();
        host.fail_allocations(true);
        assert_eq!(
            new_object(&host, &PAIR),
            Err(AllocError::OutOfMemory { size: 16 })
        );
    }
}
