//! Host Abstraction Layer for Tern
//!
//! The runtime kernel owns no allocator, collector or output channel of its
//! own. Everything it needs from the outside world goes through [`Host`]:
//!
//! - Memory: [`Host::allocate`] (the collector's allocator)
//! - Collector hooks: [`Host::barrier_hook`], [`Host::bulk_barrier`] and the
//!   process-wide [`WriteBarrierState`] it owns
//! - Fatal reporting: [`Host::report_fatal`], which never returns
//!
//! # Implementations
//!
//! - **Embedders**: wrap their collector and allocator
//! - **Tests**: [`TestHost`] (feature `std`) records every call and turns
//!   fatal reports into panics

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

use core::ptr::NonNull;

use tern_core::{TypeDesc, WriteBarrierState};

#[cfg(any(test, feature = "std"))]
mod test_host;

#[cfg(any(test, feature = "std"))]
pub use test_host::{BarrierCall, TestHost};

/// Host services the runtime kernel calls out to.
///
/// Implementations must be callable from any worker thread, including while
/// that thread is running on a worker's system stack.
pub trait Host: Send + Sync + 'static {
    // === Memory ===

    /// Allocate `req.size` bytes from the managed heap.
    ///
    /// # Returns
    /// * `Ok(ptr)` - Memory aligned for `req.ty` (or 8 bytes without a type),
    ///   zeroed when `req.zero` is set
    /// * `Err(AllocError)` - Forwarded to the runtime's caller unchanged
    fn allocate(&self, req: &AllocRequest<'_>) -> Result<NonNull<u8>, AllocError>;

    // === Collector Hooks ===

    /// Called before a pointer store of `new` over `old` at address `slot`,
    /// while the write barrier is enabled.
    fn barrier_hook(&self, slot: usize, old: usize, new: usize);

    /// Called before a typed copy of `ty.size` bytes from `src` to `dst`,
    /// while the write barrier is enabled and `ty` contains pointers.
    ///
    /// The collector decomposes the copy into per-field barrier work itself.
    fn bulk_barrier(&self, _dst: usize, _src: usize, _ty: &TypeDesc) {
        // Default: no per-field work
    }

    /// The collector's write-barrier flags. Read-only for the runtime.
    fn write_barrier(&self) -> &WriteBarrierState;

    // === Diagnostics ===

    /// Report an unrecoverable runtime error and terminate.
    fn report_fatal(&self, message: &str) -> !;
}

/// One allocation request.
#[derive(Clone, Copy, Debug)]
pub struct AllocRequest<'a> {
    /// Bytes requested
    pub size: usize,
    /// Type of the object, if known; `None` means raw bytes without pointers
    pub ty: Option<&'a TypeDesc>,
    /// Whether the memory must be zeroed
    pub zero: bool,
}

impl<'a> AllocRequest<'a> {
    /// Untyped, zeroed bytes
    pub const fn bytes(size: usize) -> Self {
        Self {
            size,
            ty: None,
            zero: true,
        }
    }

    /// Zeroed memory for `size` bytes of type `ty`
    pub const fn typed(size: usize, ty: &'a TypeDesc) -> Self {
        Self {
            size,
            ty: Some(ty),
            zero: true,
        }
    }

    /// Alignment the returned pointer must satisfy.
    pub fn align(&self) -> usize {
        match self.ty {
            Some(ty) if ty.align > 0 => ty.align,
            _ => 8,
        }
    }
}

/// Allocation failures, forwarded verbatim to runtime callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The heap could not satisfy the request
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory { size: usize },
    /// `elem_size * count` does not fit in the address space
    #[error("allocation size overflow")]
    SizeOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::BYTE_TYPE;

    #[test]
    fn test_request_alignment() {
        static WIDE: TypeDesc = TypeDesc::scalar("wide", 32, 16);
        assert_eq!(AllocRequest::bytes(3).align(), 8);
        assert_eq!(AllocRequest::typed(32, &WIDE).align(), 16);
        assert_eq!(AllocRequest::typed(1, &BYTE_TYPE).align(), 1);
        assert!(AllocRequest::bytes(3).zero);
    }

    #[test]
    fn test_alloc_error_display() {
        let e = AllocError::OutOfMemory { size: 64 };
        assert_eq!(std::format!("{e}"), "out of memory allocating 64 bytes");
        assert_eq!(
            std::format!("{}", AllocError::SizeOverflow),
            "allocation size overflow"
        );
    }
}
