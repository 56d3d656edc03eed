//! Recording host for tests

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use std::string::{String, ToString};
use std::vec::Vec;

use tern_core::{TypeDesc, WriteBarrierState};

use crate::{AllocError, AllocRequest, Host};

/// One recorded call into a collector hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BarrierCall {
    /// `barrier_hook(slot, old, new)`
    Pointer { slot: usize, old: usize, new: usize },
    /// `bulk_barrier(dst, src, ty)`
    Bulk {
        dst: usize,
        src: usize,
        ty: &'static str,
    },
}

/// In-memory [`Host`] that records every interaction.
///
/// - Allocations come from the global allocator and are freed when the host
///   is dropped
/// - Barrier hook invocations are appended to a log
/// - `report_fatal` records the message and panics with
///   `"fatal error: {message}"`, so tests can intercept fatal paths with
///   `#[should_panic]` or `catch_unwind`
#[derive(Default)]
pub struct TestHost {
    barrier: WriteBarrierState,
    arena: Mutex<Vec<(usize, Layout)>>,
    allocations: AtomicUsize,
    fail_allocations: AtomicBool,
    barrier_calls: Mutex<Vec<BarrierCall>>,
    fatals: Mutex<Vec<String>>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// The barrier state, for tests that play the collector.
    pub fn barrier(&self) -> &WriteBarrierState {
        &self.barrier
    }

    /// Make every following allocation fail with `OutOfMemory`.
    pub fn fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `allocate` calls so far
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Snapshot of the barrier call log
    pub fn barrier_calls(&self) -> Vec<BarrierCall> {
        self.barrier_calls.lock().clone()
    }

    /// Messages passed to `report_fatal`
    pub fn fatal_messages(&self) -> Vec<String> {
        self.fatals.lock().clone()
    }
}

impl Host for TestHost {
    fn allocate(&self, req: &AllocRequest<'_>) -> Result<NonNull<u8>, AllocError> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(AllocError::OutOfMemory { size: req.size });
        }
        let layout = Layout::from_size_align(req.size.max(1), req.align())
            .map_err(|_| AllocError::SizeOverflow)?;

        // SAFETY: layout has non-zero size
        let ptr = unsafe {
            if req.zero {
                std::alloc::alloc_zeroed(layout)
            } else {
                std::alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory { size: req.size })?;

        self.arena.lock().push((ptr.as_ptr() as usize, layout));
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    fn barrier_hook(&self, slot: usize, old: usize, new: usize) {
        self.barrier_calls
            .lock()
            .push(BarrierCall::Pointer { slot, old, new });
    }

    fn bulk_barrier(&self, dst: usize, src: usize, ty: &TypeDesc) {
        self.barrier_calls.lock().push(BarrierCall::Bulk {
            dst,
            src,
            ty: ty.name,
        });
    }

    fn write_barrier(&self) -> &WriteBarrierState {
        &self.barrier
    }

    fn report_fatal(&self, message: &str) -> ! {
        self.fatals.lock().push(message.to_string());
        panic!("fatal error: {message}");
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        for (addr, layout) in self.arena.get_mut().drain(..) {
            // SAFETY: allocated in `allocate` with exactly this layout
            unsafe { std::alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zeroed_and_aligned() {
        static PAIR: TypeDesc = TypeDesc::with_pointers("pair", 16, 16, 8);
        let host = TestHost::new();
        let p = host.allocate(&AllocRequest::typed(16, &PAIR)).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(host.allocation_count(), 1);
    }

    #[test]
    fn test_allocation_failure() {
        let host = TestHost::new();
        host.fail_allocations(true);
        assert_eq!(
            host.allocate(&AllocRequest::bytes(10)),
            Err(AllocError::OutOfMemory { size: 10 })
        );
        assert_eq!(host.allocation_count(), 0);
    }

    #[test]
    fn test_records_barrier_calls() {
        let host = TestHost::new();
        host.barrier_hook(0x10, 1, 2);
        host.bulk_barrier(0x20, 0x30, &tern_core::BYTE_TYPE);
        assert_eq!(
            host.barrier_calls(),
            [
                BarrierCall::Pointer {
                    slot: 0x10,
                    old: 1,
                    new: 2
                },
                BarrierCall::Bulk {
                    dst: 0x20,
                    src: 0x30,
                    ty: "uint8"
                },
            ]
        );
    }

    #[test]
    fn test_barrier_state_is_shared() {
        let host = TestHost::new();
        assert!(!host.write_barrier().enabled());
        host.barrier().set_needed(true);
        assert!(host.write_barrier().enabled());
    }

    #[test]
    #[should_panic(expected = "fatal error: boom")]
    fn test_report_fatal_panics() {
        let host = TestHost::new();
        host.report_fatal("boom");
    }
}
