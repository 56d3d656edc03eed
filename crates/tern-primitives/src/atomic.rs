//! Pointer atomics and the publication barrier
//!
//! # Ordering Model
//!
//! Writers publish with [`publication_barrier`]: a store/store fence between
//! initializing an object and storing the pointer that makes it reachable.
//! The runtime design has no matching read fence; it relies on readers
//! following the freshly loaded pointer (a data dependency) to observe the
//! initialized bytes.
//!
//! **Portability risk:** dependent-load ordering holds on every target this
//! crate builds for (x86_64, aarch64), but Rust's memory model does not
//! express it. [`load_published`] is therefore the single deviation point:
//! every pointer-following read in the runtime goes through it, and it uses
//! an acquire load. On x86_64 that compiles to a plain load; on a target
//! without dependency ordering it is the acquire the design would need.

use core::sync::atomic::{fence, AtomicPtr, Ordering};

/// Compare-and-swap on a pointer slot.
///
/// Stores `new` and returns `true` iff the slot held `old`. Uses the
/// platform's native CAS with sequentially consistent ordering.
#[inline]
pub fn cas_pointer<T>(slot: &AtomicPtr<T>, old: *mut T, new: *mut T) -> bool {
    slot.compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Compare-and-swap on a raw pointer-sized location.
///
/// # Safety
///
/// - `slot` must be valid, aligned for `*mut T`, and live for the call
/// - Every concurrent access to `*slot` must be atomic
#[inline]
pub unsafe fn cas_raw_pointer<T>(slot: *mut *mut T, old: *mut T, new: *mut T) -> bool {
    // SAFETY: caller guarantees validity, alignment and atomic-only access
    let slot = unsafe { AtomicPtr::from_ptr(slot) };
    cas_pointer(slot, old, new)
}

/// Store/store barrier.
///
/// Every store issued before this call becomes visible to another worker
/// before any store issued after it, for a worker that observes the later
/// store by reading the published pointer.
#[inline]
pub fn publication_barrier() {
    fence(Ordering::Release);
}

/// Read a pointer that was published with [`publication_barrier`].
#[inline]
pub fn load_published<T>(slot: &AtomicPtr<T>) -> *mut T {
    slot.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use std::boxed::Box;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn test_cas_success_and_failure() {
        let mut a = 1u32;
        let mut b = 2u32;
        let pa: *mut u32 = &mut a;
        let pb: *mut u32 = &mut b;
        let slot = AtomicPtr::new(pa);

        assert!(!cas_pointer(&slot, pb, pb));
        assert_eq!(slot.load(Ordering::SeqCst), pa);

        assert!(cas_pointer(&slot, pa, pb));
        assert_eq!(slot.load(Ordering::SeqCst), pb);
    }

    #[test]
    fn test_cas_raw_pointer() {
        let mut x = 7u64;
        let px: *mut u64 = &mut x;
        let mut slot: *mut u64 = core::ptr::null_mut();
        unsafe {
            assert!(cas_raw_pointer(&mut slot, core::ptr::null_mut(), px));
            assert!(!cas_raw_pointer(&mut slot, core::ptr::null_mut(), px));
        }
        assert_eq!(slot, px);
    }

    #[test]
    fn test_cas_exactly_one_winner_across_threads() {
        for _ in 0..64 {
            let slot = Arc::new(AtomicPtr::<u8>::new(core::ptr::null_mut()));
            let winners = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (1..=4usize)
                .map(|i| {
                    let slot = Arc::clone(&slot);
                    let winners = Arc::clone(&winners);
                    thread::spawn(move || {
                        let mine = i as *mut u8;
                        if cas_pointer(&slot, core::ptr::null_mut(), mine) {
                            winners.fetch_add(1, Ordering::SeqCst);
                            Some(i)
                        } else {
                            None
                        }
                    })
                })
                .collect();

            let won: Vec<_> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();
            assert_eq!(won.len(), 1);
            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(slot.load(Ordering::SeqCst) as usize, won[0]);
        }
    }

    #[test]
    fn test_publish_then_follow() {
        let slot = Arc::new(AtomicPtr::<u64>::new(core::ptr::null_mut()));
        let reader_slot = Arc::clone(&slot);

        let reader = thread::spawn(move || loop {
            let p = load_published(&reader_slot);
            if !p.is_null() {
                // SAFETY: published after full initialization, never freed
                // before the writer joins
                return unsafe { *p };
            }
            thread::yield_now();
        });

        let obj = Box::into_raw(Box::new(0u64));
        unsafe { *obj = 0xDEAD_BEEF };
        publication_barrier();
        slot.store(obj, Ordering::Relaxed);

        assert_eq!(reader.join().unwrap(), 0xDEAD_BEEF);
        drop(unsafe { Box::from_raw(obj) });
    }
}
