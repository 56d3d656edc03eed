//! Write-barrier-aware pointer stores and typed copies
//!
//! While the collector has the write barrier enabled, every pointer write
//! the runtime performs is announced to it before the store happens. With
//! the barrier off these are plain stores.

use core::sync::atomic::{AtomicPtr, Ordering};

use tern_core::TypeDesc;
use tern_host::Host;
use tern_primitives::{atomic, mem};

/// Store `new` into `slot`, consulting the write barrier first.
pub fn store_pointer<T>(host: &dyn Host, slot: &AtomicPtr<T>, new: *mut T) {
    if host.write_barrier().enabled() {
        let old = atomic::load_published(slot);
        host.barrier_hook(slot_addr(slot), old as usize, new as usize);
    }
    slot.store(new, Ordering::Release);
}

/// Compare-and-swap a pointer slot, consulting the write barrier first.
///
/// The hook sees the slot's current value and the intended store, even if
/// the CAS then fails.
pub fn cas_pointer_wb<T>(host: &dyn Host, slot: &AtomicPtr<T>, old: *mut T, new: *mut T) -> bool {
    if host.write_barrier().enabled() {
        let current = atomic::load_published(slot);
        host.barrier_hook(slot_addr(slot), current as usize, new as usize);
    }
    atomic::cas_pointer(slot, old, new)
}

/// Copy one value of type `ty` from `src` to `dst`.
///
/// When the barrier is enabled and `ty` holds pointers, the collector's
/// bulk barrier runs over the destination before the bytes move.
///
/// # Safety
///
/// `src` must be readable and `dst` writable for `ty.size` bytes, and the
/// two must not overlap unless they are equal.
pub unsafe fn typed_copy(host: &dyn Host, ty: &TypeDesc, dst: *mut u8, src: *const u8) {
    if core::ptr::eq(dst, src) || ty.size == 0 {
        return;
    }
    if ty.has_pointers() && host.write_barrier().enabled() {
        host.bulk_barrier(dst as usize, src as usize, ty);
    }
    // SAFETY: caller guarantees both ranges
    unsafe { mem::copy(dst, src, ty.size) };
}

fn slot_addr<T>(slot: &AtomicPtr<T>) -> usize {
    slot as *const AtomicPtr<T> as usize
}
