//! Memory regions
//!
//! Raw pointer arithmetic is expressed as offsets into a region whose base
//! and length are known. Offsets are bounds-checked in debug builds and
//! unchecked in release builds.
//!
//! # Safety Invariants
//!
//! 1. A [`StackRegion`] owns its mapping for its whole lifetime
//! 2. [`StackRegion::top`] is aligned to `STACK_ALIGN`
//! 3. Nothing else unmaps or reuses a stack region's memory
//! 4. The page below every stack is mapped `PROT_NONE`, so running off the
//!    end of a stack faults instead of writing into its neighbours

use core::fmt;
use core::ptr::{self, NonNull};

use tern_core::{round, PAGE_SIZE, STACK_ALIGN};

/// Upper bound on a single stack region.
pub const MAX_STACK_SIZE: usize = 1 << 30;

/// Borrowed view of `len` bytes starting at `base`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRegion {
    base: NonNull<u8>,
    len: usize,
}

impl MemRegion {
    /// Describe an existing range.
    ///
    /// # Safety
    ///
    /// `base..base+len` must stay valid for as long as the region is used.
    pub const unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// First byte
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.base.as_ptr() as usize + self.len
    }

    /// Whether `addr` lies within the region or at its end.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base.as_ptr() as usize && addr <= self.end()
    }

    /// Pointer `offset` bytes into the region.
    ///
    /// `offset == len` is allowed (one-past-the-end).
    #[inline]
    pub fn add(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(
            offset <= self.len,
            "region offset {offset} out of bounds ({})",
            self.len
        );
        // SAFETY: offset is within the region (checked in debug builds);
        // base is non-null and the region does not wrap the address space
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }
}

/// Stack allocation errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackError {
    /// Zero-sized stack requested
    ZeroSize,
    /// Requested size exceeds [`MAX_STACK_SIZE`]
    TooLarge(usize),
    /// The kernel refused the mapping
    OutOfMemory(usize),
    /// The guard page could not be protected
    GuardPage(usize),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::ZeroSize => write!(f, "zero-sized stack"),
            StackError::TooLarge(n) => write!(f, "stack of {n} bytes exceeds the maximum"),
            StackError::OutOfMemory(n) => write!(f, "out of memory mapping a {n}-byte stack"),
            StackError::GuardPage(n) => {
                write!(f, "cannot protect the guard page of a {n}-byte stack")
            }
        }
    }
}

impl core::error::Error for StackError {}

/// The kernel's page size, never below [`PAGE_SIZE`].
pub fn os_page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(n).map_or(PAGE_SIZE, |n| n.max(PAGE_SIZE))
}

/// An owned, page-aligned stack with an inaccessible guard page below it.
pub struct StackRegion {
    region: MemRegion,
    /// The whole mapping, guard page included
    mapping: NonNull<u8>,
    mapping_len: usize,
}

impl StackRegion {
    /// Map a stack of at least `size` bytes (rounded up to a page).
    pub fn new(size: usize) -> Result<Self, StackError> {
        if size == 0 {
            return Err(StackError::ZeroSize);
        }
        if size > MAX_STACK_SIZE {
            return Err(StackError::TooLarge(size));
        }
        let page = os_page_size();
        let size = round(size, page);
        let mapping_len = size + page;

        // SAFETY: anonymous private mapping, no existing memory involved
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(StackError::OutOfMemory(size));
        }
        // SAFETY: the first page belongs to the mapping just created
        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } != 0 {
            // SAFETY: unmapping what we mapped above
            unsafe { libc::munmap(base, mapping_len) };
            return Err(StackError::GuardPage(size));
        }

        let mapping = NonNull::new(base.cast::<u8>()).ok_or(StackError::OutOfMemory(size))?;
        // SAFETY: `page` is inside the mapping
        let usable = unsafe { NonNull::new_unchecked(mapping.as_ptr().add(page)) };
        Ok(Self {
            // SAFETY: mapped read-write, owned until drop
            region: unsafe { MemRegion::from_raw_parts(usable, size) },
            mapping,
            mapping_len,
        })
    }

    /// Highest usable address, aligned for a context switch.
    pub fn top(&self) -> *mut u8 {
        let end = self.region.add(self.region.len()).as_ptr() as usize;
        let aligned = tern_core::align::round_down(end, STACK_ALIGN);
        self.region.add(aligned - self.region.base().as_ptr() as usize).as_ptr()
    }

    /// The usable region, guard page excluded
    pub fn region(&self) -> MemRegion {
        self.region
    }

    /// Usable size in bytes
    pub fn size(&self) -> usize {
        self.region.len()
    }

    /// Whether `addr` is on this stack
    pub fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    /// First byte of the guard page. Any access to it faults.
    pub fn guard(&self) -> *mut u8 {
        self.mapping.as_ptr()
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        // SAFETY: mapped in `new` with exactly this length
        unsafe { libc::munmap(self.mapping.as_ptr().cast(), self.mapping_len) };
    }
}

impl fmt::Debug for StackRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackRegion")
            .field("base", &self.region.base())
            .field("size", &self.region.len())
            .finish()
    }
}

// SAFETY: StackRegion owns its memory exclusively. The bytes are only touched
// by whichever thread is currently executing on the stack, and the runtime
// guarantees one executor per stack at a time.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

// ============================================================================
// Kani Proofs
// ============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Every in-bounds offset yields an address the region contains.
    #[kani::proof]
    fn add_in_bounds_is_contained() {
        let base: usize = kani::any();
        let len: usize = kani::any();
        let offset: usize = kani::any();
        kani::assume(base != 0);
        kani::assume(base.checked_add(len).is_some());
        kani::assume(offset <= len);

        let r = unsafe {
            MemRegion::from_raw_parts(NonNull::new_unchecked(base as *mut u8), len)
        };
        assert!(r.contains(base + offset));
        assert_eq!(r.end(), base + len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_rounded_to_page() {
        let page = os_page_size();
        let stack = StackRegion::new(5000).unwrap();
        assert_eq!(stack.size(), round(5000, page));
        assert_eq!(stack.region().base().as_ptr() as usize % page, 0);
        assert_eq!(stack.guard() as usize + page, stack.region().base().as_ptr() as usize);
    }

    #[test]
    fn test_stack_is_writable_to_the_bottom() {
        let stack = StackRegion::new(PAGE_SIZE).unwrap();
        let base = stack.region().base().as_ptr();
        unsafe {
            ptr::write_volatile(base, 0xAB);
            ptr::write_volatile(stack.top().sub(1), 0xCD);
            assert_eq!(ptr::read_volatile(base), 0xAB);
        }
    }

    /// Touching the guard page kills the process with a memory fault. The
    /// write happens in a forked child so the test harness survives.
    #[test]
    fn test_overflow_into_guard_page_faults() {
        let stack = StackRegion::new(PAGE_SIZE).unwrap();
        let guard = stack.guard();

        // SAFETY: the child only performs the faulting store and `_exit`
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            unsafe {
                ptr::write_volatile(guard.add(PAGE_SIZE - 1), 1);
                libc::_exit(0);
            }
        }

        let mut status = 0;
        let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(waited, pid);
        assert!(libc::WIFSIGNALED(status), "guard page write did not fault");
        let sig = libc::WTERMSIG(status);
        assert!(sig == libc::SIGSEGV || sig == libc::SIGBUS, "unexpected signal {sig}");
    }

    #[test]
    fn test_stack_top_aligned_and_contained() {
        let stack = StackRegion::new(PAGE_SIZE).unwrap();
        let top = stack.top() as usize;
        assert_eq!(top % STACK_ALIGN, 0);
        assert!(stack.contains(top));
        assert!(stack.contains(top - 8));
        assert!(!stack.contains(top + 1));
    }

    #[test]
    fn test_stack_errors() {
        assert_eq!(StackRegion::new(0).unwrap_err(), StackError::ZeroSize);
        assert_eq!(
            StackRegion::new(MAX_STACK_SIZE + 1).unwrap_err(),
            StackError::TooLarge(MAX_STACK_SIZE + 1)
        );
    }

    #[test]
    fn test_region_add_and_contains() {
        let mut buf = [0u8; 32];
        let base = NonNull::new(buf.as_mut_ptr()).unwrap();
        let r = unsafe { MemRegion::from_raw_parts(base, buf.len()) };
        assert_eq!(r.add(0), base);
        assert_eq!(r.add(32).as_ptr() as usize, r.end());
        assert!(r.contains(base.as_ptr() as usize + 10));
        assert!(!r.contains(base.as_ptr() as usize + 33));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of bounds")]
    fn test_region_add_out_of_bounds_debug() {
        let mut buf = [0u8; 4];
        let base = NonNull::new(buf.as_mut_ptr()).unwrap();
        let r = unsafe { MemRegion::from_raw_parts(base, buf.len()) };
        let _ = r.add(5);
    }
}
