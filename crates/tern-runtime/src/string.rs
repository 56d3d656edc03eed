//! Runtime strings and slices
//!
//! Strings are immutable byte sequences in collector-managed memory. A new
//! string is built in two steps: [`raw_string`] hands out a zeroed, writable
//! buffer, and [`RawString::finish`] issues the publication barrier and
//! turns it into an immutable [`RtStr`] aliasing the same bytes.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

use tern_core::{TypeDesc, BYTE_TYPE};
use tern_host::{AllocError, Host};
use tern_primitives::mem::{self, NUL_SCAN_LIMIT};
use tern_primitives::publication_barrier;

use crate::fatal::{self, FatalError};
use crate::malloc;

/// Writable string under construction.
pub struct RawString<'h> {
    ptr: NonNull<u8>,
    len: usize,
    _heap: PhantomData<&'h mut [u8]>,
}

impl<'h> RawString<'h> {
    /// The string's bytes, zeroed until written
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: `len` bytes allocated for this builder alone (or the
        // shared zero base when `len` is zero)
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publish the string. Writes made through the builder are ordered
    /// before any store of the returned handle.
    pub fn finish(self) -> RtStr<'h> {
        publication_barrier();
        RtStr {
            ptr: self.ptr,
            len: self.len,
            _heap: PhantomData,
        }
    }
}

/// An immutable runtime string. Copying the handle does not copy the bytes.
#[derive(Clone, Copy)]
pub struct RtStr<'h> {
    ptr: NonNull<u8>,
    len: usize,
    _heap: PhantomData<&'h [u8]>,
}

impl<'h> RtStr<'h> {
    /// The empty string
    pub fn empty() -> Self {
        Self {
            ptr: malloc::zero_base(),
            len: 0,
            _heap: PhantomData,
        }
    }

    pub fn as_bytes(&self) -> &'h [u8] {
        // SAFETY: immutable since `finish`; lives as long as the heap 'h
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Address of the first byte
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for RtStr<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for RtStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&String::from_utf8_lossy(self.as_bytes()), f)
    }
}

impl PartialEq for RtStr<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for RtStr<'_> {}

/// Allocate a zeroed, writable string of `n` bytes.
pub fn raw_string(host: &dyn Host, n: usize) -> Result<RawString<'_>, AllocError> {
    let ptr = malloc::allocate(host, n, None, true)?;
    Ok(RawString {
        ptr,
        len: n,
        _heap: PhantomData,
    })
}

/// Copy `bytes` into a new runtime string.
pub fn string_from_bytes<'h>(host: &'h dyn Host, bytes: &[u8]) -> Result<RtStr<'h>, AllocError> {
    let mut raw = raw_string(host, bytes.len())?;
    mem::copy_bytes(raw.as_mut_bytes(), bytes);
    Ok(raw.finish())
}

/// Copy the NUL-terminated string at `p` into a new runtime string.
///
/// Null gives the empty string. A scan that reaches the address-space
/// backstop without a terminator is fatal.
///
/// # Safety
///
/// `p` must be null or point to readable memory up to its terminator.
pub unsafe fn string_from_nul<'h>(host: &'h dyn Host, p: *const u8) -> Result<RtStr<'h>, AllocError> {
    // SAFETY: forwarded from the caller
    let n = unsafe { mem::find_null(p) };
    if n >= NUL_SCAN_LIMIT {
        fatal::throw(FatalError::Unterminated(n));
    }
    let mut raw = raw_string(host, n)?;
    // SAFETY: `p..p+n` is readable; the fresh buffer is disjoint from it
    unsafe { mem::copy(raw.as_mut_bytes().as_mut_ptr(), p, n) };
    Ok(raw.finish())
}

/// View the NUL-terminated string at `p` without copying it.
///
/// # Safety
///
/// `p` must be null or point to memory that stays readable and unchanged,
/// up to its terminator, for `'a`.
pub unsafe fn string_no_copy<'a>(p: *const u8) -> &'a [u8] {
    if p.is_null() {
        return &[];
    }
    // SAFETY: forwarded from the caller
    unsafe {
        let n = mem::find_null(p);
        core::slice::from_raw_parts(p, n)
    }
}

/// Errors from [`make_slice`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MakeSliceError {
    #[error("makeslice: len out of range")]
    LenOutOfRange,
    #[error("makeslice: cap out of range")]
    CapOutOfRange,
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// Raw slice header: backing array, length, capacity (in elements).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSlice {
    pub ptr: NonNull<u8>,
    pub len: usize,
    pub cap: usize,
}

/// Allocate a zeroed backing array for `cap` elements of `ty`.
pub fn make_slice(
    host: &dyn Host,
    ty: &TypeDesc,
    len: usize,
    cap: usize,
) -> Result<RawSlice, MakeSliceError> {
    if len > cap {
        return Err(MakeSliceError::LenOutOfRange);
    }
    let size = malloc::array_size(ty, cap).map_err(|_| {
        // Report the length when even it does not fit
        if malloc::array_size(ty, len).is_err() {
            MakeSliceError::LenOutOfRange
        } else {
            MakeSliceError::CapOutOfRange
        }
    })?;
    let ptr = malloc::allocate(host, size, Some(ty), true)?;
    Ok(RawSlice { ptr, len, cap })
}

/// A zeroed byte slice of `n` bytes.
pub fn make_bytes(host: &dyn Host, n: usize) -> Result<RawSlice, MakeSliceError> {
    make_slice(host, &BYTE_TYPE, n, n)
}
