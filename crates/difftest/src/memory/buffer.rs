//! Host buffer backing guest memory.
//!
//! On Unix the buffer is an anonymous private `mmap`, so a 128 MiB guest only costs host
//! memory for the pages it actually touches. Other platforms fall back to a zeroed `Vec`.
//! Access is through ordinary slices; bounds are the caller's responsibility and are
//! enforced by [`GuestMemory`](super::GuestMemory) before any slice is taken.

use std::fmt;

use crate::common::{DifftestError, Result};

/// Zero-initialized host memory of a fixed size.
pub struct HostBuffer {
    #[cfg(unix)]
    ptr: *mut u8,
    #[cfg(not(unix))]
    data: Vec<u8>,
    size: usize,
}

// SAFETY: the buffer exclusively owns its mapping; shared access only hands out `&[u8]`
// and mutation requires `&mut self`.
unsafe impl Send for HostBuffer {}
// SAFETY: see above.
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    /// Allocates `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::HostMemory`] if the mapping cannot be created.
    #[cfg(unix)]
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Ok(Self {
                ptr: std::ptr::NonNull::dangling().as_ptr(),
                size,
            });
        }
        // SAFETY: anonymous private mapping with no address hint; the result is checked
        // against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DifftestError::HostMemory { size });
        }
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            size,
        })
    }

    /// Allocates `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Never fails on this platform; the signature matches the Unix variant.
    #[cfg(not(unix))]
    pub fn new(size: usize) -> Result<Self> {
        Ok(Self {
            data: vec![0u8; size],
            size,
        })
    }

    /// Returns the size of the buffer in bytes.
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` for a zero-sized buffer.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Borrows the whole buffer.
    #[cfg(unix)]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `size` bytes (or dangling with size 0) for the
        // lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    /// Mutably borrows the whole buffer.
    #[cfg(unix)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as for `as_slice`; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    /// Borrows the whole buffer.
    #[cfg(not(unix))]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutably borrows the whole buffer.
    #[cfg(not(unix))]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if self.size != 0 {
            // SAFETY: `ptr`/`size` describe the mapping created in `new`, unmapped once.
            let _ = unsafe { libc::munmap(self.ptr.cast(), self.size) };
        }
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer").field("size", &self.size).finish()
    }
}
