//! Guest memory.
//!
//! [`GuestMemory`] maps a contiguous window of guest physical addresses onto a host
//! buffer by subtracting the window base. It provides:
//! 1. **Translation:** Guest address and length to host byte range, with out-of-range
//!    requests reported as contract violations.
//! 2. **Access:** Copy-in and copy-out helpers plus borrowed host slices.
//! 3. **Dirty Tracking:** Page-granular record of writes since the last synchronization,
//!    returned as coalesced ranges for pushing to the reference.

/// Host buffer allocation.
pub mod buffer;

use std::ops::Range;

use serde::Serialize;

use crate::common::constants::{PAGE_SHIFT, PAGE_SIZE};
use crate::common::{DifftestError, GuestAddr, Result};

pub use buffer::HostBuffer;

/// A contiguous range of guest memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemRange {
    /// First guest address of the range.
    pub start: GuestAddr,
    /// Length in bytes.
    pub len: usize,
}

impl MemRange {
    /// Creates a range.
    pub const fn new(start: GuestAddr, len: usize) -> Self {
        Self { start, len }
    }

    /// Returns `true` if `[addr, addr + len)` lies inside this range.
    pub fn contains(&self, addr: GuestAddr, len: usize) -> bool {
        addr.offset_from(self.start)
            .and_then(|off| off.checked_add(len as u64))
            .is_some_and(|end| end <= self.len as u64)
    }
}

/// Guest physical memory window backed by a host buffer.
#[derive(Debug)]
pub struct GuestMemory {
    base: GuestAddr,
    buf: HostBuffer,
    dirty: Vec<bool>,
}

impl GuestMemory {
    /// Allocates `size` bytes of zeroed guest memory starting at `base`.
    ///
    /// # Errors
    ///
    /// Fails if the window wraps the 64-bit address space or the host buffer cannot be
    /// allocated.
    pub fn new(base: GuestAddr, size: usize) -> Result<Self> {
        if base.checked_add(size as u64).is_none() {
            return Err(DifftestError::Config(format!(
                "guest memory {base}+{size:#x} wraps the address space"
            )));
        }
        let pages = size.div_ceil(PAGE_SIZE);
        Ok(Self {
            base,
            buf: HostBuffer::new(size)?,
            dirty: vec![false; pages],
        })
    }

    /// Returns the first guest address of the window.
    pub const fn base(&self) -> GuestAddr {
        self.base
    }

    /// Returns the window size in bytes.
    pub const fn size(&self) -> usize {
        self.buf.len()
    }

    /// Returns the whole window as a range.
    pub const fn window(&self) -> MemRange {
        MemRange::new(self.base, self.buf.len())
    }

    /// Returns `true` if `[addr, addr + len)` lies inside the window.
    pub fn contains(&self, addr: GuestAddr, len: usize) -> bool {
        self.host_range(addr, len).is_some()
    }

    /// Translates a guest range to the host byte range backing it.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::OutOfRange`] if any byte falls outside the window.
    pub fn translate(&self, addr: GuestAddr, len: usize) -> Result<Range<usize>> {
        self.checked_range("translate", addr, len)
    }

    /// Borrows the host bytes behind a guest range.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::OutOfRange`] if any byte falls outside the window.
    pub fn guest_to_host(&self, addr: GuestAddr, len: usize) -> Result<&[u8]> {
        let range = self.checked_range("guest_to_host", addr, len)?;
        Ok(&self.buf.as_slice()[range])
    }

    /// Mutably borrows the host bytes behind a guest range and marks them dirty.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::OutOfRange`] if any byte falls outside the window.
    pub fn guest_to_host_mut(&mut self, addr: GuestAddr, len: usize) -> Result<&mut [u8]> {
        let range = self.checked_range("guest_to_host_mut", addr, len)?;
        self.mark_pages(&range);
        Ok(&mut self.buf.as_mut_slice()[range])
    }

    /// Copies guest bytes at `addr` into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::OutOfRange`] if any byte falls outside the window.
    pub fn read(&self, addr: GuestAddr, out: &mut [u8]) -> Result<()> {
        let range = self.checked_range("read", addr, out.len())?;
        out.copy_from_slice(&self.buf.as_slice()[range]);
        Ok(())
    }

    /// Copies `data` into guest memory at `addr` and marks the pages dirty.
    ///
    /// # Errors
    ///
    /// Returns [`DifftestError::OutOfRange`] if any byte falls outside the window.
    pub fn write(&mut self, addr: GuestAddr, data: &[u8]) -> Result<()> {
        let range = self.checked_range("write", addr, data.len())?;
        self.mark_pages(&range);
        self.buf.as_mut_slice()[range].copy_from_slice(data);
        Ok(())
    }

    /// Returns the coalesced ranges written since the last call and clears the record.
    pub fn take_dirty(&mut self) -> Vec<MemRange> {
        let mut ranges = Vec::new();
        let mut run_start: Option<usize> = None;
        for page in 0..=self.dirty.len() {
            let is_dirty = self.dirty.get(page).copied().unwrap_or(false);
            match (is_dirty, run_start) {
                (true, None) => run_start = Some(page),
                (false, Some(first)) => {
                    let start = first << PAGE_SHIFT;
                    let end = (page << PAGE_SHIFT).min(self.size());
                    ranges.push(MemRange::new(self.base + start as u64, end - start));
                    run_start = None;
                }
                _ => {}
            }
        }
        self.clear_dirty();
        ranges
    }

    /// Forgets all recorded writes.
    pub fn clear_dirty(&mut self) {
        self.dirty.fill(false);
    }

    /// Number of pages written since the last synchronization.
    pub fn dirty_pages(&self) -> usize {
        self.dirty.iter().filter(|d| **d).count()
    }

    fn mark_pages(&mut self, range: &Range<usize>) {
        if range.is_empty() {
            return;
        }
        let first = range.start >> PAGE_SHIFT;
        let last = (range.end - 1) >> PAGE_SHIFT;
        self.dirty[first..=last].fill(true);
    }

    fn host_range(&self, addr: GuestAddr, len: usize) -> Option<Range<usize>> {
        let offset = usize::try_from(addr.offset_from(self.base)?).ok()?;
        let end = offset.checked_add(len)?;
        (end <= self.size()).then_some(offset..end)
    }

    fn checked_range(&self, op: &'static str, addr: GuestAddr, len: usize) -> Result<Range<usize>> {
        self.host_range(addr, len).ok_or(DifftestError::OutOfRange {
            op,
            addr,
            len: len as u64,
            base: self.base,
            size: self.size() as u64,
        })
    }
}
