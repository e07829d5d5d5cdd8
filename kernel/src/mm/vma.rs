//! Virtual memory areas
//!
//! A [`Vma`] is a page-aligned `[start, end)` range with uniform permissions.
//! The address space owns its VMAs in a sorted vector; ranges are disjoint
//! and lookups binary-search by start address.

use bitflags::bitflags;

use crate::error::{KernelResult, MemoryError};

use super::{PageFlags, VirtualAddress, PAGE_SIZE};

bitflags! {
    /// Permissions and kind of a virtual memory area.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const EXEC   = 1 << 2;
        const SHARED = 1 << 3;
        const STACK  = 1 << 4;
        const HEAP   = 1 << 5;
        const MMAP   = 1 << 6;
        const COW    = 1 << 7;
        const LOCKED = 1 << 8;
    }
}

/// A contiguous virtual range with uniform permissions.
#[derive(Debug, Clone, Copy)]
pub struct Vma {
    start: VirtualAddress,
    end: VirtualAddress,
    flags: VmaFlags,
    file_offset: u64,
    refs: u32,
}

impl Vma {
    /// Create a VMA covering `[start, end)`. Both bounds must be
    /// page-aligned and the range non-empty.
    pub fn new(start: VirtualAddress, end: VirtualAddress, flags: VmaFlags) -> KernelResult<Self> {
        if !start.is_aligned() || !end.is_aligned() || start >= end {
            return Err(MemoryError::InvalidAddress.into());
        }
        Ok(Self {
            start,
            end,
            flags,
            file_offset: 0,
            refs: 1,
        })
    }

    /// Inclusive start of the range.
    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Exclusive end of the range.
    pub fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Permission and kind flags.
    pub fn flags(&self) -> VmaFlags {
        self.flags
    }

    /// Mark the region as containing copy-on-write pages.
    pub(super) fn set_cow(&mut self) {
        self.flags |= VmaFlags::COW;
    }

    /// Backing file offset (zero for anonymous regions).
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Number of references to this VMA.
    pub fn refs(&self) -> u32 {
        self.refs
    }

    /// Whether `addr` falls inside the range.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Number of pages the range spans.
    pub fn page_count(&self) -> usize {
        ((self.end.as_u64() - self.start.as_u64()) / PAGE_SIZE as u64) as usize
    }

    /// Iterator over the page base addresses of the range.
    pub fn pages(&self) -> impl Iterator<Item = VirtualAddress> {
        let start = self.start.as_u64();
        let count = self.page_count() as u64;
        (0..count).map(move |i| VirtualAddress::new(start + i * PAGE_SIZE as u64))
    }

    /// Page-table flags derived from the VMA permissions: user pages are
    /// writable iff the VMA is, and no-execute unless it is executable.
    pub fn page_flags(&self) -> PageFlags {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if self.flags.contains(VmaFlags::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        if !self.flags.contains(VmaFlags::EXEC) {
            flags |= PageFlags::NO_EXECUTE;
        }
        flags
    }
}
