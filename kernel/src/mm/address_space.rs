//! Per-process address spaces
//!
//! An [`AddressSpace`] owns a sorted list of VMAs and the page-table
//! hierarchy that backs them. Every mutation (map, unmap, fault handling)
//! runs under the address-space lock; physical frames are shared across
//! spaces through the page refcount table during copy-on-write fork.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelResult, MemoryError};

use super::page_fault::{AccessViolation, SegvCode};
use super::{
    frame_allocator, page_refcount, FrameNumber, PageFlags, PageMapper, PhysicalAddress,
    VirtualAddress, Vma, VmaFlags, PAGE_SIZE,
};

struct Inner {
    /// VMAs sorted by start address; ranges are disjoint.
    vmas: Vec<Vma>,
    mapper: PageMapper,
}

/// A process's virtual address space.
pub struct AddressSpace {
    inner: Mutex<Inner>,
}

impl AddressSpace {
    /// Create an empty address space with a fresh page-table hierarchy.
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            inner: Mutex::new(Inner {
                vmas: Vec::new(),
                mapper: PageMapper::new()?,
            }),
        })
    }

    /// Install this space's page tables as the active hierarchy.
    pub fn activate(&self) {
        self.inner.lock().mapper.activate();
    }

    /// Physical address of the page-table root.
    pub fn page_table_root(&self) -> PhysicalAddress {
        self.inner.lock().mapper.root_phys()
    }

    /// Map a fresh region of `size` bytes at `start`. One zeroed frame is
    /// allocated and mapped per page with flags derived from `flags`. On any
    /// failure the pages already mapped for this region are torn down again
    /// before the error is returned.
    pub fn map_region(
        &self,
        start: VirtualAddress,
        size: usize,
        flags: VmaFlags,
    ) -> KernelResult<()> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(MemoryError::InvalidAddress.into());
        }
        let vma = Vma::new(start, start.add(size as u64), flags)?;

        let mut inner = self.inner.lock();
        let index = Self::insertion_index(&inner.vmas, &vma)?;

        let mut mapped = 0usize;
        for page in vma.pages() {
            let result = frame_allocator::allocate_zeroed_frame().and_then(|frame| {
                inner
                    .mapper
                    .map(page, frame, vma.page_flags())
                    .inspect_err(|_| {
                        frame_allocator::free_frame(frame).ok();
                    })?;
                page_refcount::set(frame, 1);
                Ok(())
            });
            if let Err(e) = result {
                // Roll back the pages of this region mapped so far.
                for page in vma.pages().take(mapped) {
                    Self::unmap_page(&mut inner.mapper, page);
                }
                return Err(e);
            }
            mapped += 1;
        }

        inner.vmas.insert(index, vma);
        Ok(())
    }

    /// Remove the VMA starting at `start` and release its pages.
    pub fn unmap_region(&self, start: VirtualAddress) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        let index = inner
            .vmas
            .iter()
            .position(|v| v.start() == start)
            .ok_or(MemoryError::NotMapped)?;
        let vma = inner.vmas.remove(index);
        for page in vma.pages() {
            Self::unmap_page(&mut inner.mapper, page);
        }
        Ok(())
    }

    /// The VMA containing `addr`, if any.
    pub fn find_vma(&self, addr: VirtualAddress) -> Option<Vma> {
        let inner = self.inner.lock();
        Self::find_in(&inner.vmas, addr)
    }

    /// Number of VMAs in the space.
    pub fn vma_count(&self) -> usize {
        self.inner.lock().vmas.len()
    }

    /// Snapshot of all VMAs, sorted by start address.
    pub fn vmas(&self) -> Vec<Vma> {
        self.inner.lock().vmas.clone()
    }

    /// Whether every byte of `[addr, addr + len)` lies inside VMAs granting
    /// the required permission. Coverage may span adjacent VMAs.
    pub fn range_has_access(&self, addr: VirtualAddress, len: usize, write: bool) -> bool {
        if len == 0 {
            return true;
        }
        let inner = self.inner.lock();
        let end = match addr.as_u64().checked_add(len as u64) {
            Some(e) => e,
            None => return false,
        };
        let mut cursor = addr.as_u64();
        while cursor < end {
            match Self::find_in(&inner.vmas, VirtualAddress::new(cursor)) {
                Some(vma) => {
                    let needed = if write { VmaFlags::WRITE } else { VmaFlags::READ };
                    if !vma.flags().contains(needed) {
                        return false;
                    }
                    cursor = vma.end().as_u64();
                }
                None => return false,
            }
        }
        true
    }

    /// Page-table flags of the page containing `addr`.
    pub fn pte_flags(&self, addr: VirtualAddress) -> KernelResult<PageFlags> {
        self.inner.lock().mapper.get_flags(addr.page_base())
    }

    /// Translate `addr` through this space's page tables.
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        self.inner.lock().mapper.translate(addr)
    }

    /// Handle a page fault at `addr`. Resolves copy-on-write write faults;
    /// anything else is an access violation. On success the faulting
    /// instruction may be restarted.
    pub fn handle_fault(
        &self,
        addr: VirtualAddress,
        is_write: bool,
    ) -> Result<(), AccessViolation> {
        let mut inner = self.inner.lock();

        if Self::find_in(&inner.vmas, addr).is_none() {
            return Err(AccessViolation::new(addr, is_write, SegvCode::MapErr));
        }

        let page = addr.page_base();
        let flags = match inner.mapper.get_flags(page) {
            Ok(f) if f.contains(PageFlags::PRESENT) => f,
            // Demand paging is not part of the core: a hole is a violation.
            _ => return Err(AccessViolation::new(addr, is_write, SegvCode::MapErr)),
        };

        if flags.is_cow() && is_write {
            return Self::resolve_cow(&mut inner, page, flags)
                .map_err(|_| AccessViolation::new(addr, is_write, SegvCode::AccErr));
        }

        Err(AccessViolation::new(addr, is_write, SegvCode::AccErr))
    }

    /// Fork this space: the child shares every present frame. Pages of
    /// writable regions become copy-on-write (read-only, COW-marked) in both
    /// parent and child; frame refcounts grow by one per shared page.
    pub fn fork(&self) -> KernelResult<AddressSpace> {
        let mut parent = self.inner.lock();
        let child = AddressSpace::new()?;
        {
            let mut child_inner = child.inner.lock();

            for i in 0..parent.vmas.len() {
                let make_cow = parent.vmas[i].flags().contains(VmaFlags::WRITE);
                let mut child_vma = parent.vmas[i];
                if make_cow {
                    child_vma.set_cow();
                    parent.vmas[i].set_cow();
                }
                // Registered before its pages so that teardown on a failed
                // fork covers everything mapped below.
                child_inner.vmas.push(child_vma);

                for page in child_vma.pages() {
                    let flags = match parent.mapper.get_flags(page) {
                        Ok(f) if f.contains(PageFlags::PRESENT) => f,
                        _ => continue,
                    };
                    let frame = match parent.mapper.translate(page) {
                        Some(phys) => FrameNumber::containing(phys),
                        None => continue,
                    };

                    page_refcount::acquire(frame);

                    let shared_flags = if make_cow { flags.mark_cow() } else { flags };
                    let result = if make_cow {
                        parent.mapper.update_flags(page, shared_flags)
                    } else {
                        Ok(())
                    }
                    .and_then(|_| child_inner.mapper.map(page, frame, shared_flags));
                    if let Err(e) = result {
                        page_refcount::release(frame).ok();
                        return Err(e);
                    }
                }
            }
        }
        Ok(child)
    }

    /// Kernel-side read of `buf.len()` bytes at `addr` in this space.
    pub fn read_bytes(&self, addr: VirtualAddress, buf: &mut [u8]) -> KernelResult<()> {
        let inner = self.inner.lock();
        let mut done = 0usize;
        while done < buf.len() {
            let va = addr.add(done as u64);
            let phys = inner.mapper.translate(va).ok_or(MemoryError::NotMapped)?;
            let in_page = (PAGE_SIZE as u64 - va.page_offset()) as usize;
            let chunk = in_page.min(buf.len() - done);
            let src = super::phys_to_virt(phys);
            // SAFETY: translate proved the page is mapped; the chunk stays
            // within one frame.
            unsafe {
                core::ptr::copy_nonoverlapping(src, buf[done..].as_mut_ptr(), chunk);
            }
            done += chunk;
        }
        Ok(())
    }

    /// Kernel-side write of `buf` at `addr`, with user store semantics: a
    /// store to a read-only or COW page takes the page-fault path first and
    /// is then restarted, exactly as the hardware would.
    pub fn write_bytes(&self, addr: VirtualAddress, buf: &[u8]) -> KernelResult<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let va = addr.add(done as u64);
            let chunk = {
                let inner = self.inner.lock();
                let page = va.page_base();
                let flags = inner.mapper.get_flags(page);
                match flags {
                    Ok(f) if f.contains(PageFlags::WRITABLE) => {
                        let phys = inner.mapper.translate(va).ok_or(MemoryError::NotMapped)?;
                        let in_page = (PAGE_SIZE as u64 - va.page_offset()) as usize;
                        let chunk = in_page.min(buf.len() - done);
                        let dst = super::phys_to_virt(phys);
                        // SAFETY: the page is mapped writable; the chunk
                        // stays within one frame.
                        unsafe {
                            core::ptr::copy_nonoverlapping(buf[done..].as_ptr(), dst, chunk);
                        }
                        Some(chunk)
                    }
                    _ => None,
                }
            };
            match chunk {
                Some(n) => done += n,
                None => {
                    // Protection mismatch: take the fault path, then retry.
                    self.handle_fault(va, true)
                        .map_err(|_| MemoryError::AccessDenied)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_cow(inner: &mut Inner, page: VirtualAddress, flags: PageFlags) -> KernelResult<()> {
        let phys = inner
            .mapper
            .translate(page)
            .ok_or(MemoryError::NotMapped)?;
        let frame = FrameNumber::containing(phys);
        let refs = page_refcount::get(frame);

        if refs > 1 {
            // Shared: copy into a private frame and drop our reference.
            let new_frame = frame_allocator::allocate_frame()?;
            let src = super::phys_to_virt(frame.base());
            let dst = super::phys_to_virt(new_frame.base());
            // SAFETY: both frames are live 4 KiB allocations; the old one is
            // kept alive by our still-installed mapping.
            unsafe {
                core::ptr::copy_nonoverlapping(src, dst, PAGE_SIZE);
            }

            inner.mapper.unmap(page)?;
            inner.mapper.map(page, new_frame, flags.clear_cow())?;

            if page_refcount::release(frame)? == 0 {
                frame_allocator::free_frame(frame)?;
            }
            page_refcount::set(new_frame, 1);
        } else {
            // Sole owner: reclaim the page in place.
            inner.mapper.update_flags(page, flags.clear_cow())?;
            if refs == 1 {
                page_refcount::release(frame)?;
            }
        }
        Ok(())
    }

    fn unmap_page(mapper: &mut PageMapper, page: VirtualAddress) {
        let Ok(frame) = mapper.unmap(page) else {
            return;
        };
        match page_refcount::get(frame) {
            0 => {
                frame_allocator::free_frame(frame).ok();
            }
            1 => {
                page_refcount::release(frame).ok();
                frame_allocator::free_frame(frame).ok();
            }
            _ => {
                page_refcount::release(frame).ok();
            }
        }
    }

    fn find_in(vmas: &[Vma], addr: VirtualAddress) -> Option<Vma> {
        let idx = vmas.partition_point(|v| v.end() <= addr);
        let vma = vmas.get(idx)?;
        vma.contains(addr).then_some(*vma)
    }

    fn insertion_index(vmas: &[Vma], vma: &Vma) -> KernelResult<usize> {
        let idx = vmas.partition_point(|v| v.end() <= vma.start());
        if let Some(next) = vmas.get(idx) {
            if next.start() < vma.end() {
                return Err(MemoryError::AlreadyMapped.into());
            }
        }
        Ok(idx)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let vmas = core::mem::take(&mut inner.vmas);
        for vma in vmas {
            for page in vma.pages() {
                Self::unmap_page(&mut inner.mapper, page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::mm::test_support::init_test_arena;

    const BASE: VirtualAddress = VirtualAddress::new(0x40_0000);

    fn rw() -> VmaFlags {
        VmaFlags::READ | VmaFlags::WRITE
    }

    #[test]
    fn map_region_backs_every_page() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        space.map_region(BASE, 3 * PAGE_SIZE, rw()).unwrap();

        for i in 0..3 {
            let page = BASE.add(i * PAGE_SIZE as u64);
            assert!(space.translate(page).is_some());
            let flags = space.pte_flags(page).unwrap();
            assert!(flags.contains(PageFlags::WRITABLE));
            assert!(flags.contains(PageFlags::USER));
        }
        assert_eq!(space.vma_count(), 1);
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        space.map_region(BASE, 2 * PAGE_SIZE, rw()).unwrap();
        assert_eq!(
            space.map_region(BASE.add(PAGE_SIZE as u64), PAGE_SIZE, rw()),
            Err(KernelError::Memory(MemoryError::AlreadyMapped))
        );
        assert_eq!(space.vma_count(), 1);
    }

    #[test]
    fn find_vma_hits_and_misses() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        space.map_region(BASE, 2 * PAGE_SIZE, rw()).unwrap();

        let vma = space.find_vma(BASE.add(0x1FFF)).unwrap();
        assert_eq!(vma.start(), BASE);
        assert!(space.find_vma(BASE.add(2 * PAGE_SIZE as u64)).is_none());
        assert!(space.find_vma(VirtualAddress::new(0x1000)).is_none());
    }

    #[test]
    fn read_write_round_trip() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        space.map_region(BASE, PAGE_SIZE, rw()).unwrap();

        space.write_bytes(BASE.add(100), b"basalt").unwrap();
        let mut buf = [0u8; 6];
        space.read_bytes(BASE.add(100), &mut buf).unwrap();
        assert_eq!(&buf, b"basalt");
    }

    #[test]
    fn fault_outside_any_vma_is_a_violation() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        let violation = space
            .handle_fault(VirtualAddress::new(0x9999_0000), true)
            .unwrap_err();
        assert_eq!(violation.code, SegvCode::MapErr);
    }

    #[test]
    fn write_fault_on_readonly_page_is_a_violation() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        space.map_region(BASE, PAGE_SIZE, VmaFlags::READ).unwrap();
        let violation = space.handle_fault(BASE.add(8), true).unwrap_err();
        assert_eq!(violation.code, SegvCode::AccErr);
    }

    #[test]
    fn fork_shares_then_copies_on_write() {
        init_test_arena();
        let parent = AddressSpace::new().unwrap();
        parent.map_region(BASE, PAGE_SIZE, rw()).unwrap();
        parent.write_bytes(BASE, &[0x42]).unwrap();

        let child = parent.fork().unwrap();

        // Both see the same frame, marked COW and read-only.
        let pf = parent.translate(BASE).unwrap();
        let cf = child.translate(BASE).unwrap();
        assert_eq!(pf, cf);
        assert!(parent.pte_flags(BASE).unwrap().is_cow());
        assert!(!child.pte_flags(BASE).unwrap().contains(PageFlags::WRITABLE));
        assert_eq!(page_refcount::get(FrameNumber::containing(pf)), 2);

        // Parent writes: gets a private copy, child keeps the original.
        parent.write_bytes(BASE, &[0x99]).unwrap();
        let mut b = [0u8];
        child.read_bytes(BASE, &mut b).unwrap();
        assert_eq!(b[0], 0x42);
        parent.read_bytes(BASE, &mut b).unwrap();
        assert_eq!(b[0], 0x99);
        assert_ne!(parent.translate(BASE), child.translate(BASE));

        // Child is now sole owner; its write reclaims the page in place.
        let child_frame = FrameNumber::containing(child.translate(BASE).unwrap());
        assert_eq!(page_refcount::get(child_frame), 1);
        child.write_bytes(BASE, &[0x17]).unwrap();
        assert_eq!(page_refcount::get(child_frame), 0);
        let flags = child.pte_flags(BASE).unwrap();
        assert!(!flags.is_cow());
        assert!(flags.contains(PageFlags::WRITABLE));
    }

    #[test]
    fn unmap_region_releases_mappings() {
        init_test_arena();
        let space = AddressSpace::new().unwrap();
        space.map_region(BASE, 2 * PAGE_SIZE, rw()).unwrap();
        space.unmap_region(BASE).unwrap();
        assert_eq!(space.vma_count(), 0);
        assert!(space.translate(BASE).is_none());
        assert_eq!(
            space.unmap_region(BASE),
            Err(KernelError::Memory(MemoryError::NotMapped))
        );
    }
}
