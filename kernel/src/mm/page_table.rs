//! 4-level page tables
//!
//! [`PageMapper`] owns a root table and every descendant table it allocates,
//! and exposes the mapping operations the address-space layer builds on:
//! map, unmap, flag query/update, and translation. The copy-on-write marker
//! travels in one of the architecturally available PTE bits (see
//! [`PageFlags::COW`]).

use crate::arch;
use crate::error::{KernelResult, MemoryError};

use super::{
    frame_allocator, FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, PAGE_SIZE,
};

/// Number of entries in a page table.
pub const PAGE_TABLE_ENTRIES: usize = 512;

/// Mask of the bits a PTE uses for flags (low 12 plus NX).
const FLAGS_MASK: u64 = 0x8000_0000_0000_0FFF;

/// Mask of the bits a PTE uses for the frame address.
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// A single page-table entry.
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    /// An empty (non-present) entry.
    pub const fn empty() -> Self {
        Self { entry: 0 }
    }

    /// Whether the present bit is set.
    pub const fn is_present(&self) -> bool {
        self.entry & PageFlags::PRESENT.bits() != 0
    }

    /// The frame this entry points at, if present.
    pub fn frame(&self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(FrameNumber::new((self.entry & ADDR_MASK) >> 12))
        } else {
            None
        }
    }

    /// The flag bits of this entry.
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.entry & FLAGS_MASK)
    }

    /// Point this entry at `frame` with `flags`.
    pub fn set(&mut self, frame: FrameNumber, flags: PageFlags) {
        self.entry = (frame.as_u64() << 12) | flags.bits();
    }

    /// Clear the entry.
    pub fn clear(&mut self) {
        self.entry = 0;
    }
}

/// A page table of 512 entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    /// Entry at `index`.
    pub fn entry(&self, index: usize) -> &PageTableEntry {
        &self.entries[index]
    }

    /// Mutable entry at `index`.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }
}

/// The four per-level indices of a canonical virtual address.
#[derive(Debug, Clone, Copy)]
struct TableIndices {
    l4: usize,
    l3: usize,
    l2: usize,
    l1: usize,
}

impl TableIndices {
    fn of(addr: VirtualAddress) -> Self {
        let a = addr.as_u64();
        Self {
            l4: ((a >> 39) & 0x1FF) as usize,
            l3: ((a >> 30) & 0x1FF) as usize,
            l2: ((a >> 21) & 0x1FF) as usize,
            l1: ((a >> 12) & 0x1FF) as usize,
        }
    }
}

/// Flags used for intermediate (non-leaf) table entries.
fn table_flags() -> PageFlags {
    PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
}

/// Resolve a table frame to a kernel-visible reference.
///
/// # Safety
///
/// `frame` must hold a page table owned by the calling mapper; the caller
/// must not create aliasing mutable references to the same table.
unsafe fn table_mut<'a>(frame: FrameNumber) -> &'a mut PageTable {
    // SAFETY: per the function contract the frame holds a live page table,
    // and phys_to_virt yields its unique kernel alias.
    unsafe { &mut *(super::phys_to_virt(frame.base()) as *mut PageTable) }
}

/// Owner of a 4-level page-table hierarchy.
///
/// The mapper exclusively owns its root table and every intermediate table
/// it allocates; dropping it returns those frames to the allocator. Leaf
/// data frames are owned by the mappings themselves and are not touched.
pub struct PageMapper {
    root: FrameNumber,
}

impl PageMapper {
    /// Allocate an empty hierarchy.
    pub fn new() -> KernelResult<Self> {
        let root = frame_allocator::allocate_zeroed_frame()?;
        Ok(Self { root })
    }

    /// Physical address of the root table (the CR3 value).
    pub fn root_phys(&self) -> PhysicalAddress {
        self.root.base()
    }

    /// Install this hierarchy as the active address space.
    pub fn activate(&self) {
        arch::load_page_table_root(self.root_phys());
    }

    /// Map `page` to `frame` with `flags`. Both must be aligned; mapping an
    /// already-mapped page is an error.
    pub fn map(
        &mut self,
        page: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> KernelResult<()> {
        if !page.is_aligned() {
            return Err(MemoryError::InvalidAddress.into());
        }
        let idx = TableIndices::of(page);

        let l3_frame = self.ensure_subtable(self.root, idx.l4)?;
        let l2_frame = self.ensure_subtable(l3_frame, idx.l3)?;
        let l1_frame = self.ensure_subtable(l2_frame, idx.l2)?;

        // SAFETY: l1_frame was allocated by (and is owned by) this mapper.
        let l1 = unsafe { table_mut(l1_frame) };
        let entry = l1.entry_mut(idx.l1);
        if entry.is_present() {
            return Err(MemoryError::AlreadyMapped.into());
        }
        entry.set(frame, flags | PageFlags::PRESENT);
        Ok(())
    }

    /// Remove the mapping for `page`, returning the frame it pointed at.
    pub fn unmap(&mut self, page: VirtualAddress) -> KernelResult<FrameNumber> {
        let entry = self.walk_mut(page)?;
        let frame = entry.frame().ok_or(MemoryError::NotMapped)?;
        entry.clear();
        arch::tlb_flush_page(page);
        Ok(frame)
    }

    /// Flags of the mapping for `page`.
    pub fn get_flags(&self, page: VirtualAddress) -> KernelResult<PageFlags> {
        let entry = self.walk(page)?;
        Ok(entry.flags())
    }

    /// Replace the flags of the mapping for `page`, keeping its frame.
    pub fn update_flags(&mut self, page: VirtualAddress, flags: PageFlags) -> KernelResult<()> {
        let entry = self.walk_mut(page)?;
        let frame = entry.frame().ok_or(MemoryError::NotMapped)?;
        entry.set(frame, flags | PageFlags::PRESENT);
        arch::tlb_flush_page(page);
        Ok(())
    }

    /// Translate a virtual address to the physical address it maps to.
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.walk(addr.page_base()).ok()?;
        let frame = entry.frame()?;
        Some(PhysicalAddress::new(frame.base().as_u64() + addr.page_offset()))
    }

    fn ensure_subtable(&mut self, table: FrameNumber, index: usize) -> KernelResult<FrameNumber> {
        // SAFETY: `table` is owned by this mapper (root or an intermediate
        // allocated below).
        let table = unsafe { table_mut(table) };
        let entry = table.entry_mut(index);
        if let Some(frame) = entry.frame() {
            return Ok(frame);
        }
        let frame = frame_allocator::allocate_zeroed_frame()?;
        entry.set(frame, table_flags());
        Ok(frame)
    }

    fn walk(&self, page: VirtualAddress) -> KernelResult<&PageTableEntry> {
        if !page.is_aligned() {
            return Err(MemoryError::InvalidAddress.into());
        }
        let idx = TableIndices::of(page);
        // SAFETY: all table frames in the walk are owned by this mapper.
        unsafe {
            let l4 = table_mut(self.root);
            let l3_frame = l4.entry(idx.l4).frame().ok_or(MemoryError::NotMapped)?;
            let l3 = table_mut(l3_frame);
            let l2_frame = l3.entry(idx.l3).frame().ok_or(MemoryError::NotMapped)?;
            let l2 = table_mut(l2_frame);
            let l1_frame = l2.entry(idx.l2).frame().ok_or(MemoryError::NotMapped)?;
            let l1 = table_mut(l1_frame);
            let entry = l1.entry(idx.l1);
            if !entry.is_present() {
                return Err(MemoryError::NotMapped.into());
            }
            Ok(&*(entry as *const PageTableEntry))
        }
    }

    fn walk_mut(&mut self, page: VirtualAddress) -> KernelResult<&mut PageTableEntry> {
        if !page.is_aligned() {
            return Err(MemoryError::InvalidAddress.into());
        }
        let idx = TableIndices::of(page);
        // SAFETY: all table frames in the walk are owned by this mapper, and
        // `&mut self` guarantees no aliasing access.
        unsafe {
            let l4 = table_mut(self.root);
            let l3_frame = l4.entry(idx.l4).frame().ok_or(MemoryError::NotMapped)?;
            let l3 = table_mut(l3_frame);
            let l2_frame = l3.entry(idx.l3).frame().ok_or(MemoryError::NotMapped)?;
            let l2 = table_mut(l2_frame);
            let l1_frame = l2.entry(idx.l2).frame().ok_or(MemoryError::NotMapped)?;
            let l1 = table_mut(l1_frame);
            let entry = l1.entry_mut(idx.l1);
            if !entry.is_present() {
                return Err(MemoryError::NotMapped.into());
            }
            Ok(&mut *(entry as *mut PageTableEntry))
        }
    }
}

impl Drop for PageMapper {
    fn drop(&mut self) {
        // Free the user-half subtables (L4 indices 0..256). Kernel-half
        // entries are shared with the boot tables and stay untouched.
        // SAFETY: every table frame reached here was allocated by this
        // mapper and is dropped exactly once.
        unsafe {
            let l4 = table_mut(self.root);
            for l4_idx in 0..PAGE_TABLE_ENTRIES / 2 {
                let Some(l3_frame) = l4.entry(l4_idx).frame() else {
                    continue;
                };
                let l3 = table_mut(l3_frame);
                for l3_idx in 0..PAGE_TABLE_ENTRIES {
                    let entry = l3.entry(l3_idx);
                    if entry.flags().contains(PageFlags::HUGE) {
                        continue;
                    }
                    let Some(l2_frame) = entry.frame() else {
                        continue;
                    };
                    let l2 = table_mut(l2_frame);
                    for l2_idx in 0..PAGE_TABLE_ENTRIES {
                        let entry = l2.entry(l2_idx);
                        if entry.flags().contains(PageFlags::HUGE) {
                            continue;
                        }
                        if let Some(l1_frame) = entry.frame() {
                            frame_allocator::free_frame(l1_frame).ok();
                        }
                    }
                    frame_allocator::free_frame(l2_frame).ok();
                }
                frame_allocator::free_frame(l3_frame).ok();
            }
        }
        frame_allocator::free_frame(self.root).ok();
    }
}

// Frame size must divide evenly into the table layout the walk assumes.
const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::mm::test_support::init_test_arena;

    fn user_flags() -> PageFlags {
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
    }

    #[test]
    fn map_translate_unmap_round_trip() {
        init_test_arena();
        let mut mapper = PageMapper::new().unwrap();
        let frame = frame_allocator::allocate_zeroed_frame().unwrap();
        let page = VirtualAddress::new(0x40_0000);

        mapper.map(page, frame, user_flags()).unwrap();
        assert_eq!(mapper.translate(page), Some(frame.base()));
        assert_eq!(
            mapper.translate(page.add(0x123)),
            Some(PhysicalAddress::new(frame.base().as_u64() + 0x123))
        );

        let unmapped = mapper.unmap(page).unwrap();
        assert_eq!(unmapped, frame);
        assert_eq!(mapper.translate(page), None);
        frame_allocator::free_frame(frame).unwrap();
    }

    #[test]
    fn double_map_is_rejected() {
        init_test_arena();
        let mut mapper = PageMapper::new().unwrap();
        let frame = frame_allocator::allocate_zeroed_frame().unwrap();
        let page = VirtualAddress::new(0x40_0000);

        mapper.map(page, frame, user_flags()).unwrap();
        assert_eq!(
            mapper.map(page, frame, user_flags()),
            Err(KernelError::Memory(MemoryError::AlreadyMapped))
        );
        mapper.unmap(page).unwrap();
        frame_allocator::free_frame(frame).unwrap();
    }

    #[test]
    fn unaligned_addresses_are_rejected() {
        init_test_arena();
        let mut mapper = PageMapper::new().unwrap();
        let frame = frame_allocator::allocate_zeroed_frame().unwrap();
        assert_eq!(
            mapper.map(VirtualAddress::new(0x40_0010), frame, user_flags()),
            Err(KernelError::Memory(MemoryError::InvalidAddress))
        );
        frame_allocator::free_frame(frame).unwrap();
    }

    #[test]
    fn flag_update_preserves_frame() {
        init_test_arena();
        let mut mapper = PageMapper::new().unwrap();
        let frame = frame_allocator::allocate_zeroed_frame().unwrap();
        let page = VirtualAddress::new(0x40_0000);
        mapper.map(page, frame, user_flags()).unwrap();

        let cow = mapper.get_flags(page).unwrap().mark_cow();
        mapper.update_flags(page, cow).unwrap();

        let flags = mapper.get_flags(page).unwrap();
        assert!(flags.is_cow());
        assert!(!flags.contains(PageFlags::WRITABLE));
        assert_eq!(mapper.translate(page), Some(frame.base()));

        mapper.unmap(page).unwrap();
        frame_allocator::free_frame(frame).unwrap();
    }

    #[test]
    fn missing_mapping_reports_not_mapped() {
        init_test_arena();
        let mut mapper = PageMapper::new().unwrap();
        let page = VirtualAddress::new(0x7000_0000);
        assert_eq!(
            mapper.unmap(page),
            Err(KernelError::Memory(MemoryError::NotMapped))
        );
        assert_eq!(
            mapper.get_flags(page),
            Err(KernelError::Memory(MemoryError::NotMapped))
        );
    }
}
