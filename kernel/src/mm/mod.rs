//! Memory management
//!
//! Physical frame allocation, 4-level paging, per-frame reference counting,
//! per-process address spaces with copy-on-write fork, page-fault dispatch,
//! and user-pointer validation.

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

pub mod address_space;
pub mod frame_allocator;
pub mod kasan;
pub mod page_fault;
pub mod page_refcount;
pub mod page_table;
pub mod user_validation;
pub mod vma;

pub use address_space::AddressSpace;
pub use frame_allocator::{FrameAllocatorStats, MemoryRegion};
pub use page_table::PageMapper;
pub use vma::{Vma, VmaFlags};

/// Size of a page and of a physical frame (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Alias kept for call sites that talk about physical frames.
pub const FRAME_SIZE: usize = PAGE_SIZE;

/// Exclusive upper bound of the canonical user address range.
pub const USER_SPACE_END: u64 = 0x0000_7FFF_FFFF_FFFF;

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    /// Wrap a raw physical address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// The raw address value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether the address is frame-aligned.
    pub const fn is_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    /// Wrap a raw virtual address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// The raw address value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether the address is page-aligned.
    pub const fn is_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    /// Round down to the containing page boundary.
    pub const fn page_base(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    /// Byte offset within the containing page.
    pub const fn page_offset(&self) -> u64 {
        self.0 & (PAGE_SIZE as u64 - 1)
    }

    /// Address advanced by `offset` bytes.
    pub const fn add(&self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

/// Physical frame number (physical address >> 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    /// Wrap a raw frame number.
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    /// Frame number containing the given physical address.
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.as_u64() / PAGE_SIZE as u64)
    }

    /// The raw frame number.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Base physical address of the frame.
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE as u64)
    }
}

bitflags! {
    /// Page-table entry flags. Bits 9..=11 are the architecturally available
    /// bits; bit 9 carries the copy-on-write marker.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
        const COW           = 1 << 9;
        const AVAILABLE_1   = 1 << 10;
        const AVAILABLE_2   = 1 << 11;
        const NO_EXECUTE    = 1 << 63;
    }
}

impl PageFlags {
    /// Turn a mapping into its copy-on-write form: shared read-only with the
    /// COW marker set. COW implies not writable.
    pub fn mark_cow(self) -> Self {
        (self | Self::COW) - Self::WRITABLE
    }

    /// Resolve a copy-on-write mapping back to private writable.
    pub fn clear_cow(self) -> Self {
        (self | Self::WRITABLE) - Self::COW
    }

    /// Whether this entry is marked copy-on-write.
    pub fn is_cow(self) -> bool {
        self.contains(Self::COW)
    }
}

/// Offset added to a physical address to reach its kernel-visible virtual
/// alias. Zero means identity (early boot and the host test target, where
/// "physical" frames live inside a registered arena).
static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the physical-memory mapping offset handed over by the boot stage.
pub fn set_phys_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Kernel-visible pointer to the byte at physical address `phys`.
pub fn phys_to_virt(phys: PhysicalAddress) -> *mut u8 {
    let offset = PHYS_MEM_OFFSET.load(Ordering::Acquire);
    phys.as_u64().wrapping_add(offset) as *mut u8
}

/// Initialize the memory subsystem over one usable physical region.
pub fn init(region: MemoryRegion) {
    frame_allocator::add_region(region);
    log::info!(target: "mm", "frame allocator online: {:?}", frame_allocator::stats());
}
