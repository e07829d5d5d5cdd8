//! Shared test fixtures
//!
//! Registers one aligned host arena with the frame allocator so page-table
//! walks and copy-on-write copies operate on real memory. Physical
//! addresses are identity-mapped host pointers (the phys-to-virt offset
//! stays zero).

use std::sync::Once;

use basalt_kernel::mm::{frame_allocator, MemoryRegion, PhysicalAddress, PAGE_SIZE};

const ARENA_BYTES: usize = 32 * 1024 * 1024;

static INIT: Once = Once::new();

/// Register the arena once per test binary.
pub fn init_physical_memory() {
    INIT.call_once(|| {
        let layout = std::alloc::Layout::from_size_align(ARENA_BYTES, PAGE_SIZE).unwrap();
        // Leaked on purpose: frames must stay valid for the whole test run.
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null());
        frame_allocator::add_region(MemoryRegion::new(
            PhysicalAddress::new(base as u64),
            ARENA_BYTES / PAGE_SIZE,
        ));
    });
}
