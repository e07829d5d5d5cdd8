//! BasaltOS kernel core
//!
//! Virtual memory with copy-on-write fork, POSIX signals, process
//! accounting and resource groups, VFS synchronization primitives with the
//! RAM filesystem, the kernel address sanitizer, mandatory access control
//! with module signing, the packet filter, and SMP bring-up.
//!
//! The library is `no_std`. On the host target it links `std` and installs
//! the system allocator so the whole test suite runs under the standard
//! `cargo test` harness; bare-metal builds use the linked-list kernel heap.

#![no_std]

extern crate alloc;

// Host target: link std and use the system allocator so tests allocate
// normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand the kernel heap allocator its backing range.
///
/// # Safety
///
/// `start..start + size` must be writable memory owned by the heap alone,
/// and this must be called exactly once before the first allocation.
#[cfg(target_os = "none")]
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    // SAFETY: forwarded contract; the range is exclusively the heap's.
    unsafe { ALLOCATOR.lock().init(start, size) };
}

#[macro_use]
pub mod print;

pub mod arch;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod klog;
pub mod mm;
pub mod net;
pub mod process;
pub mod security;
pub mod serial;
pub mod signal;
pub mod smp;
pub mod sync;
pub mod syscall;
pub mod time;
