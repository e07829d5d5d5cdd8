//! Kernel address sanitizer
//!
//! One shadow byte describes each 8-byte block of tracked memory: zero means
//! fully accessible, 1..=7 means only the first N bytes are valid, and the
//! high poison values classify redzones, freed stack frames, freed heap
//! memory, and overflow regions. Reads of the shadow are lock-free; poison
//! and unpoison serialize on a spinlock. Detections are counted, reported to
//! the audit log, and returned as errors; the sanitizer's own state is never
//! corrupted by what it detects.

use alloc::boxed::Box;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use spin::Mutex;

use crate::error::{KasanError, KernelResult};
use crate::sync::OnceLock;

/// Bytes of tracked memory covered by one shadow byte.
pub const SHADOW_SCALE: usize = 8;

/// Shadow poison: redzone between heap allocations.
pub const SHADOW_REDZONE: u8 = 0xFF;
/// Shadow poison: stack frame that has returned.
pub const SHADOW_STACK_FREE: u8 = 0xFE;
/// Shadow poison: freed heap allocation.
pub const SHADOW_USE_AFTER_FREE: u8 = 0xFD;
/// Shadow poison: stack overflow guard.
pub const SHADOW_STACK_OVERFLOW: u8 = 0xFC;
/// Shadow poison: heap overflow guard.
pub const SHADOW_HEAP_OVERFLOW: u8 = 0xFB;

/// Depth of the stack trace stored with each allocation record.
pub const KASAN_STACK_DEPTH: usize = 8;

/// Capacity of the allocation-tracker ring.
pub const KASAN_TRACKER_CAPACITY: usize = 1024;

/// Range of memory the sanitizer shadows.
#[derive(Debug, Clone, Copy)]
pub struct KasanConfig {
    /// First tracked address; must be 8-byte aligned.
    pub base: u64,
    /// Tracked size in bytes; must be a multiple of 8.
    pub size: usize,
}

/// One allocation seen by the tracker.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRecord {
    /// Base address of the allocation.
    pub addr: u64,
    /// Size in bytes.
    pub size: usize,
    /// Time of the allocation, microseconds.
    pub timestamp_us: u64,
    /// Call-stack of the allocation site (zero-filled when unavailable).
    pub stack: [u64; KASAN_STACK_DEPTH],
    /// Whether the allocation has been freed.
    pub freed: bool,
}

struct AllocationTracker {
    records: Vec<AllocationRecord>,
    head: usize,
}

impl AllocationTracker {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            head: 0,
        }
    }

    fn track(&mut self, addr: u64, size: usize, stack: &[u64]) {
        let mut record = AllocationRecord {
            addr,
            size,
            timestamp_us: crate::time::monotonic_us(),
            stack: [0; KASAN_STACK_DEPTH],
            freed: false,
        };
        let depth = stack.len().min(KASAN_STACK_DEPTH);
        record.stack[..depth].copy_from_slice(&stack[..depth]);

        if self.records.len() < KASAN_TRACKER_CAPACITY {
            self.records.push(record);
            self.head = self.records.len() % KASAN_TRACKER_CAPACITY;
        } else {
            self.records[self.head] = record;
            self.head = (self.head + 1) % KASAN_TRACKER_CAPACITY;
        }
    }

    fn track_free(&mut self, addr: u64) -> Result<(), KasanError> {
        // Newest record wins: the same address may have been recycled.
        let len = self.records.len();
        for i in (0..len).rev() {
            let index = if len < KASAN_TRACKER_CAPACITY {
                i
            } else {
                (self.head + i) % KASAN_TRACKER_CAPACITY
            };
            if self.records[index].addr == addr {
                if self.records[index].freed {
                    return Err(KasanError::DoubleFree);
                }
                self.records[index].freed = true;
                return Ok(());
            }
        }
        Err(KasanError::InvalidFree)
    }

    fn live_allocations(&self) -> Vec<AllocationRecord> {
        self.records.iter().filter(|r| !r.freed).copied().collect()
    }
}

/// Sanitizer state: shadow bytes plus the allocation tracker.
pub struct Kasan {
    base: u64,
    shadow: Box<[AtomicU8]>,
    /// Serializes poison/unpoison; shadow reads stay lock-free.
    write_lock: Mutex<()>,
    detections: AtomicU64,
    tracker: Mutex<AllocationTracker>,
}

impl Kasan {
    /// Build a sanitizer shadowing the configured range.
    pub fn new(config: KasanConfig) -> Self {
        let blocks = config.size / SHADOW_SCALE;
        let mut shadow = Vec::with_capacity(blocks);
        shadow.resize_with(blocks, || AtomicU8::new(0));
        Self {
            base: config.base,
            shadow: shadow.into_boxed_slice(),
            write_lock: Mutex::new(()),
            detections: AtomicU64::new(0),
            tracker: Mutex::new(AllocationTracker::new()),
        }
    }

    /// Number of detections reported so far.
    pub fn detections(&self) -> u64 {
        self.detections.load(Ordering::Relaxed)
    }

    fn shadow_index(&self, addr: u64) -> Option<usize> {
        if addr < self.base {
            return None;
        }
        let index = ((addr - self.base) as usize) / SHADOW_SCALE;
        (index < self.shadow.len()).then_some(index)
    }

    /// Check an access of `size` bytes at `addr`. Untracked addresses pass.
    pub fn check_access(&self, addr: u64, size: usize) -> KernelResult<()> {
        if size == 0 {
            return Ok(());
        }
        let Some(end) = addr.checked_add(size as u64 - 1) else {
            return Ok(());
        };
        let Some(first) = self.shadow_index(addr) else {
            return Ok(());
        };
        let Some(last) = self.shadow_index(end) else {
            return Ok(());
        };

        for index in first..=last {
            let value = self.shadow[index].load(Ordering::Relaxed);
            if value == 0 {
                continue;
            }
            if value < SHADOW_SCALE as u8 {
                // Partial block: only the first `value` bytes are valid.
                let block_start = self.base + (index * SHADOW_SCALE) as u64;
                let last_touched = end.min(block_start + SHADOW_SCALE as u64 - 1) - block_start;
                if last_touched >= value as u64 {
                    return Err(self.report(KasanError::HeapOverflow, addr));
                }
                continue;
            }
            let kind = match value {
                SHADOW_REDZONE => KasanError::HeapOverflow,
                SHADOW_STACK_FREE => KasanError::StackUseAfterFree,
                SHADOW_USE_AFTER_FREE => KasanError::UseAfterFree,
                SHADOW_STACK_OVERFLOW => KasanError::StackOverflow,
                SHADOW_HEAP_OVERFLOW => KasanError::HeapOverflow,
                _ => KasanError::MemoryViolation,
            };
            return Err(self.report(kind, addr));
        }
        Ok(())
    }

    /// Poison every shadow block touched by `[addr, addr + size)`.
    pub fn poison(&self, addr: u64, size: usize, value: u8) {
        if size == 0 {
            return;
        }
        let _guard = self.write_lock.lock();
        let Some(end) = addr.checked_add(size as u64 - 1) else {
            return;
        };
        let (Some(first), Some(last)) = (self.shadow_index(addr), self.shadow_index(end)) else {
            return;
        };
        for index in first..=last {
            self.shadow[index].store(value, Ordering::Relaxed);
        }
    }

    /// Mark `[addr, addr + size)` accessible. A trailing partial block gets
    /// the partial-validity count so overruns inside it are still caught.
    pub fn unpoison(&self, addr: u64, size: usize) {
        if size == 0 {
            return;
        }
        let _guard = self.write_lock.lock();
        let full_blocks = size / SHADOW_SCALE;
        let remainder = size % SHADOW_SCALE;

        for i in 0..full_blocks {
            if let Some(index) = self.shadow_index(addr + (i * SHADOW_SCALE) as u64) {
                self.shadow[index].store(0, Ordering::Relaxed);
            }
        }
        if remainder > 0 {
            if let Some(index) = self.shadow_index(addr + (full_blocks * SHADOW_SCALE) as u64) {
                self.shadow[index].store(remainder as u8, Ordering::Relaxed);
            }
        }
    }

    /// Poison a freed range as use-after-free.
    pub fn quarantine(&self, addr: u64, size: usize) {
        self.poison(addr, size, SHADOW_USE_AFTER_FREE);
    }

    /// Hook for a completed allocation: make it accessible and track it.
    pub fn on_alloc(&self, addr: u64, size: usize) {
        self.unpoison(addr, size);
        self.tracker.lock().track(addr, size, &[]);
    }

    /// Hook for a free: validate it against the tracker, then quarantine.
    pub fn on_free(&self, addr: u64, size: usize) -> KernelResult<()> {
        self.tracker
            .lock()
            .track_free(addr)
            .map_err(|kind| self.report(kind, addr))?;
        self.quarantine(addr, size);
        Ok(())
    }

    /// Allocations the tracker has not seen freed.
    pub fn live_allocations(&self) -> Vec<AllocationRecord> {
        self.tracker.lock().live_allocations()
    }

    fn report(&self, kind: KasanError, addr: u64) -> crate::error::KernelError {
        self.detections.fetch_add(1, Ordering::Relaxed);
        crate::security::audit::report_kasan(kind, addr);
        log::warn!(target: "kasan", "{:?} at {:#x}", kind, addr);
        kind.into()
    }
}

/// Stack-frame protector: unpoisons a frame on entry and poisons it as a
/// freed stack frame on exit.
pub struct StackProtector<'a> {
    kasan: &'a Kasan,
    frame_base: u64,
    frame_size: usize,
}

impl<'a> StackProtector<'a> {
    /// Protect the frame `[frame_base, frame_base + frame_size)`.
    pub fn enter(kasan: &'a Kasan, frame_base: u64, frame_size: usize) -> Self {
        kasan.unpoison(frame_base, frame_size);
        Self {
            kasan,
            frame_base,
            frame_size,
        }
    }
}

impl Drop for StackProtector<'_> {
    fn drop(&mut self) {
        self.kasan
            .poison(self.frame_base, self.frame_size, SHADOW_STACK_FREE);
    }
}

// ---------------------------------------------------------------------------
// Global instance
// ---------------------------------------------------------------------------

static KASAN: OnceLock<Kasan> = OnceLock::new();

/// Initialize the global sanitizer. One-shot; later calls are no-ops.
pub fn init(config: KasanConfig) {
    if KASAN.set(Kasan::new(config)).is_ok() {
        log::info!(target: "kasan", "shadow online: {:#x}..{:#x}", config.base, config.base + config.size as u64);
    }
}

/// The global sanitizer, if initialized.
pub fn global() -> Option<&'static Kasan> {
    KASAN.get()
}

/// Check an access against the global sanitizer (pass when uninitialized).
pub fn check_access(addr: u64, size: usize) -> KernelResult<()> {
    match KASAN.get() {
        Some(kasan) => kasan.check_access(addr, size),
        None => Ok(()),
    }
}
