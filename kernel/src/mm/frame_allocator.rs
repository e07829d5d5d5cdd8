//! Physical frame allocator
//!
//! A bitmap allocator over the usable memory regions reported at boot. Every
//! mapping operation in the kernel is backed by 4 KiB frames handed out here;
//! frames return to the bitmap when the last mapping drops them.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelResult, MemoryError};

use super::{FrameNumber, PhysicalAddress, PAGE_SIZE};

/// A contiguous region of usable physical memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    start: PhysicalAddress,
    frames: usize,
}

impl MemoryRegion {
    /// Describe a region starting at `start` spanning `frames` frames.
    /// `start` must be frame-aligned.
    pub const fn new(start: PhysicalAddress, frames: usize) -> Self {
        Self { start, frames }
    }

    /// First frame of the region.
    pub const fn start_frame(&self) -> FrameNumber {
        FrameNumber::containing(self.start)
    }

    /// Number of frames in the region.
    pub const fn frame_count(&self) -> usize {
        self.frames
    }
}

/// Allocator statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAllocatorStats {
    /// Frames managed across all regions.
    pub total_frames: usize,
    /// Frames currently free.
    pub free_frames: usize,
}

struct Region {
    start_frame: u64,
    frames: usize,
    /// One bit per frame; set = allocated.
    bitmap: Vec<u64>,
    free: usize,
    /// Rotating search hint to avoid rescanning the low bitmap words.
    next_hint: usize,
}

impl Region {
    fn new(region: MemoryRegion) -> Self {
        let words = region.frames.div_ceil(64);
        let mut bitmap = Vec::new();
        bitmap.resize(words, 0u64);
        Self {
            start_frame: region.start_frame().as_u64(),
            frames: region.frames,
            bitmap,
            free: region.frames,
            next_hint: 0,
        }
    }

    fn contains(&self, frame: FrameNumber) -> bool {
        let n = frame.as_u64();
        n >= self.start_frame && n < self.start_frame + self.frames as u64
    }

    fn allocate(&mut self) -> Option<FrameNumber> {
        if self.free == 0 {
            return None;
        }
        let words = self.bitmap.len();
        for i in 0..words {
            let word_index = (self.next_hint + i) % words;
            let word = self.bitmap[word_index];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let index = word_index * 64 + bit;
            if index >= self.frames {
                continue;
            }
            self.bitmap[word_index] = word | (1 << bit);
            self.free -= 1;
            self.next_hint = word_index;
            return Some(FrameNumber::new(self.start_frame + index as u64));
        }
        None
    }

    fn free_frame(&mut self, frame: FrameNumber) -> KernelResult<()> {
        let index = (frame.as_u64() - self.start_frame) as usize;
        let word = index / 64;
        let bit = index % 64;
        if self.bitmap[word] & (1 << bit) == 0 {
            return Err(MemoryError::InvalidPhysicalAddress.into());
        }
        self.bitmap[word] &= !(1 << bit);
        self.free += 1;
        self.next_hint = word;
        Ok(())
    }
}

#[derive(Default)]
struct FrameAllocator {
    regions: Vec<Region>,
}

static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator {
    regions: Vec::new(),
});

/// Register a usable physical region with the allocator. Called at boot for
/// every usable range in the memory map.
pub fn add_region(region: MemoryRegion) {
    assert!(region.start.is_aligned(), "region start must be frame-aligned");
    FRAME_ALLOCATOR.lock().regions.push(Region::new(region));
}

/// Allocate one 4 KiB frame.
pub fn allocate_frame() -> KernelResult<FrameNumber> {
    let mut alloc = FRAME_ALLOCATOR.lock();
    if alloc.regions.is_empty() {
        return Err(MemoryError::NoPageAllocator.into());
    }
    for region in alloc.regions.iter_mut() {
        if let Some(frame) = region.allocate() {
            return Ok(frame);
        }
    }
    Err(MemoryError::OutOfMemory.into())
}

/// Allocate one frame with its contents cleared.
pub fn allocate_zeroed_frame() -> KernelResult<FrameNumber> {
    let frame = allocate_frame()?;
    let ptr = super::phys_to_virt(frame.base());
    // SAFETY: the frame was just handed out by the allocator, so the
    // kernel-visible alias covers PAGE_SIZE writable bytes nothing else owns.
    unsafe { core::ptr::write_bytes(ptr, 0, PAGE_SIZE) };
    Ok(frame)
}

/// Return a frame to the allocator. Freeing a frame that is not currently
/// allocated, or that no region contains, is an error.
pub fn free_frame(frame: FrameNumber) -> KernelResult<()> {
    let mut alloc = FRAME_ALLOCATOR.lock();
    for region in alloc.regions.iter_mut() {
        if region.contains(frame) {
            return region.free_frame(frame);
        }
    }
    Err(MemoryError::PhysicalAddressOutOfRange.into())
}

/// Snapshot of total/free frame counts.
pub fn stats() -> FrameAllocatorStats {
    let alloc = FRAME_ALLOCATOR.lock();
    let mut stats = FrameAllocatorStats {
        total_frames: 0,
        free_frames: 0,
    };
    for region in alloc.regions.iter() {
        stats.total_frames += region.frames;
        stats.free_frames += region.free;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_support::init_test_arena;

    fn test_region() -> Region {
        Region::new(MemoryRegion::new(PhysicalAddress::new(0x10_0000), 130))
    }

    #[test]
    fn region_hands_out_every_frame_once() {
        let mut region = test_region();
        let mut seen = alloc::collections::BTreeSet::new();
        for _ in 0..130 {
            assert!(seen.insert(region.allocate().unwrap()));
        }
        assert!(region.allocate().is_none());
        assert_eq!(region.free, 0);
    }

    #[test]
    fn region_double_free_is_rejected() {
        let mut region = test_region();
        let frame = region.allocate().unwrap();
        region.free_frame(frame).unwrap();
        assert_eq!(
            region.free_frame(frame),
            Err(MemoryError::InvalidPhysicalAddress.into())
        );
    }

    #[test]
    fn region_free_makes_frame_reusable() {
        let mut region = test_region();
        let first = region.allocate().unwrap();
        region.free_frame(first).unwrap();
        let mut seen = alloc::vec::Vec::new();
        for _ in 0..130 {
            seen.push(region.allocate().unwrap());
        }
        assert!(seen.contains(&first));
    }

    #[test]
    fn global_allocates_distinct_frames() {
        init_test_arena();
        let a = allocate_frame().unwrap();
        let b = allocate_frame().unwrap();
        assert_ne!(a, b);
        free_frame(a).unwrap();
        free_frame(b).unwrap();
    }

    #[test]
    fn foreign_frame_is_rejected() {
        init_test_arena();
        assert_eq!(
            free_frame(FrameNumber::new(3)),
            Err(MemoryError::PhysicalAddressOutOfRange.into())
        );
    }

    #[test]
    fn zeroed_frames_are_zero() {
        init_test_arena();
        let frame = allocate_zeroed_frame().unwrap();
        let ptr = crate::mm::phys_to_virt(frame.base());
        // SAFETY: frame is owned by this test until freed below.
        let all_zero = unsafe { (0..PAGE_SIZE).all(|i| *ptr.add(i) == 0) };
        assert!(all_zero);
        free_frame(frame).unwrap();
    }
}
