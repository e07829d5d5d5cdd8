//! Physical-page reference counts
//!
//! One atomic counter per tracked physical frame. A frame enters the table
//! when a mapping first references it and the count follows the number of
//! page-table references while the frame is shared. Copy-on-write resolution
//! for a sole owner drops the count to zero while the mapping stays live;
//! teardown treats a zero count as exclusively owned.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::RwLock;

use crate::error::{KernelResult, MemoryError};

use super::FrameNumber;

static TABLE: RwLock<BTreeMap<u64, AtomicU32>> = RwLock::new(BTreeMap::new());

/// Set the reference count of a frame, creating its slot if needed.
pub fn set(frame: FrameNumber, count: u32) {
    let table = TABLE.read();
    if let Some(slot) = table.get(&frame.as_u64()) {
        slot.store(count, Ordering::Release);
        return;
    }
    drop(table);
    TABLE
        .write()
        .insert(frame.as_u64(), AtomicU32::new(count));
}

/// Current reference count of a frame. Untracked frames report zero.
pub fn get(frame: FrameNumber) -> u32 {
    TABLE
        .read()
        .get(&frame.as_u64())
        .map(|slot| slot.load(Ordering::Acquire))
        .unwrap_or(0)
}

/// Increment the reference count of a frame and return the new value. A
/// previously untracked frame starts counting from zero.
pub fn acquire(frame: FrameNumber) -> u32 {
    {
        let table = TABLE.read();
        if let Some(slot) = table.get(&frame.as_u64()) {
            return slot.fetch_add(1, Ordering::AcqRel) + 1;
        }
    }
    let mut table = TABLE.write();
    // Re-check: another core may have inserted between the two locks.
    if let Some(slot) = table.get(&frame.as_u64()) {
        return slot.fetch_add(1, Ordering::AcqRel) + 1;
    }
    table.insert(frame.as_u64(), AtomicU32::new(1));
    1
}

/// Decrement the reference count of a frame and return the new value.
/// Underflow is a bug in the caller and is reported, not wrapped.
pub fn release(frame: FrameNumber) -> KernelResult<u32> {
    let table = TABLE.read();
    let slot = table
        .get(&frame.as_u64())
        .ok_or(MemoryError::RefCountUnderflow)?;
    let mut current = slot.load(Ordering::Acquire);
    loop {
        if current == 0 {
            return Err(MemoryError::RefCountUnderflow.into());
        }
        match slot.compare_exchange_weak(
            current,
            current - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return Ok(current - 1),
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;

    fn frame(n: u64) -> FrameNumber {
        // Frame numbers in the test range below never collide with the
        // arena-backed frames other tests use.
        FrameNumber::new(0xDEAD_0000 + n)
    }

    #[test]
    fn counter_tracks_acquire_release_balance() {
        let f = frame(1);
        assert_eq!(get(f), 0);
        assert_eq!(acquire(f), 1);
        assert_eq!(acquire(f), 2);
        assert_eq!(acquire(f), 3);
        assert_eq!(release(f).unwrap(), 2);
        assert_eq!(release(f).unwrap(), 1);
        assert_eq!(release(f).unwrap(), 0);
        assert_eq!(get(f), 0);
    }

    #[test]
    fn release_below_zero_is_reported() {
        let f = frame(2);
        assert_eq!(
            release(f),
            Err(KernelError::Memory(MemoryError::RefCountUnderflow))
        );
        acquire(f);
        release(f).unwrap();
        assert_eq!(
            release(f),
            Err(KernelError::Memory(MemoryError::RefCountUnderflow))
        );
    }

    #[test]
    fn set_overrides_count() {
        let f = frame(3);
        set(f, 5);
        assert_eq!(get(f), 5);
        assert_eq!(release(f).unwrap(), 4);
    }
}
