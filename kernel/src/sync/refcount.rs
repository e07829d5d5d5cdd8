//! Resurrection-safe reference counters
//!
//! Used by the VFS for inode and dentry lifetimes. `try_acquire` refuses to
//! revive an object whose count already reached zero, and releasing below
//! zero is reported as a bug rather than wrapped.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{KernelResult, MemoryError};

/// Atomic reference counter.
pub struct RefCount {
    count: AtomicU64,
}

impl RefCount {
    /// Create a counter with the given initial value.
    pub const fn new(initial: u64) -> Self {
        Self {
            count: AtomicU64::new(initial),
        }
    }

    /// Increment the counter and return the new value.
    pub fn acquire(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the counter. Returns `true` when the count transitions from
    /// one to zero, meaning the caller is responsible for teardown. Releasing
    /// a counter that is already zero is an underflow bug and is reported.
    pub fn release(&self) -> KernelResult<bool> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(MemoryError::RefCountUnderflow.into());
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current == 1),
                Err(observed) => current = observed,
            }
        }
    }

    /// Increment the counter only if it is non-zero. Returns `false` if the
    /// object is already dead, preventing resurrection.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;

    #[test]
    fn acquire_release_balance() {
        let rc = RefCount::new(1);
        rc.acquire();
        rc.acquire();
        assert_eq!(rc.get(), 3);
        assert!(!rc.release().unwrap());
        assert!(!rc.release().unwrap());
        assert!(rc.release().unwrap());
        assert_eq!(rc.get(), 0);
    }

    #[test]
    fn release_at_zero_reports_underflow() {
        let rc = RefCount::new(0);
        assert_eq!(
            rc.release(),
            Err(KernelError::Memory(MemoryError::RefCountUnderflow))
        );
    }

    #[test]
    fn try_acquire_refuses_resurrection() {
        let rc = RefCount::new(1);
        assert!(rc.release().unwrap());
        assert!(!rc.try_acquire());
        assert_eq!(rc.get(), 0);

        let live = RefCount::new(2);
        assert!(live.try_acquire());
        assert_eq!(live.get(), 3);
    }
}
