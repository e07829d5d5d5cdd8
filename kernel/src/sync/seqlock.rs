//! Sequence locks
//!
//! Writer-serialized mutation with optimistic, lock-free reads. An odd
//! sequence number means a write is in flight; readers retry until they
//! observe the same even number before and after their read.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, MutexGuard};

/// A sequence lock protecting a value of type `T`.
pub struct SeqLock<T> {
    sequence: AtomicU64,
    writer: Mutex<()>,
    data: UnsafeCell<T>,
}

// SAFETY: writers are serialized by `writer`, and readers only trust data
// that `read_validate` confirms was not concurrently written.
unsafe impl<T: Send> Sync for SeqLock<T> {}
unsafe impl<T: Send> Send for SeqLock<T> {}

impl<T> SeqLock<T> {
    /// Create a new sequence lock.
    pub const fn new(value: T) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            writer: Mutex::new(()),
            data: UnsafeCell::new(value),
        }
    }

    /// Begin an optimistic read: spins until no write is in flight, then
    /// returns the (even) sequence number to validate against.
    pub fn read_begin(&self) -> u64 {
        loop {
            let seq = self.sequence.load(Ordering::Acquire);
            if seq & 1 == 0 {
                return seq;
            }
            core::hint::spin_loop();
        }
    }

    /// Validate an optimistic read begun at `seq`. Returns `true` if no
    /// write intervened and the read data may be trusted.
    pub fn read_validate(&self, seq: u64) -> bool {
        self.sequence.load(Ordering::Acquire) == seq
    }

    /// Read the value, retrying until a consistent snapshot is observed.
    pub fn read(&self) -> T
    where
        T: Copy,
    {
        loop {
            let seq = self.read_begin();
            // SAFETY: the snapshot is only returned if read_validate proves
            // no writer touched the data while we copied it.
            let value = unsafe { *self.data.get() };
            if self.read_validate(seq) {
                return value;
            }
        }
    }

    /// Acquire the writer side. The sequence becomes odd for the lifetime of
    /// the guard and even again when it drops.
    pub fn write_guard(&self) -> SeqWriteGuard<'_, T> {
        let guard = self.writer.lock();
        self.sequence.fetch_add(1, Ordering::AcqRel);
        SeqWriteGuard {
            lock: self,
            _writer: guard,
        }
    }

    /// Run `f` with mutable access to the value under the writer lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.write_guard();
        f(&mut guard)
    }

    /// Current raw sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

/// Write-side guard for a [`SeqLock`].
pub struct SeqWriteGuard<'a, T> {
    lock: &'a SeqLock<T>,
    _writer: MutexGuard<'a, ()>,
}

impl<T> core::ops::Deref for SeqWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the writer mutex is held, so no other writer exists;
        // readers never dereference, they copy and validate.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for SeqWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above; exclusive writer access is guaranteed.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SeqWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.sequence.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sees_written_value() {
        let lock = SeqLock::new(10u32);
        lock.write(|v| *v = 42);
        assert_eq!(lock.read(), 42);
    }

    #[test]
    fn sequence_is_odd_during_write() {
        let lock = SeqLock::new(0u32);
        assert_eq!(lock.sequence() & 1, 0);
        {
            let mut guard = lock.write_guard();
            *guard = 1;
            assert_eq!(lock.sequence() & 1, 1);
        }
        assert_eq!(lock.sequence() & 1, 0);
    }

    #[test]
    fn stale_read_fails_validation() {
        let lock = SeqLock::new(0u32);
        let seq = lock.read_begin();
        lock.write(|v| *v = 1);
        assert!(!lock.read_validate(seq));
        let seq = lock.read_begin();
        assert!(lock.read_validate(seq));
    }
}
