//! One-shot global initialization
//!
//! A `no_std` cell that can be written exactly once and read many times.
//! Globals that the original design kept as mutable singletons are carried as
//! `OnceLock` statics; initialization is one-shot and idempotent.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// A cell that can be initialized exactly once.
pub struct OnceLock<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: access to `value` is gated by the `state` machine; only the thread
// that wins the UNINIT -> INITIALIZING transition writes, and readers only
// observe the value after the Release store of READY.
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}
unsafe impl<T: Send> Send for OnceLock<T> {}

impl<T> OnceLock<T> {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Get the value if the cell has been initialized.
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY is only stored (with Release) after the value has
            // been fully written, and the value is never written again.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Initialize the cell. Returns `Err(value)` if it was already
    /// initialized (or an initialization is in flight on another core).
    pub fn set(&self, value: T) -> Result<(), T> {
        match self.state.compare_exchange(
            UNINIT,
            INITIALIZING,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // SAFETY: we won the transition, so no other thread touches
                // `value` until we publish READY.
                unsafe { (*self.value.get()).write(value) };
                self.state.store(READY, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(value),
        }
    }

    /// Get the value, initializing it with `f` if the cell is empty.
    pub fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &T {
        if let Some(v) = self.get() {
            return v;
        }
        // Ignore the result: losing the race means another thread completed
        // (or is completing) initialization.
        let _ = self.set(f());
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            core::hint::spin_loop();
        }
    }

    /// Whether the cell has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY guarantees the value was written; we have `&mut
            // self`, so no other reference exists.
            unsafe { (*self.value.get()).assume_init_drop() };
        }
    }
}
