//! Synchronization primitives
//!
//! Spinlocks, read/write locks, and mutexes come from the `spin` crate; this
//! module adds the pieces the kernel needs on top of them: one-shot global
//! initialization, optimistic sequence locks, and resurrection-safe reference
//! counters.

pub mod once_lock;
pub mod refcount;
pub mod seqlock;

pub use once_lock::OnceLock;
pub use refcount::RefCount;
pub use seqlock::{SeqLock, SeqWriteGuard};
