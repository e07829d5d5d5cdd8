//! Access vector cache
//!
//! A fixed ring of recent access decisions behind a read/write lock. The
//! cache is read-mostly: lookups take the read side and bump hit/miss
//! counters; inserts overwrite slots round-robin.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use super::context::{AccessVector, Name32, ObjectClass};

/// Number of cached decisions.
pub const AVC_CAPACITY: usize = 256;

/// One cached decision.
#[derive(Debug, Clone, Copy)]
pub struct AvcEntry {
    /// Source domain.
    pub source: Name32,
    /// Target domain.
    pub target: Name32,
    /// Object class of the decision.
    pub class: ObjectClass,
    /// Access vector the policy allows for this triple.
    pub allowed: AccessVector,
}

/// The access vector cache.
pub struct Avc {
    entries: RwLock<[Option<AvcEntry>; AVC_CAPACITY]>,
    inserted: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Avc {
    /// An empty cache.
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new([None; AVC_CAPACITY]),
            inserted: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up the allowed vector for `(source, target, class)`.
    pub fn lookup(
        &self,
        source: Name32,
        target: Name32,
        class: ObjectClass,
    ) -> Option<AccessVector> {
        let entries = self.entries.read();
        for entry in entries.iter().flatten() {
            if entry.source == source && entry.target == target && entry.class == class {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.allowed);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cache a decision, overwriting the slot at `inserts % capacity`.
    pub fn insert(&self, entry: AvcEntry) {
        let slot = (self.inserted.fetch_add(1, Ordering::AcqRel) as usize) % AVC_CAPACITY;
        self.entries.write()[slot] = Some(entry);
    }

    /// (hits, misses) counters.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Drop every cached decision (policy reload).
    pub fn flush(&self) {
        let mut entries = self.entries.write();
        *entries = [None; AVC_CAPACITY];
        self.inserted.store(0, Ordering::Release);
    }
}

impl Default for Avc {
    fn default() -> Self {
        Self::new()
    }
}
