//! VFS synchronization primitives
//!
//! Inode generations, dentry cache state, the per-inode permission cache,
//! and the rename context that orders directory locks to avoid ABBA
//! deadlock. Reference counting comes from [`crate::sync::RefCount`] and
//! optimistic reads from [`crate::sync::SeqLock`].

use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, MutexGuard};

use crate::sync::{SeqLock, SeqWriteGuard};

/// Monotonic generation counter; bumped whenever cached state derived from
/// an inode must be invalidated.
pub struct InodeGeneration {
    generation: AtomicU64,
}

impl InodeGeneration {
    /// Start at generation zero.
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// The current generation.
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate: advance to a new generation and return it. Old
    /// generations are never current again.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether `seen` is still the current generation.
    pub fn is_current(&self, seen: u64) -> bool {
        self.current() == seen
    }
}

impl Default for InodeGeneration {
    fn default() -> Self {
        Self::new()
    }
}

/// Validity state of a cached dentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DentryState {
    /// Positive entry: the name resolves to an inode.
    Valid,
    /// Negative entry: the name is known not to exist.
    Negative,
    /// The entry must be re-looked-up.
    Invalid,
}

/// Cache-coherency state carried by a dentry.
#[derive(Debug, Clone, Copy)]
pub struct DentrySyncInfo {
    state: DentryState,
    generation: u64,
}

impl DentrySyncInfo {
    /// A fresh entry, valid at `generation`.
    pub fn new(state: DentryState, generation: u64) -> Self {
        Self { state, generation }
    }

    /// Current state.
    pub fn state(&self) -> DentryState {
        self.state
    }

    /// Generation the state was recorded at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the entry may be used against the parent's generation
    /// counter; entries from older generations are invalid.
    pub fn is_usable(&self, parent: &InodeGeneration) -> bool {
        self.state != DentryState::Invalid && parent.is_current(self.generation)
    }

    /// Mark invalid in place.
    pub fn invalidate(&mut self) {
        self.state = DentryState::Invalid;
    }

    /// Refresh to a new state at the parent's current generation.
    pub fn revalidate(&mut self, state: DentryState, parent: &InodeGeneration) {
        self.state = state;
        self.generation = parent.current();
    }
}

/// Memoized result of one permission check: `(uid, requested bits,
/// generation)` and the verdict. A generation bump or a different uid
/// forces a re-check.
pub struct PermissionCache {
    cached: Mutex<Option<(u32, u16, u64, bool)>>,
}

impl PermissionCache {
    /// An empty cache.
    pub const fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// The memoized verdict for `(uid, requested)` at `generation`, if the
    /// cached entry is still current.
    pub fn lookup(&self, uid: u32, requested: u16, generation: u64) -> Option<bool> {
        let cached = self.cached.lock();
        match *cached {
            Some((c_uid, c_req, c_gen, allowed))
                if c_uid == uid && c_req == requested && c_gen == generation =>
            {
                Some(allowed)
            }
            _ => None,
        }
    }

    /// Record a verdict.
    pub fn store(&self, uid: u32, requested: u16, generation: u64, allowed: bool) {
        *self.cached.lock() = Some((uid, requested, generation, allowed));
    }

    /// Drop the memoized entry.
    pub fn clear(&self) {
        *self.cached.lock() = None;
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-directory synchronization used by rename: a dentry-level lock plus a
/// sequence counter readers validate against.
pub struct DirectorySync {
    lock: Mutex<()>,
    /// Sequence-validated directory version.
    pub seq: SeqLock<u64>,
}

impl DirectorySync {
    /// Fresh directory state.
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            seq: SeqLock::new(0),
        }
    }
}

impl Default for DirectorySync {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard holding both parents of a rename. Dropping it ends the sequence
/// writes, then releases the directory locks (fields drop in order).
pub struct RenameGuard<'a> {
    _first_seq: SeqWriteGuard<'a, u64>,
    _second_seq: Option<SeqWriteGuard<'a, u64>>,
    _first_lock: MutexGuard<'a, ()>,
    _second_lock: Option<MutexGuard<'a, ()>>,
}

/// Lock ordering for cross-directory rename.
pub struct RenameContext;

impl RenameContext {
    /// Lock the two parent directories of a rename in ascending address
    /// order, then begin both sequence-lock writes. Renaming within one
    /// directory takes that directory once.
    pub fn lock_for_rename<'a>(
        source_parent: &'a DirectorySync,
        target_parent: &'a DirectorySync,
    ) -> RenameGuard<'a> {
        let src = source_parent as *const DirectorySync as usize;
        let tgt = target_parent as *const DirectorySync as usize;

        if src == tgt {
            let first_lock = source_parent.lock.lock();
            let mut first_seq = source_parent.seq.write_guard();
            *first_seq += 1;
            return RenameGuard {
                _first_lock: first_lock,
                _second_lock: None,
                _first_seq: first_seq,
                _second_seq: None,
            };
        }

        let (low, high) = if src < tgt {
            (source_parent, target_parent)
        } else {
            (target_parent, source_parent)
        };

        let first_lock = low.lock.lock();
        let second_lock = high.lock.lock();
        let mut first_seq = low.seq.write_guard();
        let mut second_seq = high.seq.write_guard();
        *first_seq += 1;
        *second_seq += 1;

        RenameGuard {
            _first_lock: first_lock,
            _second_lock: Some(second_lock),
            _first_seq: first_seq,
            _second_seq: Some(second_seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_generation_is_never_current_again() {
        let generation = InodeGeneration::new();
        let seen = generation.current();
        assert!(generation.is_current(seen));
        let new = generation.bump();
        assert!(!generation.is_current(seen));
        assert!(generation.is_current(new));
        generation.bump();
        assert!(!generation.is_current(new));
    }

    #[test]
    fn dentry_usability_follows_generation() {
        let parent = InodeGeneration::new();
        let mut dentry = DentrySyncInfo::new(DentryState::Valid, parent.current());
        assert!(dentry.is_usable(&parent));

        parent.bump();
        assert!(!dentry.is_usable(&parent));

        dentry.revalidate(DentryState::Negative, &parent);
        assert!(dentry.is_usable(&parent));
        assert_eq!(dentry.state(), DentryState::Negative);

        dentry.invalidate();
        assert!(!dentry.is_usable(&parent));
    }

    #[test]
    fn permission_cache_hits_only_exact_key() {
        let cache = PermissionCache::new();
        cache.store(1000, 0o4, 7, true);

        assert_eq!(cache.lookup(1000, 0o4, 7), Some(true));
        // Different uid, permission, or generation all miss.
        assert_eq!(cache.lookup(1001, 0o4, 7), None);
        assert_eq!(cache.lookup(1000, 0o2, 7), None);
        assert_eq!(cache.lookup(1000, 0o4, 8), None);

        cache.clear();
        assert_eq!(cache.lookup(1000, 0o4, 7), None);
    }

    #[test]
    fn rename_guard_bumps_both_sequences() {
        let a = DirectorySync::new();
        let b = DirectorySync::new();
        let seq_a = a.seq.sequence();
        let seq_b = b.seq.sequence();

        {
            let _guard = RenameContext::lock_for_rename(&a, &b);
            // Both sequences are odd while the rename is in flight.
            assert_eq!(a.seq.sequence() & 1, 1);
            assert_eq!(b.seq.sequence() & 1, 1);
        }

        assert_eq!(a.seq.sequence(), seq_a + 2);
        assert_eq!(b.seq.sequence(), seq_b + 2);
        assert_eq!(a.seq.read(), 1);
        assert_eq!(b.seq.read(), 1);
    }

    #[test]
    fn rename_lock_order_is_address_stable() {
        let a = DirectorySync::new();
        let b = DirectorySync::new();
        // Locking (a, b) then (b, a) sequentially must not deadlock because
        // both orders acquire in ascending address order.
        {
            let _g = RenameContext::lock_for_rename(&a, &b);
        }
        {
            let _g = RenameContext::lock_for_rename(&b, &a);
        }
    }

    #[test]
    fn same_directory_rename_locks_once() {
        let a = DirectorySync::new();
        {
            let _guard = RenameContext::lock_for_rename(&a, &a);
            assert_eq!(a.seq.sequence() & 1, 1);
        }
        assert_eq!(a.seq.sequence() & 1, 0);
    }
}
