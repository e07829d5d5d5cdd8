//! File locks
//!
//! An advisory/mandatory lock table keyed by inode number. Conflicts never
//! block: the request fails with `LockConflict`, a waiter count is bumped
//! for observability, and the caller decides between retrying and EAGAIN.
//! Unlocking a lock the table never saw is silently tolerated.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelResult, LockError};

/// Maximum locks recorded per file.
pub const MAX_LOCKS_PER_FILE: usize = 8;

/// Maximum files with live locks.
pub const MAX_LOCKED_FILES: usize = 64;

/// Lock operation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Release the caller's lock.
    Unlock = 0,
    /// Shared (read) lock.
    Shared = 1,
    /// Exclusive (write) lock.
    Exclusive = 2,
}

/// Whether the lock is enforced by the kernel or only by convention.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Cooperating processes honor the lock voluntarily.
    Advisory = 0,
    /// The kernel refuses conflicting I/O.
    Mandatory = 1,
}

#[derive(Debug, Clone, Copy)]
struct FileLock {
    owner_pid: u64,
    lock_type: LockType,
    #[allow(dead_code)]
    mode: LockMode,
}

struct FileLockState {
    locks: Vec<FileLock>,
    /// Conflicts observed; nobody actually sleeps on these.
    waiters: u64,
}

/// The lock table.
pub struct FileLockTable {
    files: Mutex<BTreeMap<u64, FileLockState>>,
}

impl FileLockTable {
    /// An empty table.
    pub const fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Apply a lock operation on inode `ino` for process `pid`.
    pub fn flock(
        &self,
        ino: u64,
        lock_type: LockType,
        mode: LockMode,
        pid: u64,
    ) -> KernelResult<()> {
        let mut files = self.files.lock();

        if lock_type == LockType::Unlock {
            if let Some(state) = files.get_mut(&ino) {
                state.locks.retain(|l| l.owner_pid != pid);
                if state.locks.is_empty() {
                    files.remove(&ino);
                }
            }
            // An unlock the table never saw is not an error.
            return Ok(());
        }

        if !files.contains_key(&ino) && files.len() >= MAX_LOCKED_FILES {
            return Err(LockError::TooManyLockedFiles.into());
        }
        let state = files.entry(ino).or_insert_with(|| FileLockState {
            locks: Vec::new(),
            waiters: 0,
        });

        let conflict = state.locks.iter().any(|held| {
            held.owner_pid != pid
                && (lock_type == LockType::Exclusive || held.lock_type == LockType::Exclusive)
        });
        if conflict {
            state.waiters += 1;
            return Err(LockError::LockConflict.into());
        }

        // Re-locking upgrades or downgrades the caller's existing lock.
        if let Some(own) = state.locks.iter_mut().find(|l| l.owner_pid == pid) {
            own.lock_type = lock_type;
            return Ok(());
        }
        if state.locks.len() >= MAX_LOCKS_PER_FILE {
            return Err(LockError::TooManyLocks.into());
        }
        state.locks.push(FileLock {
            owner_pid: pid,
            lock_type,
            mode,
        });
        Ok(())
    }

    /// Number of locks currently held on `ino`.
    pub fn lock_count(&self, ino: u64) -> usize {
        self.files
            .lock()
            .get(&ino)
            .map(|s| s.locks.len())
            .unwrap_or(0)
    }

    /// Conflicts recorded against `ino` so far.
    pub fn waiter_count(&self, ino: u64) -> u64 {
        self.files
            .lock()
            .get(&ino)
            .map(|s| s.waiters)
            .unwrap_or(0)
    }

    /// Release every lock `pid` holds (process exit path).
    pub fn release_all(&self, pid: u64) {
        let mut files = self.files.lock();
        files.retain(|_, state| {
            state.locks.retain(|l| l.owner_pid != pid);
            !state.locks.is_empty()
        });
    }
}

impl Default for FileLockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The system-wide lock table.
pub static FILE_LOCKS: FileLockTable = FileLockTable::new();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;

    #[test]
    fn shared_locks_coexist_exclusive_conflicts() {
        let table = FileLockTable::new();
        table.flock(1, LockType::Shared, LockMode::Advisory, 100).unwrap();
        table.flock(1, LockType::Shared, LockMode::Advisory, 101).unwrap();
        assert_eq!(table.lock_count(1), 2);

        assert_eq!(
            table.flock(1, LockType::Exclusive, LockMode::Advisory, 102),
            Err(KernelError::Lock(LockError::LockConflict))
        );
        assert_eq!(table.waiter_count(1), 1);
    }

    #[test]
    fn exclusive_blocks_shared() {
        let table = FileLockTable::new();
        table
            .flock(2, LockType::Exclusive, LockMode::Mandatory, 100)
            .unwrap();
        assert_eq!(
            table.flock(2, LockType::Shared, LockMode::Advisory, 101),
            Err(KernelError::Lock(LockError::LockConflict))
        );
    }

    #[test]
    fn owner_may_convert_own_lock() {
        let table = FileLockTable::new();
        table.flock(3, LockType::Shared, LockMode::Advisory, 100).unwrap();
        table
            .flock(3, LockType::Exclusive, LockMode::Advisory, 100)
            .unwrap();
        assert_eq!(table.lock_count(3), 1);
    }

    #[test]
    fn unknown_unlock_is_tolerated() {
        let table = FileLockTable::new();
        table.flock(4, LockType::Unlock, LockMode::Advisory, 100).unwrap();
        assert_eq!(table.lock_count(4), 0);
    }

    #[test]
    fn unlock_releases_and_conflict_clears() {
        let table = FileLockTable::new();
        table
            .flock(5, LockType::Exclusive, LockMode::Advisory, 100)
            .unwrap();
        assert!(table.flock(5, LockType::Shared, LockMode::Advisory, 101).is_err());

        table.flock(5, LockType::Unlock, LockMode::Advisory, 100).unwrap();
        table.flock(5, LockType::Shared, LockMode::Advisory, 101).unwrap();
    }

    #[test]
    fn per_file_lock_list_is_bounded() {
        let table = FileLockTable::new();
        for pid in 0..MAX_LOCKS_PER_FILE as u64 {
            table.flock(6, LockType::Shared, LockMode::Advisory, pid).unwrap();
        }
        assert_eq!(
            table.flock(6, LockType::Shared, LockMode::Advisory, 999),
            Err(KernelError::Lock(LockError::TooManyLocks))
        );
    }

    #[test]
    fn global_file_table_is_bounded() {
        let table = FileLockTable::new();
        for ino in 0..MAX_LOCKED_FILES as u64 {
            table.flock(ino, LockType::Shared, LockMode::Advisory, 1).unwrap();
        }
        assert_eq!(
            table.flock(9999, LockType::Shared, LockMode::Advisory, 1),
            Err(KernelError::Lock(LockError::TooManyLockedFiles))
        );
    }

    #[test]
    fn release_all_drops_a_process_locks() {
        let table = FileLockTable::new();
        table.flock(7, LockType::Shared, LockMode::Advisory, 100).unwrap();
        table.flock(8, LockType::Exclusive, LockMode::Advisory, 100).unwrap();
        table.flock(7, LockType::Shared, LockMode::Advisory, 101).unwrap();

        table.release_all(100);
        assert_eq!(table.lock_count(7), 1);
        assert_eq!(table.lock_count(8), 0);
    }
}
