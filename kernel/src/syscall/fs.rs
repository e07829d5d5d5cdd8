//! Filesystem system calls
//!
//! The core surfaces `flock`; the rest of the file API lives outside this
//! tree.

use crate::error::{KernelResult, ProcessError};
use crate::fs::flock::{LockMode, LockType, FILE_LOCKS};
use crate::process;

/// Apply or remove a lock on the file identified by inode `ino` for the
/// current process.
pub fn sys_flock(ino: u64, lock_type: i32, mode: i32) -> KernelResult<()> {
    let lock_type = match lock_type {
        0 => LockType::Unlock,
        1 => LockType::Shared,
        2 => LockType::Exclusive,
        _ => return Err(ProcessError::InvalidArgument.into()),
    };
    let mode = match mode {
        0 => LockMode::Advisory,
        1 => LockMode::Mandatory,
        _ => return Err(ProcessError::InvalidArgument.into()),
    };
    let process = process::current_process().ok_or(ProcessError::NoProcess)?;
    FILE_LOCKS.flock(ino, lock_type, mode, process.pid.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::mm::test_support::init_test_arena;
    use crate::process::table::{create_process, test_guard};
    use crate::process::{set_current, INIT_PID};

    #[test]
    fn flock_requires_a_current_process() {
        init_test_arena();
        let _current = test_guard::lock();
        set_current(None);
        assert_eq!(
            sys_flock(10, 1, 0),
            Err(KernelError::Process(ProcessError::NoProcess))
        );

        let process = create_process("flock-test", INIT_PID).unwrap();
        set_current(Some(process.pid));
        sys_flock(10, 1, 0).unwrap();
        sys_flock(10, 0, 0).unwrap();

        assert_eq!(
            sys_flock(10, 9, 0),
            Err(KernelError::Process(ProcessError::InvalidArgument))
        );
        set_current(None);
    }
}
