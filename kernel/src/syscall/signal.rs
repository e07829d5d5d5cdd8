//! Signal system calls
//!
//! `sys_kill`, `sys_sigaction`, `sys_sigprocmask`, and `sys_sigpending`,
//! operating on the current process. User-pointer marshalling happens at
//! the trap boundary through the checked-copy helpers; these entry points
//! take the already-validated values.

use crate::error::{KernelResult, ProcessError, SignalError};
use crate::process::{self, ProcessId};
use crate::signal::queue::{SigAction, SigInfo, SI_USER};
use crate::signal::{is_valid_signal, SigSet, NSIG};

/// `how` for sigprocmask: replace the mask.
pub const SIG_SETMASK: u32 = 0;
/// `how` for sigprocmask: add to the mask.
pub const SIG_BLOCK: u32 = 1;
/// `how` for sigprocmask: remove from the mask.
pub const SIG_UNBLOCK: u32 = 2;

/// Send signal `sig` to process `pid`. `sig == 0` probes for existence
/// without delivering anything.
pub fn sys_kill(pid: u64, sig: i32) -> KernelResult<()> {
    if sig < 0 || sig >= NSIG as i32 {
        return Err(SignalError::InvalidSignal.into());
    }
    let target = process::table::lookup(ProcessId(pid)).ok_or(ProcessError::NoSuchProcess)?;
    if sig == 0 {
        return Ok(());
    }

    let sender_pid = process::current_process().map_or(0, |p| p.pid.0);
    let info = SigInfo {
        signal: sig as u8,
        code: SI_USER,
        value: 0,
        sender_pid,
    };
    target.signals.queue(sig as u8, info)
}

/// Install a new disposition for `sig` (when `action` is given) and return
/// the previous one.
pub fn sys_sigaction(sig: u8, action: Option<SigAction>) -> KernelResult<SigAction> {
    if !is_valid_signal(sig) {
        return Err(SignalError::InvalidSignal.into());
    }
    let process = process::current_process().ok_or(ProcessError::NoProcess)?;
    match action {
        Some(action) => process.signals.set_action(sig, action),
        None => process.signals.get_action(sig),
    }
}

/// Adjust the blocked mask per `how`, returning the previous mask. With no
/// `set` the mask is only queried.
pub fn sys_sigprocmask(how: u32, set: Option<u32>) -> KernelResult<u32> {
    let process = process::current_process().ok_or(ProcessError::NoProcess)?;
    let old = process.signals.blocked().bits();

    if let Some(bits) = set {
        let mask = SigSet::from_bits(bits);
        match how {
            SIG_SETMASK => process.signals.set_blocked(mask),
            SIG_BLOCK => process.signals.block(mask),
            SIG_UNBLOCK => process.signals.unblock(mask),
            _ => return Err(ProcessError::InvalidArgument.into()),
        }
    }
    Ok(old)
}

/// The current pending set.
pub fn sys_sigpending() -> KernelResult<u32> {
    let process = process::current_process().ok_or(ProcessError::NoProcess)?;
    Ok(process.signals.pending().bits())
}
