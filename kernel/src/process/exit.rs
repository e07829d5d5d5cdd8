//! Process exit and reaping
//!
//! Exit marks the process a zombie, records its exit code, writes an
//! accounting record, reparents its children to init, and notifies the
//! parent with SIGCHLD. The table entry survives until the parent reaps it.

use alloc::sync::Arc;

use crate::error::{KernelResult, ProcessError};
use crate::signal::queue::{CLD_CONTINUED, CLD_EXITED, CLD_STOPPED};
use crate::signal::{exit_code_for_signal, SigInfo, SIGCHLD};

use super::accounting::{self, AccountingRecord};
use super::pcb::{Process, ProcessId, ProcessState};
use super::{table, INIT_PID};

/// Terminate `process` with `exit_code`.
pub fn exit_process(process: &Arc<Process>, exit_code: i32) {
    process.set_exit_code(exit_code);
    process.set_state(ProcessState::Zombie);

    if let Some(group) = process.rgroup.lock().take() {
        group.remove_process();
    }

    accounting::log_exit(AccountingRecord {
        pid: process.pid.0,
        uid: process.uid(),
        exit_code,
        start_time_us: process.start_time_us,
        end_time_us: crate::time::monotonic_us(),
        rusage: process.rusage.snapshot(),
    });

    reparent_children(process);
    notify_parent(process, CLD_EXITED, exit_code as u64);

    log::debug!(target: "process", "pid {} exited with {}", process.pid, exit_code);
}

/// Terminate `process` because of fatal signal `sig`; the exit code follows
/// the `128 + signal` convention.
pub fn exit_on_signal(process: &Arc<Process>, sig: u8) {
    exit_process(process, exit_code_for_signal(sig));
}

/// Record a stop and tell the parent (SIGCHLD with CLD_STOPPED).
pub fn stop_process(process: &Arc<Process>) {
    process.set_state(ProcessState::Stopped);
    notify_parent(process, CLD_STOPPED, 0);
}

/// Resume a stopped process and tell the parent (SIGCHLD with
/// CLD_CONTINUED).
pub fn continue_process(process: &Arc<Process>) {
    if process.state() == ProcessState::Stopped {
        process.set_state(ProcessState::Ready);
        notify_parent(process, CLD_CONTINUED, 0);
    }
}

/// Reap a zombie child of `parent`: drops the table entry and returns the
/// child's exit code.
pub fn reap_zombie(parent: &Arc<Process>, child_pid: ProcessId) -> KernelResult<(ProcessId, i32)> {
    let child = table::lookup(child_pid).ok_or(ProcessError::NoSuchProcess)?;
    if child.ppid() != parent.pid || child.state() != ProcessState::Zombie {
        return Err(ProcessError::NoSuchProcess.into());
    }
    parent.children.lock().retain(|&pid| pid != child_pid);
    table::remove(child_pid)?;
    Ok((child_pid, child.exit_code()))
}

fn reparent_children(process: &Arc<Process>) {
    let children = core::mem::take(&mut *process.children.lock());
    if children.is_empty() {
        return;
    }
    let init = table::lookup(INIT_PID);
    for pid in children {
        if let Some(child) = table::lookup(pid) {
            child.set_ppid(INIT_PID);
            if let Some(init) = &init {
                init.children.lock().push(pid);
            }
        }
    }
}

fn notify_parent(child: &Arc<Process>, code: i32, value: u64) {
    let Some(parent) = table::lookup(child.ppid()) else {
        return;
    };
    let info = SigInfo {
        signal: SIGCHLD,
        code,
        value,
        sender_pid: child.pid.0,
    };
    parent.signals.queue(SIGCHLD, info).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_support::init_test_arena;
    use crate::process::fork::fork_process;
    use crate::process::table::create_process;

    #[test]
    fn exit_notifies_parent_with_sigchld() {
        init_test_arena();
        let parent = create_process("exit-parent", INIT_PID).unwrap();
        let child = fork_process(&parent).unwrap();

        exit_process(&child, 3);
        assert_eq!(child.state(), ProcessState::Zombie);
        assert_eq!(child.exit_code(), 3);

        let info = parent.signals.dequeue().unwrap();
        assert_eq!(info.signal, SIGCHLD);
        assert_eq!(info.code, CLD_EXITED);
        assert_eq!(info.value, 3);
        assert_eq!(info.sender_pid, child.pid.0);

        let (pid, code) = reap_zombie(&parent, child.pid).unwrap();
        assert_eq!(pid, child.pid);
        assert_eq!(code, 3);
        assert!(table::lookup(pid).is_none());
    }

    #[test]
    fn signal_death_uses_128_plus_sig() {
        init_test_arena();
        let parent = create_process("kill-parent", INIT_PID).unwrap();
        let child = fork_process(&parent).unwrap();
        exit_on_signal(&child, crate::signal::SIGTERM);
        assert_eq!(child.exit_code(), 128 + 15);
    }

    #[test]
    fn stop_and_continue_notify_parent() {
        init_test_arena();
        let parent = create_process("stop-parent", INIT_PID).unwrap();
        let child = fork_process(&parent).unwrap();

        stop_process(&child);
        assert_eq!(child.state(), ProcessState::Stopped);
        assert_eq!(parent.signals.dequeue().unwrap().code, CLD_STOPPED);

        continue_process(&child);
        assert_eq!(child.state(), ProcessState::Ready);
        assert_eq!(parent.signals.dequeue().unwrap().code, CLD_CONTINUED);
    }

    #[test]
    fn orphans_are_reparented_to_init() {
        init_test_arena();
        let parent = create_process("orphan-parent", INIT_PID).unwrap();
        let child = fork_process(&parent).unwrap();

        exit_process(&parent, 0);
        assert_eq!(child.ppid(), INIT_PID);
        assert!(parent.children.lock().is_empty());
    }

    #[test]
    fn reap_rejects_non_children() {
        init_test_arena();
        let a = create_process("reap-a", INIT_PID).unwrap();
        let b = create_process("reap-b", INIT_PID).unwrap();
        assert_eq!(
            reap_zombie(&a, b.pid),
            Err(crate::error::KernelError::Process(
                ProcessError::NoSuchProcess
            ))
        );
    }
}
