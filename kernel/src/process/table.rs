//! Global process table
//!
//! Strong references to every live process, keyed by pid. Children are
//! reached through the table; a process stores only its parent's pid, never
//! a strong reference, so the parent/child graph stays acyclic.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use core::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use spin::RwLock;

use crate::error::{KernelResult, ProcessError};
use crate::mm::AddressSpace;

use super::pcb::{Process, ProcessId};

lazy_static! {
    static ref PROCESS_TABLE: RwLock<BTreeMap<ProcessId, Arc<Process>>> =
        RwLock::new(BTreeMap::new());
}

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

/// Pid of the process currently executing on this CPU (0 = none).
static CURRENT_PID: AtomicU64 = AtomicU64::new(0);

/// Allocate a fresh pid.
pub fn allocate_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

/// Create a process with a fresh address space and register it.
pub fn create_process(name: &str, parent: ProcessId) -> KernelResult<Arc<Process>> {
    let pid = allocate_pid();
    let space = AddressSpace::new()?;
    let process = Arc::new(Process::new(pid, parent, String::from(name), space));
    PROCESS_TABLE.write().insert(pid, process.clone());
    if let Some(parent) = lookup(parent) {
        parent.children.lock().push(pid);
    }
    log::debug!(target: "process", "created pid {} ({})", pid, name);
    Ok(process)
}

/// Register an already-built process (used by fork).
pub(super) fn insert(process: Arc<Process>) {
    PROCESS_TABLE.write().insert(process.pid, process);
}

/// Look up a process by pid.
pub fn lookup(pid: ProcessId) -> Option<Arc<Process>> {
    PROCESS_TABLE.read().get(&pid).cloned()
}

/// Drop the table's strong reference to `pid`. Returns the process if it
/// existed.
pub fn remove(pid: ProcessId) -> KernelResult<Arc<Process>> {
    PROCESS_TABLE
        .write()
        .remove(&pid)
        .ok_or_else(|| ProcessError::NoSuchProcess.into())
}

/// Number of registered processes.
pub fn count() -> usize {
    PROCESS_TABLE.read().len()
}

/// Run `f` for every registered process.
pub fn for_each(mut f: impl FnMut(&Arc<Process>)) {
    for process in PROCESS_TABLE.read().values() {
        f(process);
    }
}

/// The process currently executing on this CPU.
pub fn current_process() -> Option<Arc<Process>> {
    let pid = CURRENT_PID.load(Ordering::Acquire);
    if pid == 0 {
        return None;
    }
    lookup(ProcessId(pid))
}

/// Record which process is executing on this CPU.
pub fn set_current(pid: Option<ProcessId>) {
    CURRENT_PID.store(pid.map_or(0, |p| p.0), Ordering::Release);
}

#[cfg(test)]
pub(crate) mod test_guard {
    //! Serializes tests that switch the CURRENT pid.

    pub static CURRENT: std::sync::Mutex<()> = std::sync::Mutex::new(());

    pub fn lock() -> std::sync::MutexGuard<'static, ()> {
        CURRENT.lock().unwrap_or_else(|e| e.into_inner())
    }
}
