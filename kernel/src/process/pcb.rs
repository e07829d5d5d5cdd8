//! Process control block

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::mm::AddressSpace;
use crate::signal::SignalQueue;

use super::accounting::ResourceUsage;
use super::rgroup::ResourceGroup;

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier. The core tracks only the main thread of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Lifecycle state of a process.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Being constructed; not yet schedulable.
    New = 0,
    /// Runnable, waiting for a CPU.
    Ready = 1,
    /// Currently executing.
    Running = 2,
    /// Waiting on an event.
    Sleeping = 3,
    /// Stopped by SIGSTOP/SIGTSTP until SIGCONT.
    Stopped = 4,
    /// Exited; waiting to be reaped by its parent.
    Zombie = 5,
}

impl ProcessState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::New,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Sleeping,
            4 => Self::Stopped,
            _ => Self::Zombie,
        }
    }
}

/// A process: one address space, one signal queue, one accounting record,
/// and the credentials syscalls check against.
pub struct Process {
    /// Process id.
    pub pid: ProcessId,
    /// Parent pid; updated when the process is reparented.
    ppid: AtomicU64,
    /// Command name.
    pub name: String,
    state: AtomicU32,
    /// Main thread id.
    pub main_thread: ThreadId,

    /// Real user id.
    uid: AtomicU32,
    /// Real group id.
    gid: AtomicU32,
    /// Effective user id; euid 0 passes privileged checks.
    euid: AtomicU32,

    exit_code: AtomicI32,

    /// The process's virtual address space.
    pub address_space: AddressSpace,
    /// The per-process signal queue.
    pub signals: SignalQueue,
    /// Resource usage counters.
    pub rusage: ResourceUsage,
    /// Resource group this process is charged against, if any.
    pub rgroup: Mutex<Option<Arc<ResourceGroup>>>,
    /// Children pids; the parent holds the strong references via the table.
    pub children: Mutex<Vec<ProcessId>>,

    /// Monotonic creation time, microseconds.
    pub start_time_us: u64,
}

impl Process {
    pub(super) fn new(
        pid: ProcessId,
        ppid: ProcessId,
        name: String,
        address_space: AddressSpace,
    ) -> Self {
        Self {
            pid,
            ppid: AtomicU64::new(ppid.0),
            name,
            state: AtomicU32::new(ProcessState::New as u32),
            main_thread: ThreadId(pid.0),
            uid: AtomicU32::new(0),
            gid: AtomicU32::new(0),
            euid: AtomicU32::new(0),
            exit_code: AtomicI32::new(0),
            address_space,
            signals: SignalQueue::new(),
            rusage: ResourceUsage::new(),
            rgroup: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            start_time_us: crate::time::monotonic_us(),
        }
    }

    /// Parent pid.
    pub fn ppid(&self) -> ProcessId {
        ProcessId(self.ppid.load(Ordering::Acquire))
    }

    /// Move the process under a new parent.
    pub fn set_ppid(&self, ppid: ProcessId) {
        self.ppid.store(ppid.0, Ordering::Release);
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        ProcessState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Transition to a new state.
    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Real uid.
    pub fn uid(&self) -> u32 {
        self.uid.load(Ordering::Acquire)
    }

    /// Real gid.
    pub fn gid(&self) -> u32 {
        self.gid.load(Ordering::Acquire)
    }

    /// Effective uid.
    pub fn euid(&self) -> u32 {
        self.euid.load(Ordering::Acquire)
    }

    /// Set real and effective uid together.
    pub fn set_uid(&self, uid: u32) {
        self.uid.store(uid, Ordering::Release);
        self.euid.store(uid, Ordering::Release);
    }

    /// Set only the effective uid.
    pub fn set_euid(&self, euid: u32) {
        self.euid.store(euid, Ordering::Release);
    }

    /// Set the real gid.
    pub fn set_gid(&self, gid: u32) {
        self.gid.store(gid, Ordering::Release);
    }

    /// Recorded exit code (valid once the process is a zombie).
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub(super) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    /// Whether the process has not yet exited.
    pub fn is_alive(&self) -> bool {
        self.state() != ProcessState::Zombie
    }

    /// Attach the process to a resource group, adjusting process counts.
    pub fn join_rgroup(&self, group: Arc<ResourceGroup>) {
        let mut slot = self.rgroup.lock();
        if let Some(old) = slot.take() {
            old.remove_process();
        }
        group.add_process();
        *slot = Some(group);
    }
}
