//! Resource groups and throttles
//!
//! Hierarchical memory charging with rollback, token-bucket I/O and network
//! throttles, and thread/memlock/real-time ceilings. Memory charges are
//! atomic across the ancestor chain: either every level observes the charge
//! or none does. Charging recurses upward without holding any child lock.

use alloc::sync::Arc;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::{KernelResult, QuotaError};

/// A node in the resource-group hierarchy.
pub struct ResourceGroup {
    /// Group id.
    pub id: u64,
    parent: Option<Arc<ResourceGroup>>,
    /// Relative CPU weight.
    pub cpu_shares: AtomicU64,
    /// CPU quota per scheduling period, nanoseconds (0 = unlimited).
    pub cpu_quota_ns: AtomicU64,
    /// Memory ceiling in bytes (0 = unlimited).
    memory_limit: AtomicU64,
    memory_usage: AtomicU64,
    /// Relative I/O weight.
    pub io_weight: AtomicU64,
    process_count: AtomicU64,
}

impl ResourceGroup {
    /// Create a root group.
    pub fn new_root(id: u64, memory_limit: u64) -> Arc<Self> {
        Arc::new(Self::build(id, None, memory_limit))
    }

    /// Create a child group under `parent`.
    pub fn new_child(id: u64, parent: &Arc<ResourceGroup>, memory_limit: u64) -> Arc<Self> {
        Arc::new(Self::build(id, Some(parent.clone()), memory_limit))
    }

    fn build(id: u64, parent: Option<Arc<ResourceGroup>>, memory_limit: u64) -> Self {
        Self {
            id,
            parent,
            cpu_shares: AtomicU64::new(1024),
            cpu_quota_ns: AtomicU64::new(0),
            memory_limit: AtomicU64::new(memory_limit),
            memory_usage: AtomicU64::new(0),
            io_weight: AtomicU64::new(100),
            process_count: AtomicU64::new(0),
        }
    }

    /// The parent group, if any.
    pub fn parent(&self) -> Option<&Arc<ResourceGroup>> {
        self.parent.as_ref()
    }

    /// Current memory charged against this group, bytes.
    pub fn memory_usage(&self) -> u64 {
        self.memory_usage.load(Ordering::Acquire)
    }

    /// Memory ceiling (0 = unlimited).
    pub fn memory_limit(&self) -> u64 {
        self.memory_limit.load(Ordering::Acquire)
    }

    /// Change the memory ceiling.
    pub fn set_memory_limit(&self, limit: u64) {
        self.memory_limit.store(limit, Ordering::Release);
    }

    /// Number of processes attached to this group.
    pub fn process_count(&self) -> u64 {
        self.process_count.load(Ordering::Acquire)
    }

    pub(super) fn add_process(&self) {
        self.process_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn remove_process(&self) {
        self.process_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Charge `bytes` against this group and every ancestor. If any level
    /// would exceed its limit, all increments made so far are rolled back
    /// and the error propagates; usage across the chain changes atomically.
    pub fn charge_memory(&self, bytes: u64) -> KernelResult<()> {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let limit = self.memory_limit.load(Ordering::Acquire);
        if limit > 0 && new_usage > limit {
            self.memory_usage.fetch_sub(bytes, Ordering::AcqRel);
            return Err(QuotaError::MemoryLimitExceeded.into());
        }
        if let Some(parent) = &self.parent {
            if let Err(e) = parent.charge_memory(bytes) {
                self.memory_usage.fetch_sub(bytes, Ordering::AcqRel);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Return `bytes` to this group and every ancestor.
    pub fn uncharge_memory(&self, bytes: u64) {
        self.memory_usage.fetch_sub(bytes, Ordering::AcqRel);
        if let Some(parent) = &self.parent {
            parent.uncharge_memory(bytes);
        }
    }
}

// ---------------------------------------------------------------------------
// Token-bucket throttles
// ---------------------------------------------------------------------------

struct ThrottleWindow {
    period_start_us: u64,
    bytes: u64,
    ops: u64,
}

/// Token-bucket I/O throttle limiting bytes and operations per period.
pub struct IoThrottle {
    bytes_per_period: u64,
    ops_per_period: u64,
    period_us: u64,
    window: Mutex<ThrottleWindow>,
}

impl IoThrottle {
    /// Limit to `bytes_per_period` bytes and `ops_per_period` operations per
    /// `period_us` microseconds. Zero means unlimited for that dimension.
    pub const fn new(bytes_per_period: u64, ops_per_period: u64, period_us: u64) -> Self {
        Self {
            bytes_per_period,
            ops_per_period,
            period_us,
            window: Mutex::new(ThrottleWindow {
                period_start_us: 0,
                bytes: 0,
                ops: 0,
            }),
        }
    }

    /// Account an I/O of `bytes` at time `now_us`. Allowed requests are
    /// charged to the current window; denied requests have no effect.
    pub fn check(&self, now_us: u64, bytes: u64) -> KernelResult<()> {
        let mut window = self.window.lock();
        if now_us.saturating_sub(window.period_start_us) >= self.period_us {
            window.period_start_us = now_us;
            window.bytes = 0;
            window.ops = 0;
        }
        if self.bytes_per_period > 0 && window.bytes + bytes > self.bytes_per_period {
            return Err(QuotaError::IoThrottled.into());
        }
        if self.ops_per_period > 0 && window.ops + 1 > self.ops_per_period {
            return Err(QuotaError::IoThrottled.into());
        }
        window.bytes += bytes;
        window.ops += 1;
        Ok(())
    }
}

/// Token-bucket network throttle limiting bytes per period.
pub struct NetworkThrottle {
    bytes_per_period: u64,
    period_us: u64,
    window: Mutex<ThrottleWindow>,
}

impl NetworkThrottle {
    /// Limit to `bytes_per_period` bytes per `period_us` microseconds.
    pub const fn new(bytes_per_period: u64, period_us: u64) -> Self {
        Self {
            bytes_per_period,
            period_us,
            window: Mutex::new(ThrottleWindow {
                period_start_us: 0,
                bytes: 0,
                ops: 0,
            }),
        }
    }

    /// Account `bytes` of traffic at time `now_us`.
    pub fn check(&self, now_us: u64, bytes: u64) -> KernelResult<()> {
        let mut window = self.window.lock();
        if now_us.saturating_sub(window.period_start_us) >= self.period_us {
            window.period_start_us = now_us;
            window.bytes = 0;
        }
        if self.bytes_per_period > 0 && window.bytes + bytes > self.bytes_per_period {
            return Err(QuotaError::NetworkThrottled.into());
        }
        window.bytes += bytes;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hard ceilings
// ---------------------------------------------------------------------------

/// Thread-creation ceilings, checked process first, then UID, then global.
pub struct ThreadLimit {
    /// Per-process thread ceiling.
    pub max_per_process: u64,
    /// Per-UID thread ceiling.
    pub max_per_uid: u64,
    /// System-wide thread ceiling.
    pub max_global: u64,
    global_count: AtomicU64,
}

impl ThreadLimit {
    /// Build a limit set with a zeroed global counter.
    pub const fn new(max_per_process: u64, max_per_uid: u64, max_global: u64) -> Self {
        Self {
            max_per_process,
            max_per_uid,
            max_global,
            global_count: AtomicU64::new(0),
        }
    }

    /// Approve one thread creation given the caller's current per-process
    /// and per-UID counts. The global counter is claimed on success.
    pub fn allow_thread_create(&self, process_threads: u64, uid_threads: u64) -> KernelResult<()> {
        if process_threads >= self.max_per_process {
            return Err(QuotaError::ProcessThreadLimitExceeded.into());
        }
        if uid_threads >= self.max_per_uid {
            return Err(QuotaError::UidThreadLimitExceeded.into());
        }
        let mut current = self.global_count.load(Ordering::Acquire);
        loop {
            if current >= self.max_global {
                return Err(QuotaError::GlobalThreadLimitExceeded.into());
            }
            match self.global_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(now) => current = now,
            }
        }
    }

    /// Release a global thread slot.
    pub fn on_thread_exit(&self) {
        self.global_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Current global thread count.
    pub fn global_count(&self) -> u64 {
        self.global_count.load(Ordering::Acquire)
    }
}

/// Locked-memory ceilings. CAP_IPC_LOCK bypasses the per-process ceiling;
/// the global ceiling always applies.
pub struct MemlockLimit {
    /// Per-process locked-byte ceiling.
    pub max_per_process: u64,
    /// System-wide locked-byte ceiling.
    pub max_global: u64,
    global_locked: AtomicU64,
}

impl MemlockLimit {
    /// Build a limit set with a zeroed global counter.
    pub const fn new(max_per_process: u64, max_global: u64) -> Self {
        Self {
            max_per_process,
            max_global,
            global_locked: AtomicU64::new(0),
        }
    }

    /// Approve locking `bytes` given the process's currently locked amount.
    pub fn lock(&self, bytes: u64, process_locked: u64, cap_ipc_lock: bool) -> KernelResult<()> {
        if !cap_ipc_lock && process_locked + bytes > self.max_per_process {
            return Err(QuotaError::MemlockLimitExceeded.into());
        }
        let mut current = self.global_locked.load(Ordering::Acquire);
        loop {
            if current + bytes > self.max_global {
                return Err(QuotaError::GlobalMemlockLimitExceeded.into());
            }
            match self.global_locked.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(now) => current = now,
            }
        }
    }

    /// Release `bytes` of locked memory.
    pub fn unlock(&self, bytes: u64) {
        let mut current = self.global_locked.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes);
            match self.global_locked.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(now) => current = now,
            }
        }
    }

    /// Currently locked bytes system-wide.
    pub fn global_locked(&self) -> u64 {
        self.global_locked.load(Ordering::Acquire)
    }
}

/// Real-time priority ceiling. CAP_SYS_NICE permits any priority.
pub struct RtLimit {
    /// Highest real-time priority unprivileged callers may request.
    pub max_rt_priority: u32,
}

impl RtLimit {
    /// Build a limit with the given unprivileged ceiling.
    pub const fn new(max_rt_priority: u32) -> Self {
        Self { max_rt_priority }
    }

    /// Approve a request for real-time priority `priority`.
    pub fn allow_rt_priority(&self, priority: u32, cap_sys_nice: bool) -> KernelResult<()> {
        if cap_sys_nice || priority <= self.max_rt_priority {
            Ok(())
        } else {
            Err(QuotaError::RtPriorityDenied.into())
        }
    }
}
