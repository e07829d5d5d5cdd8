//! Process accounting
//!
//! Per-process [`ResourceUsage`] counters, the per-UID quota table, and the
//! fixed-size ring of exit records. Counters use relaxed read-modify-write;
//! `update_max_rss` is a linearizable compare-and-swap loop.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::error::{KernelResult, QuotaError};

/// UIDs at or above this bound are not subject to quotas.
pub const MAX_UIDS: u32 = 65_536;

/// Capacity of the exit-record ring.
pub const ACCOUNTING_LOG_CAPACITY: usize = 1024;

/// Per-process resource usage counters.
pub struct ResourceUsage {
    utime_us: AtomicU64,
    stime_us: AtomicU64,
    maxrss: AtomicU64,
    minflt: AtomicU64,
    majflt: AtomicU64,
    inblock: AtomicU64,
    oublock: AtomicU64,
    nvcsw: AtomicU64,
    nivcsw: AtomicU64,
}

/// A point-in-time copy of a [`ResourceUsage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RusageSnapshot {
    /// User CPU time, microseconds.
    pub utime_us: u64,
    /// System CPU time, microseconds.
    pub stime_us: u64,
    /// High-water resident set size, bytes.
    pub maxrss: u64,
    /// Minor page faults.
    pub minflt: u64,
    /// Major page faults.
    pub majflt: u64,
    /// Blocks read.
    pub inblock: u64,
    /// Blocks written.
    pub oublock: u64,
    /// Voluntary context switches.
    pub nvcsw: u64,
    /// Involuntary context switches.
    pub nivcsw: u64,
}

impl ResourceUsage {
    /// All-zero counters.
    pub const fn new() -> Self {
        Self {
            utime_us: AtomicU64::new(0),
            stime_us: AtomicU64::new(0),
            maxrss: AtomicU64::new(0),
            minflt: AtomicU64::new(0),
            majflt: AtomicU64::new(0),
            inblock: AtomicU64::new(0),
            oublock: AtomicU64::new(0),
            nvcsw: AtomicU64::new(0),
            nivcsw: AtomicU64::new(0),
        }
    }

    /// Add user CPU time.
    pub fn add_utime(&self, us: u64) {
        self.utime_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Add system CPU time.
    pub fn add_stime(&self, us: u64) {
        self.stime_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Count a minor page fault.
    pub fn record_minor_fault(&self) {
        self.minflt.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a major page fault.
    pub fn record_major_fault(&self) {
        self.majflt.fetch_add(1, Ordering::Relaxed);
    }

    /// Count blocks read from storage.
    pub fn record_blocks_in(&self, blocks: u64) {
        self.inblock.fetch_add(blocks, Ordering::Relaxed);
    }

    /// Count blocks written to storage.
    pub fn record_blocks_out(&self, blocks: u64) {
        self.oublock.fetch_add(blocks, Ordering::Relaxed);
    }

    /// Count a voluntary context switch.
    pub fn record_voluntary_switch(&self) {
        self.nvcsw.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an involuntary context switch.
    pub fn record_involuntary_switch(&self) {
        self.nivcsw.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise the resident-set high-water mark to `current` if it is larger.
    /// Linearizable: concurrent updates never lose the maximum.
    pub fn update_max_rss(&self, current: u64) {
        let mut observed = self.maxrss.load(Ordering::Relaxed);
        while current > observed {
            match self.maxrss.compare_exchange_weak(
                observed,
                current,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(now) => observed = now,
            }
        }
    }

    /// Copy out all counters.
    pub fn snapshot(&self) -> RusageSnapshot {
        RusageSnapshot {
            utime_us: self.utime_us.load(Ordering::Relaxed),
            stime_us: self.stime_us.load(Ordering::Relaxed),
            maxrss: self.maxrss.load(Ordering::Relaxed),
            minflt: self.minflt.load(Ordering::Relaxed),
            majflt: self.majflt.load(Ordering::Relaxed),
            inblock: self.inblock.load(Ordering::Relaxed),
            oublock: self.oublock.load(Ordering::Relaxed),
            nvcsw: self.nvcsw.load(Ordering::Relaxed),
            nivcsw: self.nivcsw.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Per-UID quotas
// ---------------------------------------------------------------------------

/// Quota ceilings for one UID. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct UidQuota {
    /// CPU time ceiling, microseconds.
    pub max_cpu_time_us: u64,
    /// Memory ceiling, bytes.
    pub max_memory: u64,
    /// Disk ceiling, bytes.
    pub max_disk: u64,
    /// Process count ceiling.
    pub max_processes: u64,
}

struct UidAccounting {
    quota: UidQuota,
    cpu_time_us: AtomicU64,
    memory: AtomicU64,
    disk: AtomicU64,
    processes: AtomicU64,
}

impl UidAccounting {
    fn new(quota: UidQuota) -> Self {
        Self {
            quota,
            cpu_time_us: AtomicU64::new(0),
            memory: AtomicU64::new(0),
            disk: AtomicU64::new(0),
            processes: AtomicU64::new(0),
        }
    }
}

static UID_TABLE: RwLock<BTreeMap<u32, UidAccounting>> = RwLock::new(BTreeMap::new());

/// Install quota ceilings for a UID, resetting its live counters.
pub fn set_quota(uid: u32, quota: UidQuota) {
    UID_TABLE.write().insert(uid, UidAccounting::new(quota));
}

/// Check whether adding `add_cpu_us` and `add_mem` would breach the UID's
/// ceilings. UIDs at or above [`MAX_UIDS`] are unquotaed and always pass.
pub fn check_quota(uid: u32, add_cpu_us: u64, add_mem: u64) -> KernelResult<()> {
    if uid >= MAX_UIDS {
        return Ok(());
    }
    let table = UID_TABLE.read();
    let Some(entry) = table.get(&uid) else {
        return Ok(());
    };
    let quota = entry.quota;
    if quota.max_cpu_time_us > 0 {
        let current = entry.cpu_time_us.load(Ordering::Relaxed);
        if current + add_cpu_us > quota.max_cpu_time_us {
            return Err(QuotaError::CpuQuotaExceeded.into());
        }
    }
    if quota.max_memory > 0 {
        let current = entry.memory.load(Ordering::Relaxed);
        if current + add_mem > quota.max_memory {
            return Err(QuotaError::MemoryQuotaExceeded.into());
        }
    }
    Ok(())
}

/// Charge CPU time and memory against a UID's counters (no ceiling check).
pub fn charge(uid: u32, cpu_us: u64, mem: u64) {
    let table = UID_TABLE.read();
    if let Some(entry) = table.get(&uid) {
        entry.cpu_time_us.fetch_add(cpu_us, Ordering::Relaxed);
        entry.memory.fetch_add(mem, Ordering::Relaxed);
        return;
    }
    drop(table);
    let mut table = UID_TABLE.write();
    let entry = table
        .entry(uid)
        .or_insert_with(|| UidAccounting::new(UidQuota::default()));
    entry.cpu_time_us.fetch_add(cpu_us, Ordering::Relaxed);
    entry.memory.fetch_add(mem, Ordering::Relaxed);
}

/// Return memory previously charged against a UID.
pub fn uncharge_memory(uid: u32, mem: u64) {
    let table = UID_TABLE.read();
    if let Some(entry) = table.get(&uid) {
        let mut current = entry.memory.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(mem);
            match entry.memory.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(now) => current = now,
            }
        }
    }
}

/// Live (cpu_us, memory) usage of a UID.
pub fn usage(uid: u32) -> (u64, u64) {
    let table = UID_TABLE.read();
    table
        .get(&uid)
        .map(|e| {
            (
                e.cpu_time_us.load(Ordering::Relaxed),
                e.memory.load(Ordering::Relaxed),
            )
        })
        .unwrap_or((0, 0))
}

// ---------------------------------------------------------------------------
// Exit-record ring
// ---------------------------------------------------------------------------

/// One accounting record, written when a process exits. Times come from
/// `time::monotonic_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountingRecord {
    /// Pid of the exited process.
    pub pid: u64,
    /// Real uid it ran as.
    pub uid: u32,
    /// Exit code (128 + signal for signal deaths).
    pub exit_code: i32,
    /// Creation time, microseconds.
    pub start_time_us: u64,
    /// Exit time, microseconds.
    pub end_time_us: u64,
    /// Final usage counters.
    pub rusage: RusageSnapshot,
}

struct AccountingLog {
    records: Vec<AccountingRecord>,
    head: usize,
}

impl AccountingLog {
    const fn new() -> Self {
        Self {
            records: Vec::new(),
            head: 0,
        }
    }

    fn push(&mut self, record: AccountingRecord) {
        if self.records.len() < ACCOUNTING_LOG_CAPACITY {
            self.records.push(record);
            self.head = self.records.len() % ACCOUNTING_LOG_CAPACITY;
            return;
        }
        // Full: overwrite the oldest record.
        self.records[self.head] = record;
        self.head = (self.head + 1) % ACCOUNTING_LOG_CAPACITY;
    }

    fn snapshot(&self) -> Vec<AccountingRecord> {
        if self.records.len() < ACCOUNTING_LOG_CAPACITY {
            return self.records.clone();
        }
        let mut out = Vec::with_capacity(ACCOUNTING_LOG_CAPACITY);
        for i in 0..ACCOUNTING_LOG_CAPACITY {
            out.push(self.records[(self.head + i) % ACCOUNTING_LOG_CAPACITY]);
        }
        out
    }
}

static ACCOUNTING_LOG: Mutex<AccountingLog> = Mutex::new(AccountingLog::new());

/// Append an exit record, dropping the oldest if the ring is full.
pub fn log_exit(record: AccountingRecord) {
    ACCOUNTING_LOG.lock().push(record);
}

/// Copy out the ring contents, oldest first.
pub fn exit_log() -> Vec<AccountingRecord> {
    ACCOUNTING_LOG.lock().snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;

    #[test]
    fn max_rss_is_monotonic() {
        let usage = ResourceUsage::new();
        usage.update_max_rss(100);
        usage.update_max_rss(50);
        assert_eq!(usage.snapshot().maxrss, 100);
        usage.update_max_rss(200);
        assert_eq!(usage.snapshot().maxrss, 200);
    }

    #[test]
    fn counters_accumulate() {
        let usage = ResourceUsage::new();
        usage.add_utime(10);
        usage.add_utime(15);
        usage.add_stime(5);
        usage.record_minor_fault();
        usage.record_major_fault();
        usage.record_blocks_in(3);
        usage.record_blocks_out(4);
        usage.record_voluntary_switch();
        usage.record_involuntary_switch();

        let snap = usage.snapshot();
        assert_eq!(snap.utime_us, 25);
        assert_eq!(snap.stime_us, 5);
        assert_eq!(snap.minflt, 1);
        assert_eq!(snap.majflt, 1);
        assert_eq!(snap.inblock, 3);
        assert_eq!(snap.oublock, 4);
        assert_eq!(snap.nvcsw, 1);
        assert_eq!(snap.nivcsw, 1);
    }

    #[test]
    fn quota_ceilings_are_enforced() {
        let uid = 4242;
        set_quota(
            uid,
            UidQuota {
                max_cpu_time_us: 1_000,
                max_memory: 4096,
                ..Default::default()
            },
        );

        check_quota(uid, 500, 1024).unwrap();
        charge(uid, 900, 4000);
        assert_eq!(
            check_quota(uid, 200, 0),
            Err(KernelError::Quota(QuotaError::CpuQuotaExceeded))
        );
        assert_eq!(
            check_quota(uid, 0, 200),
            Err(KernelError::Quota(QuotaError::MemoryQuotaExceeded))
        );
        uncharge_memory(uid, 4000);
        check_quota(uid, 0, 200).unwrap();
    }

    #[test]
    fn high_uids_are_unquotaed() {
        check_quota(MAX_UIDS, u64::MAX / 2, u64::MAX / 2).unwrap();
        check_quota(MAX_UIDS + 10, 1, 1).unwrap();
    }

    #[test]
    fn exit_ring_drops_oldest_when_full() {
        let mut ring = AccountingLog::new();
        let mut record = AccountingRecord {
            pid: 0,
            uid: 0,
            exit_code: 0,
            start_time_us: 0,
            end_time_us: 0,
            rusage: RusageSnapshot::default(),
        };
        for pid in 0..(ACCOUNTING_LOG_CAPACITY as u64 + 5) {
            record.pid = pid;
            ring.push(record);
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), ACCOUNTING_LOG_CAPACITY);
        // Records 0..5 were dropped; the oldest surviving record is pid 5.
        assert_eq!(snap.first().unwrap().pid, 5);
        assert_eq!(snap.last().unwrap().pid, ACCOUNTING_LOG_CAPACITY as u64 + 4);
    }
}
