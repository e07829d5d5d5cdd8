//! Security audit log
//!
//! MAC denials, sanitizer reports, and module-verification failures append
//! fixed-size records to a spin-locked ring. Recording never blocks and
//! never fails; when the ring is full the oldest record is overwritten.

use alloc::vec::Vec;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::error::KasanError;

/// Capacity of the audit ring.
pub const AUDIT_LOG_CAPACITY: usize = 256;

/// What kind of event a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    /// Type-enforcement or AVC denial.
    MacDenial,
    /// Profile violation allowed in complain mode.
    MacComplain,
    /// Sanitizer detection.
    KasanReport,
    /// Module signature rejected.
    ModuleRejected,
    /// Path rejected by the sanitizer.
    PathRejected,
}

/// One audit record.
#[derive(Debug, Clone, Copy)]
pub struct AuditEvent {
    /// Kind of event.
    pub kind: AuditKind,
    /// Monotonic timestamp, microseconds.
    pub timestamp_us: u64,
    /// Pid of the current process (zero if none).
    pub pid: u64,
    /// Uid of the current process (zero if none).
    pub uid: u32,
    /// Kind-specific code (error discriminant, si_code, ...).
    pub code: i64,
    /// Kind-specific value (address, rule index, ...).
    pub value: u64,
}

struct AuditRing {
    events: Vec<AuditEvent>,
    head: usize,
}

static AUDIT_RING: Mutex<AuditRing> = Mutex::new(AuditRing {
    events: Vec::new(),
    head: 0,
});

static TOTAL_EVENTS: AtomicU64 = AtomicU64::new(0);
static DENIALS: AtomicU64 = AtomicU64::new(0);

/// Append a record, stamping time and current-process identity.
pub fn record(kind: AuditKind, code: i64, value: u64) {
    let (pid, uid) = match crate::process::current_process() {
        Some(p) => (p.pid.0, p.uid()),
        None => (0, 0),
    };
    let event = AuditEvent {
        kind,
        timestamp_us: crate::time::monotonic_us(),
        pid,
        uid,
        code,
        value,
    };

    TOTAL_EVENTS.fetch_add(1, Ordering::Relaxed);
    if matches!(kind, AuditKind::MacDenial | AuditKind::ModuleRejected) {
        DENIALS.fetch_add(1, Ordering::Relaxed);
    }

    let mut ring = AUDIT_RING.lock();
    if ring.events.len() < AUDIT_LOG_CAPACITY {
        ring.events.push(event);
        ring.head = ring.events.len() % AUDIT_LOG_CAPACITY;
    } else {
        let head = ring.head;
        ring.events[head] = event;
        ring.head = (head + 1) % AUDIT_LOG_CAPACITY;
    }
}

/// Record a sanitizer detection.
pub fn report_kasan(kind: KasanError, addr: u64) {
    record(AuditKind::KasanReport, kind as i64, addr);
}

/// Number of events recorded since boot (including overwritten ones).
pub fn total_events() -> u64 {
    TOTAL_EVENTS.load(Ordering::Relaxed)
}

/// Number of denial events recorded since boot.
pub fn denial_count() -> u64 {
    DENIALS.load(Ordering::Relaxed)
}

/// Copy out the ring contents, oldest first.
pub fn snapshot() -> Vec<AuditEvent> {
    let ring = AUDIT_RING.lock();
    if ring.events.len() < AUDIT_LOG_CAPACITY {
        return ring.events.clone();
    }
    let mut out = Vec::with_capacity(AUDIT_LOG_CAPACITY);
    for i in 0..AUDIT_LOG_CAPACITY {
        out.push(ring.events[(ring.head + i) % AUDIT_LOG_CAPACITY]);
    }
    out
}
