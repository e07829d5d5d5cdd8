//! Kernel error types
//!
//! One enum per subsystem, wrapped by [`KernelError`]. Syscall entry points
//! translate these into negative errno-equivalents in `syscall::errno`.

use core::fmt;

/// Memory and mapping errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Address is outside the range the operation accepts.
    InvalidAddress,
    /// No mapping exists for the given virtual address.
    NotMapped,
    /// A mapping already exists for the given virtual page.
    AlreadyMapped,
    /// The mapping exists but does not permit the requested access.
    AccessDenied,
    /// Physical address is not frame-aligned or otherwise malformed.
    InvalidPhysicalAddress,
    /// Physical address falls outside every registered memory region.
    PhysicalAddressOutOfRange,
    /// A frame refcount was released below zero.
    RefCountUnderflow,
    /// The frame allocator has not been initialized.
    NoPageAllocator,
    /// No free frames remain.
    OutOfMemory,
}

/// Process lookup and argument errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// The calling context has no current process.
    NoProcess,
    /// No process exists with the given pid.
    NoSuchProcess,
    /// An argument was out of range for the operation.
    InvalidArgument,
}

/// Signal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// Signal number outside 1..=31 (or 0 where a real signal is required).
    InvalidSignal,
    /// SIGKILL and SIGSTOP cannot be caught, blocked, or ignored.
    CannotCatch,
}

/// Quota and resource-limit errors. Callers must roll back any partial
/// reservation before surfacing one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaError {
    /// Per-UID CPU time ceiling would be breached.
    CpuQuotaExceeded,
    /// Per-UID memory ceiling would be breached.
    MemoryQuotaExceeded,
    /// Resource-group memory limit would be breached.
    MemoryLimitExceeded,
    /// Per-process thread ceiling reached.
    ProcessThreadLimitExceeded,
    /// Per-UID thread ceiling reached.
    UidThreadLimitExceeded,
    /// System-wide thread ceiling reached.
    GlobalThreadLimitExceeded,
    /// Per-process locked-memory ceiling reached.
    MemlockLimitExceeded,
    /// System-wide locked-memory ceiling reached.
    GlobalMemlockLimitExceeded,
    /// Requested real-time priority refused.
    RtPriorityDenied,
    /// I/O throttle window exhausted.
    IoThrottled,
    /// Network throttle window exhausted.
    NetworkThrottled,
}

/// File-lock errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// A conflicting lock is held by another process.
    LockConflict,
    /// The per-file lock list is full.
    TooManyLocks,
    /// The global locked-file table is full.
    TooManyLockedFiles,
}

/// Filesystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Name not found in the directory.
    FileNotFound,
    /// The operation requires a directory.
    NotADirectory,
    /// The operation requires a non-directory.
    IsADirectory,
    /// rmdir on a directory that still has entries.
    DirectoryNotEmpty,
    /// An entry with that name already exists.
    AlreadyExists,
    /// The superblock byte quota would be exceeded.
    NoSpace,
    /// Caller-supplied buffer cannot hold the result.
    BufferTooSmall,
    /// Path is empty, too long, or contains a forbidden component.
    InvalidPath,
    /// Component name exceeds the filesystem name limit.
    NameTooLong,
    /// Operation is not supported by this node type.
    NotSupported,
    /// A mount option could not be parsed.
    InvalidMountOption,
    /// No registered filesystem matches the requested name.
    UnknownFsType,
}

/// Sanitizer detections. Reporting one never corrupts the sanitizer's own
/// state; the access is refused and the detection is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KasanError {
    /// Access past the end of a heap allocation.
    HeapOverflow,
    /// Access past the end of a stack frame.
    StackOverflow,
    /// Access to a stack frame that has returned.
    StackUseAfterFree,
    /// Access to freed heap memory.
    UseAfterFree,
    /// Access into a redzone between allocations.
    RedzoneViolation,
    /// Free of an allocation already freed.
    DoubleFree,
    /// Free of an address the tracker never saw.
    InvalidFree,
    /// Catch-all for shadow values with no finer classification.
    MemoryViolation,
}

/// Mandatory-access-control and module-signing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacError {
    /// Policy denies the requested access vector.
    PermissionDenied,
    /// No key in the ring matches the signature's key id.
    KeyNotFound,
    /// The ring key exists but cannot verify this signature.
    KeyMismatch,
    /// The signature's recorded module hash does not match the module.
    HashMismatch,
    /// The signature tag failed verification.
    InvalidSignature,
    /// Policy requires a signature and the module carries none.
    SignatureRequired,
    /// Rule table is full.
    TooManyRules,
    /// A context or profile name exceeds its fixed field.
    NameTooLong,
    /// A profile description exceeds its fixed field.
    DescriptionTooLong,
}

/// SMP bring-up errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpError {
    /// The ACPI tables carry no MADT.
    NoMadt,
    /// The MADT lists no usable local APIC.
    NoApic,
    /// CPU id outside the discovered set.
    InvalidCpuId,
    /// The BSP is already running and cannot be started.
    CannotStartBsp,
    /// The BSP cannot be taken offline.
    CannotOfflineBsp,
    /// An AP did not come online within the bounded wait.
    ApStartupTimeout,
}

/// Top-level kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    Memory(MemoryError),
    Process(ProcessError),
    Signal(SignalError),
    Quota(QuotaError),
    Lock(LockError),
    Fs(FsError),
    Kasan(KasanError),
    Mac(MacError),
    Smp(SmpError),
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(e) => write!(f, "memory error: {:?}", e),
            Self::Process(e) => write!(f, "process error: {:?}", e),
            Self::Signal(e) => write!(f, "signal error: {:?}", e),
            Self::Quota(e) => write!(f, "quota error: {:?}", e),
            Self::Lock(e) => write!(f, "lock error: {:?}", e),
            Self::Fs(e) => write!(f, "filesystem error: {:?}", e),
            Self::Kasan(e) => write!(f, "sanitizer report: {:?}", e),
            Self::Mac(e) => write!(f, "security error: {:?}", e),
            Self::Smp(e) => write!(f, "smp error: {:?}", e),
        }
    }
}

impl From<MemoryError> for KernelError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

impl From<ProcessError> for KernelError {
    fn from(e: ProcessError) -> Self {
        Self::Process(e)
    }
}

impl From<SignalError> for KernelError {
    fn from(e: SignalError) -> Self {
        Self::Signal(e)
    }
}

impl From<QuotaError> for KernelError {
    fn from(e: QuotaError) -> Self {
        Self::Quota(e)
    }
}

impl From<LockError> for KernelError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        Self::Fs(e)
    }
}

impl From<KasanError> for KernelError {
    fn from(e: KasanError) -> Self {
        Self::Kasan(e)
    }
}

impl From<MacError> for KernelError {
    fn from(e: MacError) -> Self {
        Self::Mac(e)
    }
}

impl From<SmpError> for KernelError {
    fn from(e: SmpError) -> Self {
        Self::Smp(e)
    }
}
