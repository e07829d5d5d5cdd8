//! System-call surface
//!
//! Kernel-side entry points for the calls the core exposes, plus the single
//! place where [`KernelError`] becomes a negative errno-equivalent for
//! userland.

pub mod fs;
pub mod signal;

use crate::error::{
    FsError, KasanError, KernelError, LockError, MacError, MemoryError, ProcessError, QuotaError,
    SignalError, SmpError,
};

pub const EPERM: i64 = 1;
pub const ENOENT: i64 = 2;
pub const ESRCH: i64 = 3;
pub const EIO: i64 = 5;
pub const EAGAIN: i64 = 11;
pub const ENOMEM: i64 = 12;
pub const EACCES: i64 = 13;
pub const EFAULT: i64 = 14;
pub const EEXIST: i64 = 17;
pub const ENOTDIR: i64 = 20;
pub const EISDIR: i64 = 21;
pub const EINVAL: i64 = 22;
pub const ENFILE: i64 = 23;
pub const ENOSPC: i64 = 28;
pub const ENAMETOOLONG: i64 = 36;
pub const ENOLCK: i64 = 37;
pub const ENOTEMPTY: i64 = 39;

/// Map a kernel error to its negative errno-equivalent.
pub fn errno_of(error: KernelError) -> i64 {
    let errno = match error {
        KernelError::Memory(e) => match e {
            MemoryError::AccessDenied => EACCES,
            MemoryError::OutOfMemory => ENOMEM,
            MemoryError::NotMapped
            | MemoryError::InvalidAddress
            | MemoryError::InvalidPhysicalAddress
            | MemoryError::PhysicalAddressOutOfRange => EFAULT,
            _ => EIO,
        },
        KernelError::Process(e) => match e {
            ProcessError::NoProcess | ProcessError::NoSuchProcess => ESRCH,
            ProcessError::InvalidArgument => EINVAL,
        },
        KernelError::Signal(e) => match e {
            SignalError::InvalidSignal => EINVAL,
            SignalError::CannotCatch => EINVAL,
        },
        KernelError::Quota(e) => match e {
            QuotaError::IoThrottled | QuotaError::NetworkThrottled => EAGAIN,
            QuotaError::RtPriorityDenied => EPERM,
            _ => ENOMEM,
        },
        KernelError::Lock(e) => match e {
            LockError::LockConflict => EAGAIN,
            LockError::TooManyLocks => ENOLCK,
            LockError::TooManyLockedFiles => ENFILE,
        },
        KernelError::Fs(e) => match e {
            FsError::FileNotFound => ENOENT,
            FsError::NotADirectory => ENOTDIR,
            FsError::IsADirectory => EISDIR,
            FsError::DirectoryNotEmpty => ENOTEMPTY,
            FsError::AlreadyExists => EEXIST,
            FsError::NoSpace => ENOSPC,
            FsError::NameTooLong => ENAMETOOLONG,
            FsError::InvalidPath | FsError::InvalidMountOption | FsError::UnknownFsType => EINVAL,
            FsError::BufferTooSmall => EINVAL,
            FsError::NotSupported => EINVAL,
        },
        KernelError::Kasan(e) => match e {
            KasanError::DoubleFree | KasanError::InvalidFree => EINVAL,
            _ => EFAULT,
        },
        KernelError::Mac(e) => match e {
            MacError::PermissionDenied | MacError::SignatureRequired => EPERM,
            MacError::KeyNotFound => ENOENT,
            _ => EINVAL,
        },
        KernelError::Smp(e) => match e {
            SmpError::InvalidCpuId => EINVAL,
            _ => EIO,
        },
    };
    -errno
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errnos_are_negative_and_stable() {
        assert_eq!(errno_of(ProcessError::NoSuchProcess.into()), -ESRCH);
        assert_eq!(errno_of(SignalError::InvalidSignal.into()), -EINVAL);
        assert_eq!(errno_of(FsError::NoSpace.into()), -ENOSPC);
        assert_eq!(errno_of(LockError::LockConflict.into()), -EAGAIN);
        assert_eq!(errno_of(MemoryError::AccessDenied.into()), -EACCES);
    }
}
