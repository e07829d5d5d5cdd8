//! User-pointer validation and checked copies
//!
//! Every byte a syscall touches in user memory must lie inside the caller's
//! VMAs with the right permission. The checked copy helpers enforce size
//! ceilings; `sanitize_path` rejects path tricks before the VFS ever sees
//! them.

use alloc::string::String;
use alloc::vec;

use crate::error::{FsError, KernelResult, MemoryError};

use super::{AddressSpace, VirtualAddress, USER_SPACE_END};

/// Largest single read from user memory (2 GiB - 4 KiB).
pub const MAX_READ_SIZE: usize = 0x7FFF_F000;

/// Largest single write to user memory (2 GiB - 4 KiB).
pub const MAX_WRITE_SIZE: usize = 0x7FFF_F000;

/// Longest path accepted from user space, including the terminator.
pub const MAX_PATH_LEN: usize = 4096;

/// Longest single exec argument accepted from user space.
pub const MAX_ARG_LEN: usize = 128 * 1024;

/// Validate that `[addr, addr + len)` is a well-formed user range fully
/// covered by VMAs granting the required access. Coverage may span adjacent
/// VMAs.
pub fn validate_user_ptr(
    space: &AddressSpace,
    addr: u64,
    len: usize,
    write: bool,
) -> KernelResult<()> {
    if addr == 0 || addr >= USER_SPACE_END {
        return Err(MemoryError::InvalidAddress.into());
    }
    let end = addr
        .checked_add(len as u64)
        .ok_or(MemoryError::InvalidAddress)?;
    if end > USER_SPACE_END {
        return Err(MemoryError::InvalidAddress.into());
    }
    if !space.range_has_access(VirtualAddress::new(addr), len, write) {
        return Err(MemoryError::AccessDenied.into());
    }
    Ok(())
}

/// Copy `buf.len()` bytes from user memory at `addr` into `buf`.
pub fn copy_from_user(space: &AddressSpace, addr: u64, buf: &mut [u8]) -> KernelResult<()> {
    if buf.len() > MAX_READ_SIZE {
        return Err(MemoryError::InvalidAddress.into());
    }
    validate_user_ptr(space, addr, buf.len(), false)?;
    space.read_bytes(VirtualAddress::new(addr), buf)
}

/// Copy `data` into user memory at `addr`.
pub fn copy_to_user(space: &AddressSpace, addr: u64, data: &[u8]) -> KernelResult<()> {
    if data.len() > MAX_WRITE_SIZE {
        return Err(MemoryError::InvalidAddress.into());
    }
    validate_user_ptr(space, addr, data.len(), true)?;
    space.write_bytes(VirtualAddress::new(addr), data)
}

/// Copy a NUL-terminated string of at most `max_len` bytes from user memory.
/// The terminator must appear within `max_len` bytes.
pub fn copy_string_from_user(
    space: &AddressSpace,
    addr: u64,
    max_len: usize,
) -> KernelResult<String> {
    let mut collected = vec![];
    let mut cursor = addr;
    let mut remaining = max_len;

    while remaining > 0 {
        // Stay within the current page so a string straddling an unmapped
        // page still returns what it legally can before faulting.
        let va = VirtualAddress::new(cursor);
        let in_page = (super::PAGE_SIZE as u64 - va.page_offset()) as usize;
        let chunk_len = in_page.min(remaining);

        validate_user_ptr(space, cursor, chunk_len, false)?;
        let mut chunk = vec![0u8; chunk_len];
        space.read_bytes(va, &mut chunk)?;

        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            collected.extend_from_slice(&chunk[..nul]);
            return String::from_utf8(collected)
                .map_err(|_| MemoryError::InvalidAddress.into());
        }
        collected.extend_from_slice(&chunk);
        cursor += chunk_len as u64;
        remaining -= chunk_len;
    }
    Err(MemoryError::InvalidAddress.into())
}

/// Reject malformed or privileged paths: empty, oversized, NUL bytes, empty
/// components (double slash or trailing slash), and any `..` component.
/// Absolute paths require effective uid 0.
pub fn sanitize_path(path: &str, euid: u32) -> KernelResult<()> {
    if path.is_empty() {
        return Err(FsError::InvalidPath.into());
    }
    if path.len() > MAX_PATH_LEN {
        return Err(FsError::InvalidPath.into());
    }
    if path.bytes().any(|b| b == 0) {
        return Err(FsError::InvalidPath.into());
    }

    let relative = match path.strip_prefix('/') {
        Some(rest) => {
            if euid != 0 {
                return Err(MemoryError::AccessDenied.into());
            }
            rest
        }
        None => path,
    };

    // "/" alone resolves to the root directory; nothing left to check.
    if relative.is_empty() {
        return Ok(());
    }

    for component in relative.split('/') {
        if component.is_empty() {
            return Err(FsError::InvalidPath.into());
        }
        if component == ".." {
            return Err(FsError::InvalidPath.into());
        }
    }
    Ok(())
}
