//! Virtual filesystem
//!
//! The node trait enumerating the operations a filesystem can implement,
//! the filesystem-type registry, the VFS synchronization primitives, the
//! RAM filesystem, and the file-lock table.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{FsError, KernelResult};

pub mod flock;
pub mod ramfs;
pub mod sync;

pub use flock::{FileLockTable, LockMode, LockType};
pub use sync::{DentryState, DentrySyncInfo, InodeGeneration, PermissionCache, RenameContext};

/// Filesystem magic shared by "ramfs" and "tmpfs".
pub const RAMFS_MAGIC: u32 = 0x8584_58F6;

/// Filesystem block size.
pub const BLOCK_SIZE: usize = 4096;

/// Longest directory-entry name.
pub const MAX_NAME_LEN: usize = 255;

/// Kind of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Character device node.
    CharDevice,
    /// Block device node.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix-domain socket.
    Socket,
}

/// Inode attributes as stat reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeMeta {
    /// Inode number, unique within the superblock.
    pub ino: u64,
    /// Node kind.
    pub node_type: InodeType,
    /// Permission bits.
    pub mode: u16,
    /// Owner uid.
    pub uid: u32,
    /// Owner gid.
    pub gid: u32,
    /// Hard-link count.
    pub nlink: u32,
    /// Size in bytes (target length for symlinks).
    pub size: u64,
}

/// One directory entry as readdir reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name.
    pub name: String,
    /// Inode number the entry points at.
    pub ino: u64,
    /// Kind of the target inode.
    pub node_type: InodeType,
}

/// The operations a filesystem node may support. Implementations return
/// `NotSupported` for operations their node type does not carry; there are
/// no raw private-data pointers behind this interface.
pub trait VfsNode: Send + Sync {
    /// Node kind.
    fn node_type(&self) -> InodeType;

    /// Attributes snapshot.
    fn metadata(&self) -> InodeMeta;

    /// Find `name` in this directory.
    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>>;

    /// Create a regular file.
    fn create(&self, name: &str, mode: u16) -> KernelResult<Arc<dyn VfsNode>>;

    /// Create a directory.
    fn mkdir(&self, name: &str, mode: u16) -> KernelResult<Arc<dyn VfsNode>>;

    /// Remove a non-directory entry.
    fn unlink(&self, name: &str) -> KernelResult<()>;

    /// Remove an empty directory.
    fn rmdir(&self, name: &str) -> KernelResult<()>;

    /// Create a symbolic link to `target`.
    fn symlink(&self, name: &str, target: &str) -> KernelResult<Arc<dyn VfsNode>>;

    /// Read a symlink target into `buf`, returning its length.
    fn readlink(&self, buf: &mut [u8]) -> KernelResult<usize>;

    /// Resize a regular file.
    fn truncate(&self, size: u64) -> KernelResult<()>;

    /// Read at `offset`, returning the number of bytes read.
    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write at `offset`, returning the number of bytes written.
    fn write(&self, offset: u64, data: &[u8]) -> KernelResult<usize>;

    /// List the directory, including the `.` and `..` entries.
    fn readdir(&self) -> KernelResult<Vec<DirEntry>>;
}

/// A mounted filesystem instance.
pub trait Filesystem: Send + Sync {
    /// Filesystem magic number.
    fn magic(&self) -> u32;

    /// Root directory node.
    fn root(&self) -> Arc<dyn VfsNode>;

    /// Bytes currently consumed by file data.
    fn bytes_used(&self) -> u64;

    /// Byte quota (0 = unlimited).
    fn max_bytes(&self) -> u64;
}

/// A registered filesystem type: a name plus its mount entry point.
#[derive(Clone)]
pub struct FilesystemType {
    /// Type name as passed to mount.
    pub name: &'static str,
    /// Mount callback; `options` is the raw option string.
    pub mount: fn(options: &str) -> KernelResult<Arc<dyn Filesystem>>,
    /// Unmount callback.
    pub kill: fn(&Arc<dyn Filesystem>),
}

static FILESYSTEM_TYPES: RwLock<Vec<FilesystemType>> = RwLock::new(Vec::new());

/// Register a filesystem type. Re-registering a name replaces the old
/// entry, keeping registration idempotent across init paths.
pub fn register_filesystem(fstype: FilesystemType) {
    let mut types = FILESYSTEM_TYPES.write();
    types.retain(|t| t.name != fstype.name);
    log::info!(target: "fs", "registered filesystem type {}", fstype.name);
    types.push(fstype);
}

/// Look up a registered type by name.
pub fn find_filesystem(name: &str) -> Option<FilesystemType> {
    FILESYSTEM_TYPES.read().iter().find(|t| t.name == name).cloned()
}

/// Mount a filesystem by type name.
pub fn mount(name: &str, options: &str) -> KernelResult<Arc<dyn Filesystem>> {
    let fstype = find_filesystem(name).ok_or(FsError::UnknownFsType)?;
    (fstype.mount)(options)
}

/// Unmount an instance through its type's kill callback.
pub fn unmount(name: &str, fs: &Arc<dyn Filesystem>) -> KernelResult<()> {
    let fstype = find_filesystem(name).ok_or(FsError::UnknownFsType)?;
    (fstype.kill)(fs);
    Ok(())
}

/// Register the built-in filesystem types.
pub fn init() {
    ramfs::register();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_fails_mount() {
        assert!(matches!(
            mount("xfs", ""),
            Err(crate::error::KernelError::Fs(FsError::UnknownFsType))
        ));
    }

    #[test]
    fn ramfs_and_tmpfs_share_one_implementation() {
        init();
        let a = mount("ramfs", "").unwrap();
        let b = mount("tmpfs", "").unwrap();
        assert_eq!(a.magic(), RAMFS_MAGIC);
        assert_eq!(b.magic(), RAMFS_MAGIC);

        let ra = find_filesystem("ramfs").unwrap();
        let rb = find_filesystem("tmpfs").unwrap();
        assert_eq!(ra.mount as usize, rb.mount as usize);
        assert_eq!(ra.kill as usize, rb.kill as usize);
    }
}
