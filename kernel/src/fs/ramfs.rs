//! RAM filesystem
//!
//! Fully in-memory: regular files hold a growable byte buffer, symlinks
//! hold their target, directories hold an ordered entry list with explicit
//! `.` and `..`. Byte usage is charged against the superblock; a mount-time
//! `size=` option caps it. Registered under both "ramfs" and "tmpfs" with
//! the same callbacks.
//!
//! Directories keep strong references to their children; `.` and `..` are
//! weak so the tree never forms a strong cycle.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use crate::error::{FsError, KernelResult};

use super::sync::{DirectorySync, InodeGeneration, RenameContext};
use super::{
    register_filesystem, DirEntry, Filesystem, FilesystemType, InodeMeta, InodeType, VfsNode,
    MAX_NAME_LEN, RAMFS_MAGIC,
};

/// Default permission bits for new files.
pub const DEFAULT_FILE_MODE: u16 = 0o644;

/// Default permission bits for new directories.
pub const DEFAULT_DIR_MODE: u16 = 0o755;

struct RamSuper {
    bytes_used: AtomicU64,
    max_bytes: u64,
    next_ino: AtomicU64,
}

impl RamSuper {
    fn new(max_bytes: u64) -> Self {
        Self {
            bytes_used: AtomicU64::new(0),
            max_bytes,
            next_ino: AtomicU64::new(1),
        }
    }

    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve `bytes` of data space, failing with `NoSpace` at the quota.
    fn charge(&self, bytes: u64) -> KernelResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        let mut current = self.bytes_used.load(Ordering::Acquire);
        loop {
            let next = current + bytes;
            if self.max_bytes > 0 && next > self.max_bytes {
                return Err(FsError::NoSpace.into());
            }
            match self.bytes_used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    fn uncharge(&self, bytes: u64) {
        if bytes > 0 {
            self.bytes_used.fetch_sub(bytes, Ordering::AcqRel);
        }
    }
}

/// Directory entries reference children strongly; `.` and `..` weakly.
enum EntryRef {
    Strong(Arc<RamInode>),
    Weak(Weak<RamInode>),
}

impl EntryRef {
    fn upgrade(&self) -> Option<Arc<RamInode>> {
        match self {
            Self::Strong(node) => Some(node.clone()),
            Self::Weak(weak) => weak.upgrade(),
        }
    }
}

enum NodeData {
    Regular(RwLock<Vec<u8>>),
    Directory(RwLock<Vec<(String, EntryRef)>>),
    Symlink(String),
}

struct MetaBits {
    mode: u16,
    uid: u32,
    gid: u32,
    nlink: u32,
}

/// One ramfs inode.
pub struct RamInode {
    ino: u64,
    sb: Arc<RamSuper>,
    self_ref: Weak<RamInode>,
    meta: RwLock<MetaBits>,
    data: NodeData,
    /// Bumped whenever directory contents change; dentry and permission
    /// caches validate against it.
    pub generation: InodeGeneration,
    /// Rename lock ordering state for this directory.
    pub dir_sync: DirectorySync,
}

impl RamInode {
    fn new_cyclic(
        sb: &Arc<RamSuper>,
        mode: u16,
        nlink: u32,
        build: impl FnOnce(&Weak<RamInode>) -> NodeData,
    ) -> Arc<Self> {
        let ino = sb.alloc_ino();
        Arc::new_cyclic(|weak| Self {
            ino,
            sb: sb.clone(),
            self_ref: weak.clone(),
            meta: RwLock::new(MetaBits {
                mode,
                uid: 0,
                gid: 0,
                nlink,
            }),
            data: build(weak),
            generation: InodeGeneration::new(),
            dir_sync: DirectorySync::new(),
        })
    }

    fn new_root(sb: &Arc<RamSuper>) -> Arc<Self> {
        Self::new_cyclic(sb, DEFAULT_DIR_MODE, 2, |weak| {
            // The root is its own parent.
            NodeData::Directory(RwLock::new(alloc::vec![
                (String::from("."), EntryRef::Weak(weak.clone())),
                (String::from(".."), EntryRef::Weak(weak.clone())),
            ]))
        })
    }

    fn dir_entries(&self) -> KernelResult<&RwLock<Vec<(String, EntryRef)>>> {
        match &self.data {
            NodeData::Directory(entries) => Ok(entries),
            _ => Err(FsError::NotADirectory.into()),
        }
    }

    fn file_data(&self) -> KernelResult<&RwLock<Vec<u8>>> {
        match &self.data {
            NodeData::Regular(data) => Ok(data),
            NodeData::Directory(_) => Err(FsError::IsADirectory.into()),
            NodeData::Symlink(_) => Err(FsError::NotSupported.into()),
        }
    }

    fn check_new_name(&self, name: &str) -> KernelResult<()> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::InvalidPath.into());
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong.into());
        }
        if name.bytes().any(|b| b == 0 || b == b'/') {
            return Err(FsError::InvalidPath.into());
        }
        Ok(())
    }

    fn insert_entry(&self, name: &str, node: Arc<RamInode>) -> KernelResult<()> {
        let entries = self.dir_entries()?;
        let mut entries = entries.write();
        if entries.iter().any(|(n, _)| n == name) {
            return Err(FsError::AlreadyExists.into());
        }
        entries.push((String::from(name), EntryRef::Strong(node)));
        self.generation.bump();
        Ok(())
    }

    fn link_count(&self) -> u32 {
        self.meta.read().nlink
    }

    /// Like [`VfsNode::lookup`] but returns the concrete inode type.
    pub fn lookup_typed(&self, name: &str) -> KernelResult<Arc<RamInode>> {
        let entries = self.dir_entries()?;
        let entries = entries.read();
        entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, entry)| entry.upgrade())
            .ok_or_else(|| FsError::FileNotFound.into())
    }

    /// Move `name` from this directory into `target` as `new_name`,
    /// taking both directory locks in rename order.
    pub fn rename(
        self: &Arc<Self>,
        name: &str,
        target: &Arc<RamInode>,
        new_name: &str,
    ) -> KernelResult<()> {
        target.check_new_name(new_name)?;
        self.dir_entries()?;
        target.dir_entries()?;

        let _guard = RenameContext::lock_for_rename(&self.dir_sync, &target.dir_sync);

        let node = {
            let entries = self.dir_entries()?;
            let mut entries = entries.write();
            let index = entries
                .iter()
                .position(|(n, _)| n == name)
                .ok_or(FsError::FileNotFound)?;
            if name == "." || name == ".." {
                return Err(FsError::InvalidPath.into());
            }
            let (_, entry) = entries.remove(index);
            entry.upgrade().ok_or(FsError::FileNotFound)?
        };
        self.generation.bump();

        if let Err(e) = target.insert_entry(new_name, node.clone()) {
            // Put the entry back; the rename failed as a unit.
            self.insert_entry(name, node).ok();
            return Err(e);
        }

        // A moved directory's `..` follows it to the new parent.
        if let NodeData::Directory(entries) = &node.data {
            let mut entries = entries.write();
            for (n, entry) in entries.iter_mut() {
                if n == ".." {
                    *entry = EntryRef::Weak(target.self_ref.clone());
                }
            }
            self.meta.write().nlink -= 1;
            target.meta.write().nlink += 1;
        }
        Ok(())
    }
}

impl VfsNode for RamInode {
    fn node_type(&self) -> InodeType {
        match self.data {
            NodeData::Regular(_) => InodeType::Regular,
            NodeData::Directory(_) => InodeType::Directory,
            NodeData::Symlink(_) => InodeType::Symlink,
        }
    }

    fn metadata(&self) -> InodeMeta {
        let meta = self.meta.read();
        let size = match &self.data {
            NodeData::Regular(data) => data.read().len() as u64,
            NodeData::Directory(entries) => entries.read().len() as u64,
            NodeData::Symlink(target) => target.len() as u64,
        };
        InodeMeta {
            ino: self.ino,
            node_type: self.node_type(),
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            nlink: meta.nlink,
            size,
        }
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>> {
        let entries = self.dir_entries()?;
        let entries = entries.read();
        entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, entry)| entry.upgrade())
            .map(|node| node as Arc<dyn VfsNode>)
            .ok_or_else(|| FsError::FileNotFound.into())
    }

    fn create(&self, name: &str, mode: u16) -> KernelResult<Arc<dyn VfsNode>> {
        self.check_new_name(name)?;
        let node = RamInode::new_cyclic(&self.sb, mode, 1, |_| {
            NodeData::Regular(RwLock::new(Vec::new()))
        });
        self.insert_entry(name, node.clone())?;
        Ok(node)
    }

    fn mkdir(&self, name: &str, mode: u16) -> KernelResult<Arc<dyn VfsNode>> {
        self.check_new_name(name)?;
        let parent_ref = self.self_ref.clone();
        // A fresh directory links to itself via `.` and to us via `..`,
        // so it is born with nlink 2.
        let node = RamInode::new_cyclic(&self.sb, mode, 2, |weak| {
            NodeData::Directory(RwLock::new(alloc::vec![
                (String::from("."), EntryRef::Weak(weak.clone())),
                (String::from(".."), EntryRef::Weak(parent_ref)),
            ]))
        });
        self.insert_entry(name, node.clone())?;
        // The child's `..` is a new link to us.
        self.meta.write().nlink += 1;
        Ok(node)
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidPath.into());
        }
        let entries = self.dir_entries()?;
        let mut entries = entries.write();
        let index = entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or(FsError::FileNotFound)?;
        let node = entries[index].1.upgrade().ok_or(FsError::FileNotFound)?;
        if node.node_type() == InodeType::Directory {
            return Err(FsError::IsADirectory.into());
        }
        entries.remove(index);
        drop(entries);

        node.meta.write().nlink -= 1;
        if node.link_count() == 0 {
            // Last link: give the data bytes back to the superblock. The
            // inode itself is freed when the final reference drops.
            let freed = match &node.data {
                NodeData::Regular(data) => data.read().len() as u64,
                NodeData::Symlink(target) => target.len() as u64,
                NodeData::Directory(_) => 0,
            };
            self.sb.uncharge(freed);
        }
        self.generation.bump();
        Ok(())
    }

    fn rmdir(&self, name: &str) -> KernelResult<()> {
        if name == "." || name == ".." {
            return Err(FsError::InvalidPath.into());
        }
        let entries = self.dir_entries()?;
        let mut entries = entries.write();
        let index = entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or(FsError::FileNotFound)?;
        let node = entries[index].1.upgrade().ok_or(FsError::FileNotFound)?;

        let child_entries = node.dir_entries()?;
        // `.` and `..` are always present; anything beyond them means the
        // directory is non-empty.
        if child_entries.read().len() > 2 {
            return Err(FsError::DirectoryNotEmpty.into());
        }
        entries.remove(index);
        drop(entries);

        // The child's `..` link to us goes away with it.
        self.meta.write().nlink -= 1;
        self.generation.bump();
        Ok(())
    }

    fn symlink(&self, name: &str, target: &str) -> KernelResult<Arc<dyn VfsNode>> {
        self.check_new_name(name)?;
        self.sb.charge(target.len() as u64)?;
        let node = RamInode::new_cyclic(&self.sb, 0o777, 1, |_| {
            NodeData::Symlink(String::from(target))
        });
        if let Err(e) = self.insert_entry(name, node.clone()) {
            self.sb.uncharge(target.len() as u64);
            return Err(e);
        }
        Ok(node)
    }

    fn readlink(&self, buf: &mut [u8]) -> KernelResult<usize> {
        let NodeData::Symlink(target) = &self.data else {
            return Err(FsError::NotSupported.into());
        };
        if buf.len() < target.len() {
            return Err(FsError::BufferTooSmall.into());
        }
        buf[..target.len()].copy_from_slice(target.as_bytes());
        Ok(target.len())
    }

    fn truncate(&self, size: u64) -> KernelResult<()> {
        let data = self.file_data()?;
        let mut data = data.write();
        let old = data.len() as u64;
        if size > old {
            self.sb.charge(size - old)?;
            data.resize(size as usize, 0);
        } else if size < old {
            self.sb.uncharge(old - size);
            if size == 0 {
                // Release the buffer entirely rather than keeping capacity.
                *data = Vec::new();
            } else {
                data.truncate(size as usize);
                data.shrink_to_fit();
            }
        }
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let data = self.file_data()?;
        let data = data.read();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> KernelResult<usize> {
        let data = self.file_data()?;
        let mut data = data.write();
        let end = offset as usize + bytes.len();
        if end > data.len() {
            self.sb.charge((end - data.len()) as u64)?;
            // Zero-fill any gap between the old size and the write offset.
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn readdir(&self) -> KernelResult<Vec<DirEntry>> {
        let entries = self.dir_entries()?;
        let entries = entries.read();
        let mut out = Vec::with_capacity(entries.len());
        for (name, entry) in entries.iter() {
            let Some(node) = entry.upgrade() else {
                continue;
            };
            out.push(DirEntry {
                name: name.clone(),
                ino: node.ino,
                node_type: node.node_type(),
            });
        }
        Ok(out)
    }
}

/// A mounted ramfs instance.
pub struct RamFilesystem {
    sb: Arc<RamSuper>,
    root: Arc<RamInode>,
}

impl RamFilesystem {
    /// Create an instance with the given byte quota (0 = unlimited).
    pub fn new(max_bytes: u64) -> Self {
        let sb = Arc::new(RamSuper::new(max_bytes));
        let root = RamInode::new_root(&sb);
        Self { sb, root }
    }

    /// The typed root inode (the trait object comes from [`Filesystem`]).
    pub fn root_inode(&self) -> Arc<RamInode> {
        self.root.clone()
    }
}

impl Filesystem for RamFilesystem {
    fn magic(&self) -> u32 {
        RAMFS_MAGIC
    }

    fn root(&self) -> Arc<dyn VfsNode> {
        self.root.clone()
    }

    fn bytes_used(&self) -> u64 {
        self.sb.bytes_used.load(Ordering::Acquire)
    }

    fn max_bytes(&self) -> u64 {
        self.sb.max_bytes
    }
}

/// Parse the mount option string. Recognized: `size=<n>[k|m|g]` (decimal);
/// absent or zero means unlimited.
pub fn parse_size_option(options: &str) -> KernelResult<u64> {
    for option in options.split(',') {
        let option = option.trim();
        if option.is_empty() {
            continue;
        }
        let Some(value) = option.strip_prefix("size=") else {
            continue;
        };
        let (digits, shift) = match value.as_bytes().last() {
            Some(b'k') | Some(b'K') => (&value[..value.len() - 1], 10),
            Some(b'm') | Some(b'M') => (&value[..value.len() - 1], 20),
            Some(b'g') | Some(b'G') => (&value[..value.len() - 1], 30),
            _ => (value, 0),
        };
        let parsed: u64 = digits
            .parse()
            .map_err(|_| FsError::InvalidMountOption)?;
        return Ok(parsed << shift);
    }
    Ok(0)
}

fn mount_ramfs(options: &str) -> KernelResult<Arc<dyn Filesystem>> {
    let max_bytes = parse_size_option(options)?;
    Ok(Arc::new(RamFilesystem::new(max_bytes)))
}

fn kill_ramfs(fs: &Arc<dyn Filesystem>) {
    // Everything is reference counted with weak back-links, so dropping
    // the mount's root reference tears the tree down.
    log::debug!(target: "fs", "ramfs unmounted, {} bytes released", fs.bytes_used());
}

/// Register the implementation under its two names.
pub fn register() {
    register_filesystem(FilesystemType {
        name: "ramfs",
        mount: mount_ramfs,
        kill: kill_ramfs,
    });
    register_filesystem(FilesystemType {
        name: "tmpfs",
        mount: mount_ramfs,
        kill: kill_ramfs,
    });
}
