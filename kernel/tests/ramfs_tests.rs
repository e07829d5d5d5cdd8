//! RAM filesystem integration tests

use basalt_kernel::error::{FsError, KernelError};
use basalt_kernel::fs::ramfs::DEFAULT_FILE_MODE;
use basalt_kernel::fs::{self, InodeType, RAMFS_MAGIC};

#[test]
fn write_hits_quota_exactly_at_the_boundary() {
    fs::init();
    let mounted = fs::mount("ramfs", "size=4096").unwrap();
    assert_eq!(mounted.max_bytes(), 4096);

    let root = mounted.root();
    let file = root.create("a", DEFAULT_FILE_MODE).unwrap();

    assert_eq!(file.write(0, &vec![0xAB; 4096]).unwrap(), 4096);
    assert_eq!(mounted.bytes_used(), 4096);
    assert_eq!(
        file.write(4096, &[0xCD]),
        Err(KernelError::Fs(FsError::NoSpace))
    );
    assert_eq!(mounted.bytes_used(), 4096);
}

#[test]
fn tmpfs_is_the_same_filesystem() {
    fs::init();
    let mounted = fs::mount("tmpfs", "size=8k").unwrap();
    assert_eq!(mounted.magic(), RAMFS_MAGIC);
    assert_eq!(mounted.max_bytes(), 8192);

    let root = mounted.root();
    root.mkdir("d", 0o755).unwrap();
    let found = root.lookup("d").unwrap();
    assert_eq!(found.node_type(), InodeType::Directory);

    fs::unmount("tmpfs", &mounted).unwrap();
}

#[test]
fn directory_tree_operations_end_to_end() {
    fs::init();
    let mounted = fs::mount("ramfs", "").unwrap();
    let root = mounted.root();

    let dir = root.mkdir("etc", 0o755).unwrap();
    let file = dir.create("hosts", DEFAULT_FILE_MODE).unwrap();
    file.write(0, b"127.0.0.1 localhost\n").unwrap();

    // Path resolution through lookup, one component at a time.
    let resolved = root.lookup("etc").unwrap().lookup("hosts").unwrap();
    let mut buf = [0u8; 64];
    let n = resolved.read(0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"127.0.0.1 localhost\n");

    // rmdir refuses while the directory still has real entries.
    assert_eq!(
        root.rmdir("etc"),
        Err(KernelError::Fs(FsError::DirectoryNotEmpty))
    );
    dir.unlink("hosts").unwrap();
    root.rmdir("etc").unwrap();
    assert_eq!(mounted.bytes_used(), 0);
}

#[test]
fn readdir_lists_dot_entries_first() {
    fs::init();
    let mounted = fs::mount("ramfs", "").unwrap();
    let root = mounted.root();
    root.create("zz", DEFAULT_FILE_MODE).unwrap();
    root.mkdir("aa", 0o755).unwrap();

    let names: Vec<String> = root
        .readdir()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(&names[..2], &[".".to_string(), "..".to_string()]);
    assert!(names.contains(&"zz".to_string()));
    assert!(names.contains(&"aa".to_string()));
}

#[test]
fn symlink_read_and_buffer_limits() {
    fs::init();
    let mounted = fs::mount("ramfs", "").unwrap();
    let root = mounted.root();

    let link = root.symlink("cfg", "/etc/config").unwrap();
    assert_eq!(link.node_type(), InodeType::Symlink);
    assert_eq!(link.metadata().size, 11);

    let mut buf = [0u8; 32];
    let n = link.readlink(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"/etc/config");

    let mut tiny = [0u8; 3];
    assert_eq!(
        link.readlink(&mut tiny),
        Err(KernelError::Fs(FsError::BufferTooSmall))
    );
}

#[test]
fn bad_mount_option_fails() {
    fs::init();
    assert_eq!(
        fs::mount("ramfs", "size=banana").map(|_| ()),
        Err(KernelError::Fs(FsError::InvalidMountOption))
    );
}
