//! Process forking
//!
//! Creates a child as a copy of the parent. The address space is forked
//! copy-on-write: every present frame is shared, writable pages become
//! read-only with the COW marker, and frame refcounts grow by one per shared
//! page. Dispositions and the blocked mask are inherited; pending signals
//! are not.

use alloc::format;
use alloc::sync::Arc;

use crate::error::KernelResult;

use super::pcb::{Process, ProcessState};
use super::table;

/// Fork `parent`, returning the registered child.
pub fn fork_process(parent: &Arc<Process>) -> KernelResult<Arc<Process>> {
    let pid = table::allocate_pid();
    let child_space = parent.address_space.fork()?;

    let mut child = Process::new(pid, parent.pid, format!("{}-fork", parent.name), child_space);
    // Dispositions and the blocked mask are inherited; the child is not yet
    // visible, so the queue can be swapped in without racing delivery.
    child.signals = parent.signals.clone_for_fork();
    let child = Arc::new(child);

    child.set_uid(parent.uid());
    child.set_euid(parent.euid());
    child.set_gid(parent.gid());

    if let Some(group) = parent.rgroup.lock().clone() {
        child.join_rgroup(group);
    }

    child.set_state(ProcessState::Ready);
    parent.children.lock().push(pid);
    table::insert(child.clone());

    log::debug!(target: "process", "fork: {} -> {}", parent.pid, child.pid);
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_support::init_test_arena;
    use crate::mm::{VirtualAddress, VmaFlags, PAGE_SIZE};
    use crate::process::{table, INIT_PID};
    use crate::signal::{SigAction, SigHandler, SigInfo, SigSet, SIGTERM, SIGUSR2};

    #[test]
    fn fork_copies_credentials_and_dispositions() {
        init_test_arena();
        let parent = table::create_process("fork-parent", INIT_PID).unwrap();
        parent.set_uid(1000);
        parent
            .signals
            .set_action(
                SIGUSR2,
                SigAction {
                    handler: SigHandler::Handler(0xBEEF),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut mask = SigSet::empty();
        mask.add(SIGTERM);
        parent.signals.block(mask);
        parent.signals.queue(SIGTERM, SigInfo::bare(SIGTERM)).unwrap();

        let child = fork_process(&parent).unwrap();
        assert_eq!(child.ppid(), parent.pid);
        assert_eq!(child.uid(), 1000);
        assert_eq!(
            child.signals.get_action(SIGUSR2).unwrap().handler,
            SigHandler::Handler(0xBEEF)
        );
        assert!(child.signals.blocked().contains(SIGTERM));
        // Pending signals do not cross fork.
        assert!(child.signals.pending().is_empty());
        assert!(parent.children.lock().contains(&child.pid));
    }

    #[test]
    fn fork_shares_memory_copy_on_write() {
        init_test_arena();
        let parent = table::create_process("cow-parent", INIT_PID).unwrap();
        let base = VirtualAddress::new(0x51_0000);
        parent
            .address_space
            .map_region(base, PAGE_SIZE, VmaFlags::READ | VmaFlags::WRITE)
            .unwrap();
        parent.address_space.write_bytes(base, &[0x42]).unwrap();

        let child = fork_process(&parent).unwrap();
        let mut b = [0u8];
        child.address_space.read_bytes(base, &mut b).unwrap();
        assert_eq!(b[0], 0x42);

        parent.address_space.write_bytes(base, &[0x99]).unwrap();
        child.address_space.read_bytes(base, &mut b).unwrap();
        assert_eq!(b[0], 0x42);
        parent.address_space.read_bytes(base, &mut b).unwrap();
        assert_eq!(b[0], 0x99);
    }
}
