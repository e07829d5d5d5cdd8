//! Page-fault dispatch
//!
//! The architecture trap handler decodes the fault into a [`PageFaultInfo`]
//! and calls [`handle_page_fault`]. Faults resolve through the current
//! process's address space (copy-on-write writes succeed and restart the
//! instruction); anything else is an [`AccessViolation`] that reaches
//! userland as SIGSEGV with the faulting address attached.

use crate::process;
use crate::signal::queue::{SigInfo, SEGV_ACCERR, SEGV_MAPERR};
use crate::signal::SIGSEGV;

use super::VirtualAddress;

/// Why an access could not be satisfied, mirrored into `si_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegvCode {
    /// No mapping covers the address (SEGV_MAPERR).
    MapErr,
    /// A mapping exists but denies the access (SEGV_ACCERR).
    AccErr,
}

impl SegvCode {
    /// The `si_code` value delivered with SIGSEGV.
    pub fn si_code(self) -> i32 {
        match self {
            Self::MapErr => SEGV_MAPERR,
            Self::AccErr => SEGV_ACCERR,
        }
    }
}

/// A fault the memory subsystem refused to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessViolation {
    /// The faulting virtual address.
    pub addr: VirtualAddress,
    /// Whether the access was a write.
    pub is_write: bool,
    /// Classification for userland.
    pub code: SegvCode,
}

impl AccessViolation {
    /// Build a violation record.
    pub fn new(addr: VirtualAddress, is_write: bool, code: SegvCode) -> Self {
        Self {
            addr,
            is_write,
            code,
        }
    }
}

/// Fault description decoded from the trap frame.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// Faulting virtual address (CR2).
    pub fault_va: VirtualAddress,
    /// Whether the access was a write.
    pub is_write: bool,
    /// Whether the fault came from user mode.
    pub is_user: bool,
    /// Instruction pointer at the fault.
    pub instruction_pointer: u64,
}

impl PageFaultInfo {
    /// Decode an x86-64 page-fault error code together with CR2 and RIP.
    ///
    /// Error code bits: 0 = present (protection) vs not-present, 1 = write,
    /// 2 = user mode, 4 = instruction fetch.
    pub fn from_error_code(error_code: u64, cr2: u64, rip: u64) -> Self {
        Self {
            fault_va: VirtualAddress::new(cr2),
            is_write: error_code & 0x2 != 0,
            is_user: error_code & 0x4 != 0,
            instruction_pointer: rip,
        }
    }
}

/// Resolve a fault against the current process's address space. On success
/// the faulting instruction may be restarted.
pub fn handle_page_fault(fault_va: VirtualAddress, is_write: bool) -> Result<(), AccessViolation> {
    let Some(process) = process::current_process() else {
        return Err(AccessViolation::new(fault_va, is_write, SegvCode::MapErr));
    };
    let result = process.address_space.handle_fault(fault_va, is_write);
    if result.is_ok() {
        process.rusage.record_minor_fault();
    }
    result
}

/// Full dispatch path for a decoded fault: resolve it, or convert the
/// violation into a queued SIGSEGV for the current process.
pub fn dispatch(info: PageFaultInfo) -> Result<(), AccessViolation> {
    match handle_page_fault(info.fault_va, info.is_write) {
        Ok(()) => Ok(()),
        Err(violation) => {
            if info.is_user {
                deliver_segv(violation);
            }
            Err(violation)
        }
    }
}

/// Queue SIGSEGV for the current process, carrying the fault address and
/// the SEGV_* classification.
pub fn deliver_segv(violation: AccessViolation) {
    if let Some(process) = process::current_process() {
        let info = SigInfo {
            signal: SIGSEGV,
            code: violation.code.si_code(),
            value: violation.addr.as_u64(),
            sender_pid: 0,
        };
        process.signals.queue(SIGSEGV, info).ok();
        log::debug!(
            target: "mm",
            "SIGSEGV pid {} at {:#x} ({:?})",
            process.pid,
            violation.addr.as_u64(),
            violation.code
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::test_support::init_test_arena;
    use crate::mm::{VmaFlags, PAGE_SIZE};
    use crate::process::table::create_process;
    use crate::process::{set_current, INIT_PID};

    #[test]
    fn error_code_decoding() {
        let info = PageFaultInfo::from_error_code(0x6, 0xDEAD_B000, 0x40_2000);
        assert!(info.is_write);
        assert!(info.is_user);
        assert_eq!(info.fault_va.as_u64(), 0xDEAD_B000);

        let info = PageFaultInfo::from_error_code(0x0, 0x1000, 0);
        assert!(!info.is_write);
        assert!(!info.is_user);
    }

    #[test]
    fn user_violation_queues_sigsegv() {
        init_test_arena();
        let _current = crate::process::table::test_guard::lock();
        let process = create_process("segv-test", INIT_PID).unwrap();
        process
            .address_space
            .map_region(
                VirtualAddress::new(0x60_0000),
                PAGE_SIZE,
                VmaFlags::READ,
            )
            .unwrap();
        set_current(Some(process.pid));

        let info = PageFaultInfo {
            fault_va: VirtualAddress::new(0x60_0008),
            is_write: true,
            is_user: true,
            instruction_pointer: 0,
        };
        let violation = dispatch(info).unwrap_err();
        assert_eq!(violation.code, SegvCode::AccErr);

        let queued = process.signals.dequeue().unwrap();
        assert_eq!(queued.signal, SIGSEGV);
        assert_eq!(queued.code, SEGV_ACCERR);
        assert_eq!(queued.value, 0x60_0008);

        set_current(None);
    }
}
