//! Per-CPU data
//!
//! Each discovered CPU gets a descriptor with its own kernel stack and an
//! online flag. The BSP is online from init; APs flip their flag from the
//! AP entry path once they are running.

use alloc::boxed::Box;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{KernelResult, SmpError};

use super::CpuInfo;

/// Kernel stack size per CPU (16 KiB).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Runtime state of one CPU.
pub struct PerCpu {
    /// Discovery record.
    pub info: CpuInfo,
    /// Kernel stack backing storage.
    kernel_stack: Box<[u8]>,
    online: AtomicBool,
}

impl PerCpu {
    fn new(info: CpuInfo) -> Self {
        Self {
            info,
            kernel_stack: alloc::vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice(),
            online: AtomicBool::new(false),
        }
    }

    /// Top of this CPU's kernel stack (stacks grow down).
    pub fn kernel_stack_top(&self) -> *const u8 {
        // The range is in bounds: one past the last element is allowed.
        unsafe { self.kernel_stack.as_ptr().add(KERNEL_STACK_SIZE) }
    }

    /// Whether the CPU has completed bring-up.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Mark this CPU online; called from its own entry path.
    pub fn mark_online(&self) {
        self.online.store(true, Ordering::Release);
    }

    /// Mark this CPU offline.
    pub fn mark_offline(&self) {
        self.online.store(false, Ordering::Release);
    }
}

/// All CPUs of the machine.
pub struct SmpContext {
    cpus: Vec<PerCpu>,
}

impl SmpContext {
    /// Build per-CPU state from discovery output. The BSP is online
    /// immediately.
    pub fn new(cpus: Vec<CpuInfo>) -> Self {
        let cpus: Vec<PerCpu> = cpus.into_iter().map(PerCpu::new).collect();
        for cpu in &cpus {
            if cpu.info.is_bsp {
                cpu.mark_online();
            }
        }
        Self { cpus }
    }

    /// Descriptor for `cpu_id`.
    pub fn cpu(&self, cpu_id: u32) -> KernelResult<&PerCpu> {
        self.cpus
            .iter()
            .find(|c| c.info.cpu_id == cpu_id)
            .ok_or_else(|| SmpError::InvalidCpuId.into())
    }

    /// All descriptors.
    pub fn cpus(&self) -> &[PerCpu] {
        &self.cpus
    }

    /// The bootstrap processor.
    pub fn bsp(&self) -> Option<&PerCpu> {
        self.cpus.iter().find(|c| c.info.is_bsp)
    }

    /// Number of CPUs currently online.
    pub fn online_count(&self) -> usize {
        self.cpus.iter().filter(|c| c.is_online()).count()
    }

    /// Take a CPU offline. The BSP cannot go offline.
    pub fn offline_cpu(&self, cpu_id: u32) -> KernelResult<()> {
        let cpu = self.cpu(cpu_id)?;
        if cpu.info.is_bsp {
            return Err(SmpError::CannotOfflineBsp.into());
        }
        cpu.mark_offline();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::smp::madt::{build_test_madt, discover_cpus};

    fn context() -> SmpContext {
        let table = build_test_madt(&[(0, 0, true), (1, 1, true), (2, 2, true)]);
        SmpContext::new(discover_cpus(&table, 0).unwrap())
    }

    #[test]
    fn bsp_is_online_at_init() {
        let ctx = context();
        assert_eq!(ctx.online_count(), 1);
        assert!(ctx.bsp().unwrap().is_online());
        assert!(!ctx.cpu(1).unwrap().is_online());
    }

    #[test]
    fn stacks_are_distinct_and_sized() {
        let ctx = context();
        let tops: Vec<_> = ctx.cpus().iter().map(|c| c.kernel_stack_top()).collect();
        assert_eq!(tops.len(), 3);
        assert_ne!(tops[0], tops[1]);
        assert_ne!(tops[1], tops[2]);
    }

    #[test]
    fn offline_rules() {
        let ctx = context();
        ctx.cpu(1).unwrap().mark_online();
        assert_eq!(ctx.online_count(), 2);
        ctx.offline_cpu(1).unwrap();
        assert_eq!(ctx.online_count(), 1);
        assert_eq!(
            ctx.offline_cpu(0),
            Err(KernelError::Smp(SmpError::CannotOfflineBsp))
        );
        assert_eq!(
            ctx.offline_cpu(99),
            Err(KernelError::Smp(SmpError::InvalidCpuId))
        );
    }
}
