//! Application-processor bring-up
//!
//! The BSP starts each AP with the INIT/SIPI/SIPI sequence: an INIT IPI, a
//! ~10 ms settle, a SIPI with the trampoline vector, a ~200 µs settle, and
//! a second SIPI, then polls the AP's online flag with a bounded timeout.
//! The IPI transport and delays sit behind a trait so the sequence can run
//! against hardware or a test double; the busy-wait delay can be swapped
//! for a calibrated timer without touching the sequence.

use crate::error::{KernelResult, SmpError};

use super::percpu::{PerCpu, SmpContext};

/// Delay after the INIT IPI, microseconds.
pub const INIT_SETTLE_US: u64 = 10_000;

/// Delay between the two SIPIs, microseconds.
pub const SIPI_SETTLE_US: u64 = 200;

/// Interval between online-flag polls, microseconds.
const POLL_INTERVAL_US: u64 = 100;

/// Total bounded wait for an AP to come online, microseconds.
pub const AP_STARTUP_TIMEOUT_US: u64 = 100_000;

/// Seam over the local APIC's inter-processor interrupts and the delay
/// source used between them.
pub trait IpiTransport {
    /// Send an INIT IPI to the CPU with `apic_id`.
    fn send_init(&self, apic_id: u8);
    /// Send a startup IPI with the trampoline page `vector`.
    fn send_sipi(&self, apic_id: u8, vector: u8);
    /// Wait at least `us` microseconds.
    fn delay_us(&self, us: u64);
}

/// Bring up one AP and wait for it to report online.
pub fn start_ap(cpu: &PerCpu, transport: &dyn IpiTransport, vector: u8) -> KernelResult<()> {
    if cpu.info.is_bsp {
        return Err(SmpError::CannotStartBsp.into());
    }
    if cpu.is_online() {
        return Ok(());
    }

    let apic_id = cpu.info.apic_id;
    transport.send_init(apic_id);
    transport.delay_us(INIT_SETTLE_US);
    transport.send_sipi(apic_id, vector);
    transport.delay_us(SIPI_SETTLE_US);
    transport.send_sipi(apic_id, vector);

    let mut waited = 0;
    while waited < AP_STARTUP_TIMEOUT_US {
        if cpu.is_online() {
            log::info!(target: "smp", "cpu {} (apic {}) online", cpu.info.cpu_id, apic_id);
            return Ok(());
        }
        transport.delay_us(POLL_INTERVAL_US);
        waited += POLL_INTERVAL_US;
    }
    log::warn!(target: "smp", "cpu {} (apic {}) startup timeout", cpu.info.cpu_id, apic_id);
    Err(SmpError::ApStartupTimeout.into())
}

/// Bring up every AP in the context. Returns the number now online
/// (including the BSP); APs that time out stay offline.
pub fn start_all_aps(
    ctx: &SmpContext,
    transport: &dyn IpiTransport,
    vector: u8,
) -> KernelResult<usize> {
    for cpu in ctx.cpus() {
        if cpu.info.is_bsp {
            continue;
        }
        match start_ap(cpu, transport, vector) {
            Ok(()) => {}
            Err(e) => {
                log::warn!(target: "smp", "cpu {} failed: {}", cpu.info.cpu_id, e);
            }
        }
    }
    Ok(ctx.online_count())
}

/// Entry path run by each AP once the trampoline lands in Rust: mark the
/// CPU online; the caller then enables its local APIC and parks in the
/// idle loop.
pub fn ap_entry(cpu: &PerCpu) {
    cpu.mark_online();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::smp::madt::{build_test_madt, discover_cpus};
    use core::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::vec::Vec;

    /// Test double: records the IPI sequence and, when armed, flips the
    /// target AP online after the second SIPI.
    struct MockApic<'a> {
        ctx: &'a SmpContext,
        wake_on_second_sipi: bool,
        sipis_seen: AtomicU64,
        log: Mutex<Vec<(&'static str, u8)>>,
    }

    impl IpiTransport for MockApic<'_> {
        fn send_init(&self, apic_id: u8) {
            self.log.lock().unwrap().push(("init", apic_id));
        }

        fn send_sipi(&self, apic_id: u8, vector: u8) {
            assert_eq!(vector, 0x08);
            self.log.lock().unwrap().push(("sipi", apic_id));
            let seen = self.sipis_seen.fetch_add(1, Ordering::SeqCst) + 1;
            if self.wake_on_second_sipi && seen % 2 == 0 {
                for cpu in self.ctx.cpus() {
                    if cpu.info.apic_id == apic_id {
                        ap_entry(cpu);
                    }
                }
            }
        }

        fn delay_us(&self, _us: u64) {}
    }

    fn context() -> SmpContext {
        let table = build_test_madt(&[(0, 0, true), (1, 1, true), (2, 3, true)]);
        SmpContext::new(discover_cpus(&table, 0).unwrap())
    }

    #[test]
    fn full_bring_up_follows_init_sipi_sipi() {
        let ctx = context();
        let apic = MockApic {
            ctx: &ctx,
            wake_on_second_sipi: true,
            sipis_seen: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        };

        let online = start_all_aps(&ctx, &apic, 0x08).unwrap();
        assert_eq!(online, 3);

        let log = apic.log.lock().unwrap();
        let expected: Vec<(&str, u8)> = alloc::vec![
            ("init", 1),
            ("sipi", 1),
            ("sipi", 1),
            ("init", 3),
            ("sipi", 3),
            ("sipi", 3),
        ];
        assert_eq!(*log, expected);
    }

    #[test]
    fn unresponsive_ap_times_out() {
        let ctx = context();
        let apic = MockApic {
            ctx: &ctx,
            wake_on_second_sipi: false,
            sipis_seen: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        };

        let result = start_ap(ctx.cpu(1).unwrap(), &apic, 0x08);
        assert_eq!(result, Err(KernelError::Smp(SmpError::ApStartupTimeout)));
        assert_eq!(ctx.online_count(), 1);
    }

    #[test]
    fn bsp_cannot_be_started() {
        let ctx = context();
        let apic = MockApic {
            ctx: &ctx,
            wake_on_second_sipi: true,
            sipis_seen: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        };
        assert_eq!(
            start_ap(ctx.cpu(0).unwrap(), &apic, 0x08),
            Err(KernelError::Smp(SmpError::CannotStartBsp))
        );
    }

    #[test]
    fn already_online_ap_is_a_no_op() {
        let ctx = context();
        ctx.cpu(1).unwrap().mark_online();
        let apic = MockApic {
            ctx: &ctx,
            wake_on_second_sipi: false,
            sipis_seen: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        };
        start_ap(ctx.cpu(1).unwrap(), &apic, 0x08).unwrap();
        assert!(apic.log.lock().unwrap().is_empty());
    }
}
