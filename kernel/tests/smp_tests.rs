//! SMP discovery and bring-up integration tests

use std::sync::atomic::{AtomicUsize, Ordering};

use basalt_kernel::error::{KernelError, SmpError};
use basalt_kernel::smp::madt::build_test_madt;
use basalt_kernel::smp::{discover_cpus, start_all_aps, IpiTransport, SmpContext};

/// Transport double that wakes each AP on its second SIPI.
struct WakingApic<'a> {
    ctx: &'a SmpContext,
    sipis: AtomicUsize,
}

impl IpiTransport for WakingApic<'_> {
    fn send_init(&self, _apic_id: u8) {}

    fn send_sipi(&self, apic_id: u8, _vector: u8) {
        if self.sipis.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            for cpu in self.ctx.cpus() {
                if cpu.info.apic_id == apic_id {
                    cpu.mark_online();
                }
            }
        }
    }

    fn delay_us(&self, _us: u64) {}
}

/// Transport double where one APIC id never responds.
struct PartiallyDeadApic<'a> {
    ctx: &'a SmpContext,
    dead_apic: u8,
}

impl IpiTransport for PartiallyDeadApic<'_> {
    fn send_init(&self, _apic_id: u8) {}

    fn send_sipi(&self, apic_id: u8, _vector: u8) {
        if apic_id == self.dead_apic {
            return;
        }
        for cpu in self.ctx.cpus() {
            if cpu.info.apic_id == apic_id {
                cpu.mark_online();
            }
        }
    }

    fn delay_us(&self, _us: u64) {}
}

#[test]
fn discovery_assigns_ids_and_marks_bsp() {
    let table = build_test_madt(&[(0, 0, true), (1, 2, true), (2, 4, true), (3, 6, false)]);
    let cpus = discover_cpus(&table, 2).unwrap();

    assert_eq!(cpus.len(), 3);
    assert_eq!(cpus[0].cpu_id, 0);
    assert!(cpus.iter().all(|c| c.enabled));
    let bsp: Vec<_> = cpus.iter().filter(|c| c.is_bsp).collect();
    assert_eq!(bsp.len(), 1);
    assert_eq!(bsp[0].apic_id, 2);
}

#[test]
fn full_machine_bring_up() {
    let table = build_test_madt(&[(0, 0, true), (1, 1, true), (2, 2, true), (3, 3, true)]);
    let ctx = SmpContext::new(discover_cpus(&table, 0).unwrap());
    assert_eq!(ctx.online_count(), 1);

    let apic = WakingApic {
        ctx: &ctx,
        sipis: AtomicUsize::new(0),
    };
    let online = start_all_aps(&ctx, &apic, 0x08).unwrap();
    assert_eq!(online, 4);
}

#[test]
fn dead_ap_times_out_without_blocking_the_rest() {
    let table = build_test_madt(&[(0, 0, true), (1, 1, true), (2, 2, true)]);
    let ctx = SmpContext::new(discover_cpus(&table, 0).unwrap());

    let apic = PartiallyDeadApic {
        ctx: &ctx,
        dead_apic: 1,
    };
    let online = start_all_aps(&ctx, &apic, 0x08).unwrap();
    assert_eq!(online, 2);
    assert!(!ctx.cpu(1).unwrap().is_online());
    assert!(ctx.cpu(2).unwrap().is_online());

    // Starting the dead AP alone reports the timeout directly.
    assert_eq!(
        basalt_kernel::smp::start_ap(ctx.cpu(1).unwrap(), &apic, 0x08),
        Err(KernelError::Smp(SmpError::ApStartupTimeout))
    );
}

#[test]
fn missing_madt_surfaces_no_madt() {
    assert_eq!(
        discover_cpus(b"not a table", 0),
        Err(KernelError::Smp(SmpError::NoMadt))
    );
}
