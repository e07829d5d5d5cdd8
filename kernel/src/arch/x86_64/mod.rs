//! x86-64 privileged operations
//!
//! Only compiled for bare-metal builds; the host target uses the no-op
//! wrappers in the parent module.

use x86_64::instructions::tlb;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;
use x86_64::{PhysAddr, VirtAddr};

use crate::mm::{PhysicalAddress, VirtualAddress};
use crate::smp::IpiTransport;

/// Base of the xAPIC register window.
const LAPIC_BASE: u64 = 0xFEE0_0000;
/// Local APIC id register.
const LAPIC_ID: u64 = 0x20;
/// Interrupt command register, low half.
const LAPIC_ICR_LOW: u64 = 0x300;
/// Interrupt command register, high half (destination).
const LAPIC_ICR_HIGH: u64 = 0x310;

/// ICR delivery mode: INIT.
const ICR_INIT: u32 = 0x0000_4500;
/// ICR delivery mode: startup, vector in the low byte.
const ICR_SIPI: u32 = 0x0000_4600;

/// Disable interrupts and halt forever.
pub fn halt() -> ! {
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

/// Point CR3 at a new L4 table.
pub fn write_cr3(root: PhysicalAddress) {
    let frame = PhysFrame::containing_address(PhysAddr::new(root.as_u64()));
    // SAFETY: the caller hands over the root of a valid, fully formed page
    // table hierarchy that keeps the executing kernel mapped.
    unsafe { Cr3::write(frame, Cr3Flags::empty()) };
}

/// Invalidate one TLB entry.
pub fn invlpg(page: VirtualAddress) {
    tlb::flush(VirtAddr::new(page.as_u64()));
}

/// Full TLB flush by CR3 reload.
pub fn reload_cr3() {
    tlb::flush_all();
}

fn lapic_read(offset: u64) -> u32 {
    let addr = crate::mm::phys_to_virt(PhysicalAddress::new(LAPIC_BASE + offset)) as *const u32;
    // SAFETY: the xAPIC window is mapped by the boot page tables; register
    // reads are side-effect free for the registers used here.
    unsafe { addr.read_volatile() }
}

fn lapic_write(offset: u64, value: u32) {
    let addr = crate::mm::phys_to_virt(PhysicalAddress::new(LAPIC_BASE + offset)) as *mut u32;
    // SAFETY: as above; the ICR is the only register written.
    unsafe { addr.write_volatile(value) };
}

/// APIC id of the executing CPU.
pub fn apic_id() -> u8 {
    (lapic_read(LAPIC_ID) >> 24) as u8
}

/// IPI transport backed by the local xAPIC, with TSC busy-wait delays.
/// The delay source can move to a calibrated timer without touching the
/// bring-up sequence.
pub struct LocalApic;

impl IpiTransport for LocalApic {
    fn send_init(&self, apic_id: u8) {
        lapic_write(LAPIC_ICR_HIGH, (apic_id as u32) << 24);
        lapic_write(LAPIC_ICR_LOW, ICR_INIT);
    }

    fn send_sipi(&self, apic_id: u8, vector: u8) {
        lapic_write(LAPIC_ICR_HIGH, (apic_id as u32) << 24);
        lapic_write(LAPIC_ICR_LOW, ICR_SIPI | vector as u32);
    }

    fn delay_us(&self, us: u64) {
        let start = crate::time::monotonic_us();
        while crate::time::monotonic_us().wrapping_sub(start) < us {
            core::hint::spin_loop();
        }
    }
}
