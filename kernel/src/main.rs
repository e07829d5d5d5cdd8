//! BasaltOS kernel binary
//!
//! Bare-metal entry: receives the boot info, brings up the ambient stack
//! (heap, logging), hands the usable memory map to the frame allocator,
//! registers the built-in filesystems, creates the init process, and parks.
//! On the host target this is a stub so the workspace builds everywhere.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod boot {
    use bootloader_api::config::Mapping;
    use bootloader_api::info::MemoryRegionKind;
    use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

    use basalt_kernel::mm::{self, MemoryRegion, PhysicalAddress, PAGE_SIZE};
    use basalt_kernel::process::{self, ProcessState};
    use basalt_kernel::{fs, klog, println};

    const HEAP_SIZE: usize = 1024 * 1024;
    static mut KERNEL_HEAP: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

    pub static BOOTLOADER_CONFIG: BootloaderConfig = {
        let mut config = BootloaderConfig::new_default();
        config.mappings.physical_memory = Some(Mapping::Dynamic);
        config
    };

    entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        // SAFETY: the heap array is used exactly once, here.
        unsafe {
            basalt_kernel::init_heap(
                core::ptr::addr_of_mut!(KERNEL_HEAP) as *mut u8,
                HEAP_SIZE,
            );
        }
        klog::init();
        println!("BasaltOS v{}", env!("CARGO_PKG_VERSION"));

        if let Some(offset) = boot_info.physical_memory_offset.into_option() {
            mm::set_phys_offset(offset);
        }

        // Hand every usable region to the frame allocator.
        for region in boot_info.memory_regions.iter() {
            if region.kind != MemoryRegionKind::Usable {
                continue;
            }
            let start = (region.start as usize).next_multiple_of(PAGE_SIZE);
            let end = region.end as usize & !(PAGE_SIZE - 1);
            if end > start {
                mm::init(MemoryRegion::new(
                    PhysicalAddress::new(start as u64),
                    (end - start) / PAGE_SIZE,
                ));
            }
        }

        fs::init();

        let init = process::table::create_process("init", process::INIT_PID)
            .expect("cannot create the init process");
        init.set_state(ProcessState::Running);
        process::set_current(Some(init.pid));

        // CPU discovery needs the MADT; without ACPI tables from the boot
        // stage the BSP runs alone.
        log::info!(target: "smp", "bsp apic id {}", basalt_kernel::arch::current_apic_id());

        log::info!(target: "kernel", "core initialized");
        basalt_kernel::arch::halt();
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        println!("[KERNEL PANIC] {}", info);
        basalt_kernel::arch::halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    println!(
        "basalt-kernel {}: bare-metal image, nothing to run on the host",
        env!("CARGO_PKG_VERSION")
    );
}
