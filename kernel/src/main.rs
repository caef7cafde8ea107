//! Kernel entry point
//!
//! The boot glue runs first: it parks secondary PEs, sets up the EL1 high
//! half behind `TTBR1_EL1`, loads the disk image into RAM, and only then
//! calls [`kernel_main`] with the image location and the end of the loaded
//! kernel. Everything after that is ours.

#![cfg_attr(all(target_arch = "aarch64", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "aarch64", target_os = "none"), no_main)]

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod boot {
    use basalt_kernel::arch::aarch64::{irq_mask, irq_unmask, timer, trap};
    use basalt_kernel::arch::wait_for_interrupt;
    use basalt_kernel::fs::Fat16Volume;
    use basalt_kernel::mm::MEMORY_END;
    use basalt_kernel::process::fork::spawn_program;
    use basalt_kernel::{heap_init, klog, println};

    /// First Rust code after the boot glue. IRQs are still masked.
    #[no_mangle]
    pub extern "C" fn kernel_main(disk_base: usize, disk_len: usize, kernel_end: usize) -> ! {
        println!("basalt {} booting", env!("CARGO_PKG_VERSION"));

        heap_init();
        klog::init();

        {
            // SAFETY: boot runs single-threaded with IRQs masked.
            let mut k = unsafe { basalt_kernel::kernel::kernel() };

            // SAFETY: the glue guarantees [kernel_end, MEMORY_END) is free
            // RAM and the disk image lives below kernel_end.
            unsafe {
                k.phys.init(kernel_end, MEMORY_END);
                k.volume = Some(Fat16Volume::mount(
                    basalt_kernel::mm::phys_to_virt(disk_base),
                    disk_len,
                ));
            }

            k.procs.install_idle();
            spawn_program(&mut k, "INIT.BIN").expect("boot: cannot start init");
        }

        // SAFETY: glue symbol; vectors are in the image.
        unsafe { trap::trap_vectors_init() };
        timer::start();
        log::info!("boot complete, entering idle");
        irq_unmask();

        // The boot thread from here on is the idle process: its saved
        // context lands in slot 0 at the first preemption.
        loop {
            let shutdown = {
                irq_mask();
                // SAFETY: IRQs just masked; no other borrower can exist.
                let k = unsafe { basalt_kernel::kernel::kernel() };
                let shutdown = k.sched.shutdown;
                drop(k);
                irq_unmask();
                shutdown
            };
            if shutdown {
                break;
            }
            wait_for_interrupt();
        }

        println!("basalt halted");
        irq_mask();
        loop {
            wait_for_interrupt();
        }
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn main() {
    // The kernel image only means something on the bare-metal target; host
    // builds exist for the test suite in the library crate.
    eprintln!("basalt-kernel is a bare-metal aarch64 image; run the tests instead");
}
