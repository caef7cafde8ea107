//! Basalt kernel library
//!
//! A minimal preemptive multitasking kernel for AArch64: EL1 kernel / EL0
//! user split, 2 MiB pages, a single core, a read-only FAT16 volume and a
//! UNIX-style open-file model.
//!
//! The crate builds for two worlds. On the bare-metal target it is the
//! kernel proper, with the trap glue, context-switch primitive and MMIO
//! drivers linked in as external collaborators. On the host it compiles
//! against `std` so the standard `#[test]` harness can drive the process
//! table, scheduler, signals, file system and page-table code directly.

#![no_std]

extern crate alloc;

// Host target: use the system allocator so unit tests can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

// Bare metal: a fixed heap region handed to the linked-list allocator at
// boot. The heap only backs small kernel allocations (queue nodes, names,
// argv staging); process memory comes from the 2 MiB page pool.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Size of the bare-metal kernel heap.
#[cfg(target_os = "none")]
pub const KERNEL_HEAP_SIZE: usize = 1 << 20;

#[cfg(target_os = "none")]
static mut KERNEL_HEAP: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

/// Hand the static heap region to the allocator. Called once from boot.
#[cfg(target_os = "none")]
pub fn heap_init() {
    // SAFETY: called once, before any allocation; the region is reserved
    // for the allocator alone.
    unsafe {
        ALLOCATOR
            .lock()
            .init(core::ptr::addr_of_mut!(KERNEL_HEAP) as *mut u8, KERNEL_HEAP_SIZE);
    }
}

#[macro_use]
pub mod print;

pub mod arch;
pub mod console;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod klog;
pub mod mm;
pub mod process;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod integration_tests;

#[cfg(test)]
pub mod test_support;

use core::sync::atomic::{AtomicU64, Ordering};

/// 10 ms ticks since boot.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Current uptime in timer ticks.
pub fn timer_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Bump the tick counter from the timer IRQ. Returns the new tick.
pub fn advance_tick() -> u64 {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", info);
    #[cfg(target_arch = "aarch64")]
    crate::arch::aarch64::irq_mask();
    loop {
        crate::arch::wait_for_interrupt();
    }
}
