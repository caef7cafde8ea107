//! AArch64 bare-metal support
//!
//! Everything here talks to system registers or to the external assembly
//! collaborators (trap vectors, context-switch primitive, UART and timer
//! drivers), so it only builds for the bare-metal target.

#[cfg(target_os = "none")]
pub mod serial;

#[cfg(target_os = "none")]
pub mod timer;

#[cfg(target_os = "none")]
pub mod trap;

/// Mask IRQs at EL1. Boot code runs masked until the first dispatch.
#[cfg(target_os = "none")]
pub fn irq_mask() {
    // SAFETY: flips the I bit in DAIF; no memory is touched.
    unsafe { core::arch::asm!("msr daifset, #2", options(nostack, preserves_flags)) };
}

/// Unmask IRQs at EL1.
#[cfg(target_os = "none")]
pub fn irq_unmask() {
    // SAFETY: as above.
    unsafe { core::arch::asm!("msr daifclr, #2", options(nostack, preserves_flags)) };
}
