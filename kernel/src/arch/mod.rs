//! Architecture support
//!
//! [`context`] defines the saved-register layouts shared with the external
//! trap glue and context-switch primitive; everything that touches system
//! registers or instructions lives under [`aarch64`] and only builds for the
//! bare-metal target.

pub mod context;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

/// Address the context-switch primitive returns to when a freshly created
/// process is dispatched for the first time: the trap glue's
/// restore-and-`eret` epilogue.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn trap_return_addr() -> usize {
    aarch64::trap::user_trap_return as usize
}

/// Host builds never dispatch; the seeded link register is only inspected by
/// tests.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn trap_return_addr() -> usize {
    0
}

/// Wait for an interrupt; the idle process's whole job.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn wait_for_interrupt() {
    cortex_a::asm::wfi();
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn wait_for_interrupt() {}
