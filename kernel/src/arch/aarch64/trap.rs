//! Entry points shared with the external trap glue
//!
//! The vector table, register save/restore and the context-switch primitive
//! are assembly collaborators. On any exception the glue stores a
//! [`ContextFrame`](crate::arch::context::ContextFrame) at the top of the
//! current process's kernel stack and calls one of the exported handlers
//! below with a pointer to it; on return it restores the frame and `eret`s.

use crate::arch::context::ContextFrame;

/// Exception class (ESR_EL1.EC) for an AArch64 `svc`.
const EC_SVC64: u64 = 0b01_0101;

extern "C" {
    /// Install the EL1 vector table. Glue symbol.
    pub fn trap_vectors_init();

    /// Restore the context frame on the current kernel stack and `eret`.
    /// Freshly created processes are dispatched through here.
    pub fn user_trap_return() -> !;

    /// The context-switch primitive: saves callee-saved registers on the
    /// current stack, stores SP through `old_sp`, reloads SP from `new_sp`
    /// and pops. Passing the same slot for both is a harmless round trip.
    pub fn cpu_switch(old_sp: *mut usize, new_sp: *const usize);
}

/// Synchronous exception from EL0: a syscall, or a fault that kills the
/// offending process.
#[no_mangle]
pub extern "C" fn kernel_sync_trap(frame: *mut ContextFrame) {
    // SAFETY: the glue passes a frame it just stored on the current kernel
    // stack; it stays valid for the duration of the handler.
    let frame = unsafe { &mut *frame };
    if frame.esr >> 26 == EC_SVC64 {
        crate::syscall::dispatch(frame);
    } else {
        log::error!(
            "fault: esr={:#x} elr={:#x}, killing current process",
            frame.esr,
            frame.elr
        );
        crate::sched::fatal_fault_exit();
    }
}

/// Timer IRQ: tick accounting, tick wakeups, then preemption.
#[no_mangle]
pub extern "C" fn kernel_timer_irq(_frame: *mut ContextFrame) {
    crate::sched::handle_timer_irq();
}

/// Receive path of the external UART driver.
#[no_mangle]
pub extern "C" fn kernel_uart_rx(byte: u8) {
    crate::console::on_receive(byte);
}
