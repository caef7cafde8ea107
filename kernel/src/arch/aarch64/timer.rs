//! Generic-timer hookup
//!
//! The periodic timer itself is driven by the external timer driver; this
//! module only asks it for the preemption interval and exposes the kernel's
//! tick accounting to the rest of the crate.

/// Preemption quantum in milliseconds: one tick per 10 ms.
pub const TIMER_INTERVAL_MS: u32 = 10;

extern "C" {
    /// Program the periodic timer and enable its interrupt. Provided by the
    /// external timer driver.
    fn timer_init(interval_ms: u32);
}

/// Start the preemption timer. Called once at the end of boot.
pub fn start() {
    // SAFETY: driver entry point; called once, before interrupts are enabled.
    unsafe { timer_init(TIMER_INTERVAL_MS) };
    log::info!("timer: {} ms preemption quantum", TIMER_INTERVAL_MS);
}
