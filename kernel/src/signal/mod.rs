//! Signals
//!
//! Per process: a pending bitset and a handler table. Delivery is lazy -- the
//! scheduler calls [`check_pending_signals`] on the candidate at the head of
//! the ready queue before granting it the CPU, so a fatal signal takes
//! effect at the next scheduling decision. Sending a signal to a sleeping
//! process pulls it off the wait list first (wake-then-deliver).
//!
//! User handlers run in EL0: the trap frame is rewritten so the next return
//! to user space enters the handler with the signal number in x0, and the
//! interrupted pc is stashed for `sigreturn`. A handler entry resets to the
//! default after one invocation; the user library re-arms it.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::{Pid, ProcessState, INIT_PID};

pub const TOTAL_SIGNALS: usize = 32;

pub const SIGHUP: usize = 1;
pub const SIGINT: usize = 2;
pub const SIGTERM: usize = 15;
pub const SIGCHLD: usize = 17;

/// One entry of the handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalHandler {
    Default,
    /// EL0 entry point of a user-installed handler.
    User(u64),
}

/// Per-process signal state.
#[derive(Debug)]
pub struct SignalState {
    pending: u32,
    handlers: [SignalHandler; TOTAL_SIGNALS],
    /// Status word delivered with SIGCHLD; consumed by the default handler.
    pub child_status: i32,
    /// EL0 pc stashed across a user handler, restored by `sigreturn`.
    pub saved_elr: u64,
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            handlers: [SignalHandler::Default; TOTAL_SIGNALS],
            child_status: 0,
            saved_elr: 0,
        }
    }

    pub fn set_pending(&mut self, sig: usize) {
        debug_assert!(valid_signal(sig));
        self.pending |= 1 << sig;
    }

    pub fn is_pending(&self, sig: usize) -> bool {
        self.pending & (1 << sig) != 0
    }

    /// Clear and return the lowest-numbered pending signal.
    pub fn take_next_pending(&mut self) -> Option<usize> {
        if self.pending == 0 {
            return None;
        }
        let sig = self.pending.trailing_zeros() as usize;
        self.pending &= !(1 << sig);
        Some(sig)
    }

    pub fn handler(&self, sig: usize) -> SignalHandler {
        self.handlers[sig]
    }

    pub fn install(&mut self, sig: usize, entry: u64) {
        self.handlers[sig] = SignalHandler::User(entry);
    }

    pub fn reset_handler(&mut self, sig: usize) {
        self.handlers[sig] = SignalHandler::Default;
    }
}

/// Signal numbers run 1..TOTAL_SIGNALS; 0 is not a signal.
pub fn valid_signal(sig: usize) -> bool {
    (1..TOTAL_SIGNALS).contains(&sig)
}

/// Mark `sig` pending for `pid`. A sleeping target is moved to the ready
/// queue so it observes the signal at its next scheduling; its wait event is
/// left in place, which is what makes an un-killed sleeper go back to sleep.
pub fn send_signal(k: &mut Kernel, pid: Pid, sig: usize) {
    let Some(p) = k.procs.get_mut(pid) else {
        return;
    };
    p.signals.set_pending(sig);
    if p.state == ProcessState::Sleep {
        k.sched.wait.remove(pid);
        let p = k.procs.get_mut(pid).expect("signal: target vanished");
        p.state = ProcessState::Ready;
        k.sched.ready.push(pid);
    }
}

/// Run every pending signal of `pid` through its handler. Called by the
/// scheduler on the ready-queue head; a default action may kill the process
/// and dequeue it, which the scheduler observes by re-checking the head.
pub fn check_pending_signals(k: &mut Kernel, pid: Pid) {
    loop {
        let Some(p) = k.procs.get_mut(pid) else {
            return;
        };
        if p.state == ProcessState::Killed {
            return;
        }
        let Some(sig) = p.signals.take_next_pending() else {
            return;
        };
        match p.signals.handler(sig) {
            SignalHandler::User(entry) => {
                // One-shot: back to default until the user library re-arms.
                p.signals.reset_handler(sig);
                let frame = p.trap_frame_ptr();
                // SAFETY: p owns its kernel stack; single core.
                unsafe {
                    p.signals.saved_elr = (*frame).elr;
                    (*frame).x[0] = sig as u64;
                    (*frame).elr = entry;
                }
            }
            SignalHandler::Default => default_action(k, pid, sig),
        }
    }
}

/// The default disposition: SIGCHLD consumes the stored child status, SIGHUP
/// spares init, everything else terminates the process with the signal
/// number as its status.
fn default_action(k: &mut Kernel, pid: Pid, sig: usize) {
    match sig {
        SIGCHLD => {
            k.procs
                .get_mut(pid)
                .expect("signal: target vanished")
                .signals
                .child_status = 0;
        }
        SIGHUP if pid == INIT_PID => {}
        _ => crate::process::exit::exit_process(k, pid, sig as i32, true),
    }
}

/// The `kill` syscall: deliver `sig` to one process, to every direct child,
/// or broadcast.
pub fn kill(k: &mut Kernel, sender: Pid, target: i64, sig: usize) -> KernelResult<usize> {
    if !valid_signal(sig) {
        return Err(KernelError::InvalidArgument { name: "signal" });
    }
    match target {
        t if t > 0 => {
            let pid = Pid(t as u64);
            if k.procs.get(pid).is_none() {
                return Err(KernelError::NotFound { resource: "pid" });
            }
            send_signal(k, pid, sig);
        }
        0 => {
            let children: Vec<Pid> = k.procs.child_pids(sender).collect();
            for pid in children {
                send_signal(k, pid, sig);
            }
        }
        -1 => broadcast(k, sender, sig),
        _ => return Err(KernelError::InvalidArgument { name: "pid" }),
    }
    Ok(0)
}

/// `kill(-1, sig)`: everyone except the caller, idle and init -- unless the
/// signal is SIGTERM (system shutdown, idle and init are marked too) or
/// SIGHUP (session teardown: orphaned zombies are released and the pid
/// counter rewinds).
fn broadcast(k: &mut Kernel, sender: Pid, sig: usize) {
    let targets: Vec<Pid> = k
        .procs
        .iter_live()
        .map(|p| p.pid)
        .filter(|&pid| pid != sender && pid > INIT_PID)
        .collect();
    for pid in targets {
        send_signal(k, pid, sig);
    }

    if sig == SIGTERM {
        send_signal(k, crate::process::IDLE_PID, SIGTERM);
        send_signal(k, INIT_PID, SIGTERM);
    }

    if sig == SIGHUP {
        let orphans: Vec<Pid> = k
            .sched
            .zombies
            .iter()
            .filter(|&z| {
                k.procs
                    .get(z)
                    .is_some_and(|p| p.ppid != INIT_PID)
            })
            .collect();
        for pid in orphans {
            k.sched.zombies.remove(pid);
            crate::process::wait::release_process(k, pid);
        }
        k.procs.reset_pid_counter();
    }
}

/// Install a user handler. The `signal` syscall.
pub fn install_handler(k: &mut Kernel, pid: Pid, sig: usize, entry: u64) -> KernelResult<usize> {
    if !valid_signal(sig) {
        return Err(KernelError::InvalidArgument { name: "signal" });
    }
    k.procs
        .get_mut(pid)
        .ok_or(KernelError::NotFound { resource: "pid" })?
        .signals
        .install(sig, entry);
    Ok(0)
}

/// Return from a user handler: restore the stashed EL0 pc.
pub fn sigreturn(k: &mut Kernel, pid: Pid) -> KernelResult<usize> {
    let p = k
        .procs
        .get_mut(pid)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    let saved = p.signals.saved_elr;
    // SAFETY: p owns its kernel stack; single core.
    unsafe { p.trap_frame_mut() }.elr = saved;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_bitset_is_fifo_by_number() {
        let mut s = SignalState::new();
        s.set_pending(SIGTERM);
        s.set_pending(SIGINT);
        assert!(s.is_pending(SIGTERM));
        assert_eq!(s.take_next_pending(), Some(SIGINT));
        assert_eq!(s.take_next_pending(), Some(SIGTERM));
        assert_eq!(s.take_next_pending(), None);
    }

    #[test]
    fn handler_install_and_reset() {
        let mut s = SignalState::new();
        s.install(SIGINT, 0x5000);
        assert_eq!(s.handler(SIGINT), SignalHandler::User(0x5000));
        s.reset_handler(SIGINT);
        assert_eq!(s.handler(SIGINT), SignalHandler::Default);
    }

    #[test]
    fn signal_zero_and_out_of_range_are_invalid() {
        assert!(!valid_signal(0));
        assert!(valid_signal(SIGHUP));
        assert!(valid_signal(TOTAL_SIGNALS - 1));
        assert!(!valid_signal(TOTAL_SIGNALS));
    }
}
