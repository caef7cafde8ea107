//! `exit`: turn a process into a zombie
//!
//! The dying process keeps its slot, pages and fd table -- `wait` releases
//! those -- but leaves every queue, hands its children to init, gives up the
//! foreground, and notifies its parent with SIGCHLD. The zombie is enqueued
//! before the `ZOMBIE_CLEANUP` wake fires, so a parent blocked in `wait` is
//! guaranteed to find it.

use alloc::vec::Vec;

use super::pcb::{Event, ProcessState, WaitTarget};
use super::{Pid, INIT_PID};
use crate::kernel::Kernel;
use crate::sched::wake_up;
use crate::signal::{send_signal, SIGCHLD};

/// Encode an exit status the way `wait` reports it: the low 7 bits for a
/// signal-handler exit, else the low 8 bits shifted up a byte.
pub fn encode_status(status: i32, from_sig_handler: bool) -> i32 {
    if from_sig_handler {
        status & 0x7f
    } else {
        (status & 0xff) << 8
    }
}

/// Terminate `pid`. With `from_sig_handler` set the call is a default
/// signal action running inside the scheduler and must not reschedule; the
/// syscall path reschedules after this returns.
pub fn exit_process(k: &mut Kernel, pid: Pid, status: i32, from_sig_handler: bool) {
    let code = encode_status(status, from_sig_handler);

    let Some(p) = k.procs.get_mut(pid) else {
        return;
    };
    if p.state == ProcessState::Killed {
        return;
    }
    let prev_state = p.state;
    let ppid = p.ppid;
    p.state = ProcessState::Killed;
    p.exit_status = code;
    p.event = Event::Reap(pid);

    // Whatever queue the process sat in, it leaves now.
    match prev_state {
        ProcessState::Ready => {
            k.sched.ready.remove(pid);
        }
        ProcessState::Sleep => {
            k.sched.wait.remove(pid);
        }
        _ => {}
    }

    // SIGCHLD goes to the parent unless it is gone, dead, or blocked
    // waiting for a different child; init takes it then.
    let parent_takes_it = k.procs.get(ppid).is_some_and(|parent| {
        parent.state != ProcessState::Killed
            && !matches!(parent.wait_target, WaitTarget::Child(t) if t != pid)
    });
    let chld_target = if parent_takes_it { ppid } else { INIT_PID };
    if let Some(t) = k.procs.get_mut(chld_target) {
        t.signals.child_status = code;
    }
    send_signal(k, chld_target, SIGCHLD);

    // Orphans belong to init.
    let orphans: Vec<Pid> = k.procs.child_pids(pid).collect();
    for orphan in orphans {
        if let Some(child) = k.procs.get_mut(orphan) {
            child.ppid = INIT_PID;
        }
    }

    if k.sched.fg == Some(pid) {
        k.sched.fg = None;
        wake_up(k, Event::FgPaused);
    }

    k.sched.zombies.push(pid);
    wake_up(k, Event::ZombieCleanup);

    log::debug!("proc: pid {} exited, status {:#x}", pid, code);
}
