//! The scheduler
//!
//! Preemptive, single-core, non-priority round robin over the ready queue.
//! Idle (pid 0) is never enqueued; it runs exactly when the ready queue is
//! empty. A candidate must pass its pending-signal check while still at the
//! head of the queue before it is granted the CPU -- if a default handler
//! kills it, selection simply retries.
//!
//! The state transitions are ordinary functions over [`Kernel`] and run on
//! the host under test; only the final `cpu_switch`/`switch_vm` step is
//! target code.

pub mod queue;

use alloc::vec::Vec;

pub use queue::RunQueue;

use crate::kernel::Kernel;
use crate::process::{Event, Pid, ProcessState, IDLE_PID};
use crate::signal::{self, SIGTERM};

/// Scheduler state: the three queues, the running pid, the foreground owner
/// and the shutdown latch.
#[derive(Debug)]
pub struct Scheduler {
    pub ready: RunQueue,
    pub wait: RunQueue,
    pub zombies: RunQueue,
    pub current: Pid,
    /// The single non-daemon process entitled to console input.
    pub fg: Option<Pid>,
    pub shutdown: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            ready: RunQueue::new(),
            wait: RunQueue::new(),
            zombies: RunQueue::new(),
            current: IDLE_PID,
            fg: None,
            shutdown: false,
        }
    }
}

fn idle_marked_for_shutdown(k: &Kernel) -> bool {
    k.procs
        .get(IDLE_PID)
        .is_some_and(|p| p.signals.is_pending(SIGTERM))
}

/// Pick the next process to run.
///
/// Candidates are taken from the head of the ready queue and must survive
/// their pending-signal check while still at the head; otherwise selection
/// retries. With nothing ready the choice is idle -- and if the wait list is
/// empty too while idle holds a SIGTERM mark, the system latches shutdown.
pub fn select_next(k: &mut Kernel) -> Pid {
    while let Some(candidate) = k.sched.ready.front() {
        if idle_marked_for_shutdown(k) {
            log::info!("stopping pid {}", candidate);
        }
        signal::check_pending_signals(k, candidate);
        if k.sched.ready.front() == Some(candidate) {
            k.sched.ready.pop();
            return candidate;
        }
        // The check killed the candidate and dequeued it; try the new head.
    }

    if k.sched.wait.is_empty() && idle_marked_for_shutdown(k) && !k.sched.shutdown {
        k.sched.shutdown = true;
        crate::println!("Shutting down...");
        log::info!("all processes drained, shutting down");
    }
    IDLE_PID
}

/// Bookkeeping half of the dispatch: mark `next` running and let a
/// non-daemon claim a vacant foreground slot.
pub fn grant_cpu(k: &mut Kernel, next: Pid) {
    let fg_vacant = k.sched.fg.is_none();
    let p = k.procs.get_mut(next).expect("sched: next not in table");
    p.state = ProcessState::Running;
    if !p.daemon && fg_vacant {
        k.sched.fg = Some(next);
    }
    k.sched.current = next;
}

/// Timer-driven preemption, bookkeeping half: demote the running process to
/// the back of the ready queue. A no-op (returns false) when nothing else is
/// ready. Idle is demoted but never enqueued.
pub fn preempt_bookkeeping(k: &mut Kernel) -> bool {
    if k.sched.ready.is_empty() {
        return false;
    }
    let current = k.sched.current;
    if current != IDLE_PID {
        let p = k.procs.get_mut(current).expect("sched: current not in table");
        if p.state == ProcessState::Running {
            p.state = ProcessState::Ready;
            k.sched.ready.push(current);
        }
    }
    true
}

/// Bookkeeping half of `sleep(event)`: park the running process on the wait
/// list. The caller (target-only) then reschedules, and on resumption loops
/// while the event is still set -- only a genuine wake clears it.
pub fn sleep_bookkeeping(k: &mut Kernel, event: Event) {
    debug_assert_ne!(event, Event::None, "sched: sleeping on no event");
    let current = k.sched.current;
    debug_assert_ne!(current, IDLE_PID, "sched: idle cannot sleep");
    let p = k.procs.get_mut(current).expect("sched: current not in table");
    p.state = ProcessState::Sleep;
    p.event = event;
    k.sched.wait.push(current);
}

/// Wake every sleeper blocked on `event`, FIFO order preserved; ready
/// processes with a matching leftover event get it cleared so their sleep
/// loops can exit.
pub fn wake_up(k: &mut Kernel, event: Event) {
    let ready: Vec<Pid> = k.sched.ready.iter().collect();
    for pid in ready {
        let p = k.procs.get_mut(pid).expect("sched: queued pid not in table");
        if p.event == event {
            p.event = Event::None;
        }
    }

    let sleepers: Vec<Pid> = k
        .sched
        .wait
        .iter()
        .filter(|&pid| k.procs.get(pid).is_some_and(|p| p.event == event))
        .collect();
    for pid in sleepers {
        k.sched.wait.remove(pid);
        let p = k.procs.get_mut(pid).expect("sched: queued pid not in table");
        p.event = Event::None;
        p.state = ProcessState::Ready;
        k.sched.ready.push(pid);
    }
}

// ---------------------------------------------------------------------------
// Target-only dispatch
// ---------------------------------------------------------------------------

/// Select, grant and switch. The call returns when this process is next
/// dispatched (or immediately, if it selected itself).
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn schedule() {
    use crate::arch::aarch64::trap::cpu_switch;

    let (old_sp, new_sp) = {
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let prev = k.sched.current;
        let next = select_next(&mut k);
        grant_cpu(&mut k, next);

        if let Some(space) = k.procs.get(next).and_then(|p| p.space.as_ref()) {
            space.switch();
        }

        let old_sp = &mut k.procs.get_mut(prev).expect("sched: prev gone").kstack_sp
            as *mut usize;
        let new_sp = &k.procs.get(next).expect("sched: next gone").kstack_sp
            as *const usize;
        (old_sp, new_sp)
        // Guard drops here; the next process's kernel entry takes its own.
    };

    // SAFETY: both pointers target kstack_sp fields of live process slots in
    // the static kernel; the primitive reads new_sp after storing old_sp, so
    // a self-switch is a harmless round trip.
    unsafe { cpu_switch(old_sp, new_sp) };
}

/// `sleep(event)`: block the current process until a genuine wake.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn sleep(event: Event) {
    loop {
        let current = {
            // SAFETY: trap context, IRQs masked.
            let mut k = unsafe { crate::kernel::kernel() };
            sleep_bookkeeping(&mut k, event);
            k.sched.current
        };
        schedule();
        // Back from the switch: spurious wakeups re-sleep.
        // SAFETY: as above.
        let k = unsafe { crate::kernel::kernel() };
        if k.procs.get(current).is_none_or(|p| p.event == Event::None) {
            return;
        }
    }
}

/// Timer IRQ: advance the tick counter, wake due sleepers, preempt.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn handle_timer_irq() {
    let now = crate::advance_tick();
    let switch = {
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        wake_up(&mut k, Event::Tick(now));
        preempt_bookkeeping(&mut k)
    };
    if switch {
        schedule();
    }
}

/// A faulting process is forcibly exited and the CPU moves on.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn fatal_fault_exit() {
    {
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let current = k.sched.current;
        crate::process::exit::exit_process(&mut k, current, 1, true);
    }
    schedule();
}
