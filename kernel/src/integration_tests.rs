//! End-to-end lifecycle scenarios
//!
//! Each test drives the whole kernel state machine -- process table,
//! scheduler, signals, file tables -- through a realistic multi-process
//! episode, checking the cross-subsystem invariants along the way.

use crate::mm::USER_BASE;
use crate::process::exit::exit_process;
use crate::process::fork::fork;
use crate::process::wait::{try_wait, WNOHANG};
use crate::process::{Event, ProcessState, INIT_PID};
use crate::sched::{grant_cpu, select_next, sleep_bookkeeping};
use crate::signal::{kill, send_signal, SIGINT, SIGTERM};
use crate::test_support::TestKernel;
use alloc::string::String;

/// Boot: init spawns, forks login, and parks in wait. Idle has the CPU,
/// login owns the ready queue.
#[test]
fn boot_init_forks_login() {
    let mut tk = TestKernel::boot();
    let init = tk.spawn("INIT.BIN");
    assert_eq!(init, INIT_PID);

    tk.run_to(init);
    let login = fork(&mut tk.k).unwrap();
    assert_eq!(login.0, 2);

    // Init waits for any child: nothing reapable, so it blocks.
    assert_eq!(try_wait(&mut tk.k, init, -1, 0), Ok(None));
    crate::process::wait::set_wait_target(&mut tk.k, init, -1);
    sleep_bookkeeping(&mut tk.k, Event::ZombieCleanup);

    assert_eq!(tk.ready_pids(), [login]);
    assert!(tk.k.sched.wait.contains(init));
    assert_eq!(tk.k.procs.get(init).unwrap().state, ProcessState::Sleep);

    // The scheduler hands the CPU to login next.
    let next = select_next(&mut tk.k);
    grant_cpu(&mut tk.k, next);
    assert_eq!(next, login);
}

/// fork + exec: the child's first entry to EL0 sees argc in x2, the argv
/// vector in x1 and at sp, the pc at the user base, and the argument
/// strings staged at the top of the user page.
#[test]
fn fork_then_exec_sets_up_child_registers() {
    let mut tk = TestKernel::boot();
    let parent = tk.spawn("A.BIN");
    tk.run_to(parent);
    let child = fork(&mut tk.k).unwrap();

    tk.run_to(child);
    let argv = [String::from("LS.BIN"), String::from("-l")];
    crate::process::exec::exec(&mut tk.k, child, "LS.BIN", &argv).unwrap();

    let c = tk.k.procs.get(child).unwrap();
    let frame = unsafe { c.trap_frame() };
    assert_eq!(frame.x[2], 2);
    assert_eq!(frame.elr, USER_BASE as u64);
    assert_eq!(frame.x[1], frame.sp_el0);

    // "LS.BIN\0-l\0" sits at the recorded string pointers.
    let a0 = c.read_user_u64(frame.x[1] as usize).unwrap() as usize;
    assert_eq!(c.read_user_str(a0, 16).unwrap(), "LS.BIN");
    let a1 = c.read_user_u64(frame.x[1] as usize + 8).unwrap() as usize;
    assert_eq!(c.read_user_str(a1, 16).unwrap(), "-l");
}

/// wait/exit round trip: the parent blocks, the child exits 7, the parent
/// wakes and reaps pid and status (7 << 8).
#[test]
fn parent_waits_child_exits() {
    let mut tk = TestKernel::boot();
    let parent = tk.spawn("A.BIN");
    tk.run_to(parent);
    let child = fork(&mut tk.k).unwrap();

    // Parent blocks: nothing to reap yet.
    assert_eq!(try_wait(&mut tk.k, parent, -1, 0), Ok(None));
    crate::process::wait::set_wait_target(&mut tk.k, parent, -1);
    sleep_bookkeeping(&mut tk.k, Event::ZombieCleanup);

    // Child runs and exits.
    let next = select_next(&mut tk.k);
    grant_cpu(&mut tk.k, next);
    assert_eq!(next, child);
    exit_process(&mut tk.k, child, 7, false);

    // The exit's ZOMBIE_CLEANUP wake moved the parent back to ready.
    assert!(tk.k.sched.ready.contains(parent));
    assert_eq!(tk.k.procs.get(parent).unwrap().event, Event::None);

    let (reaped, status) = try_wait(&mut tk.k, parent, -1, 0).unwrap().unwrap();
    assert_eq!(reaped, child);
    assert_eq!(status, 7 << 8);
    assert!(tk.k.procs.get(child).is_none());
}

/// A sleeping child killed with SIGINT: pulled off the wait list, killed by
/// the default handler at selection, reaped with status & 0x7f == SIGINT.
#[test]
fn sigint_kills_sleeping_child() {
    let mut tk = TestKernel::boot();
    let parent = tk.spawn("A.BIN");
    tk.run_to(parent);
    let child = fork(&mut tk.k).unwrap();

    // Child goes to sleep for 50 ticks.
    tk.run_to(child);
    sleep_bookkeeping(&mut tk.k, Event::Tick(50));
    assert!(tk.k.sched.wait.contains(child));

    // Parent kills it.
    tk.run_to(parent);
    kill(&mut tk.k, parent, child.0 as i64, SIGINT).unwrap();
    assert!(tk.k.sched.ready.contains(child));
    assert!(!tk.k.sched.wait.contains(child));

    // Parent blocks in wait; the scheduler's signal check executes the
    // default SIGINT action and the zombie wake brings the parent back.
    assert_eq!(try_wait(&mut tk.k, parent, -1, 0), Ok(None));
    sleep_bookkeeping(&mut tk.k, Event::ZombieCleanup);
    let next = select_next(&mut tk.k);
    assert_ne!(next, child, "killed candidate must not win the CPU");

    let (reaped, status) = try_wait(&mut tk.k, parent, -1, 0).unwrap().unwrap();
    assert_eq!(reaped, child);
    assert_eq!(status & 0x7f, SIGINT as i32);
}

/// System shutdown: kill(-1, SIGTERM) marks everyone including idle and
/// init; once the queues drain, the next idle scheduling latches shutdown.
#[test]
fn sigterm_broadcast_shuts_down() {
    let mut tk = TestKernel::boot();
    let init = tk.spawn("INIT.BIN");
    let shell = tk.spawn("A.BIN");
    tk.run_to(shell);

    kill(&mut tk.k, shell, -1, SIGTERM).unwrap();
    assert!(tk.k.procs.get(init).unwrap().signals.is_pending(SIGTERM));

    // The caller exits of its own accord after issuing the broadcast.
    exit_process(&mut tk.k, shell, 0, false);

    // Selection kills init via its pending SIGTERM, leaving only zombies;
    // idle is chosen and shutdown latches.
    let next = select_next(&mut tk.k);
    assert_eq!(next, crate::process::IDLE_PID);
    assert!(tk.k.sched.shutdown);
    assert_eq!(tk.k.procs.get(init).unwrap().state, ProcessState::Killed);
}

/// The fd/inode reference ledger balances across open-twice, fork, and
/// staggered closes in parent and child.
#[test]
fn refcounts_balance_across_fork_and_close() {
    let mut tk = TestKernel::boot();
    let parent = tk.spawn("A.BIN");
    tk.run_to(parent);

    let fd1 = tk.open(parent, "A.BIN");
    let fd2 = tk.open(parent, "A.BIN");

    let f1 = tk.k.procs.get(parent).unwrap().fds.get(fd1).unwrap();
    let f2 = tk.k.procs.get(parent).unwrap().fds.get(fd2).unwrap();
    let inode = tk.k.files.entry(f1).inode.unwrap();
    assert_eq!(tk.k.files.entry(f2).inode, Some(inode));
    assert_eq!(tk.k.inodes.ref_count(inode), 2);

    let child = fork(&mut tk.k).unwrap();
    assert_eq!(tk.k.files.entry(f1).ref_count, 2);
    assert_eq!(tk.k.files.entry(f2).ref_count, 2);
    assert_eq!(tk.k.inodes.ref_count(inode), 4);

    // Parent closes fd1, child closes fd2.
    {
        let p = tk.k.procs.get_mut(parent).unwrap();
        crate::fs::file::close_file(&mut p.fds, &mut tk.k.files, &mut tk.k.inodes, fd1 as isize)
            .unwrap();
    }
    {
        let c = tk.k.procs.get_mut(child).unwrap();
        crate::fs::file::close_file(&mut c.fds, &mut tk.k.files, &mut tk.k.inodes, fd2 as isize)
            .unwrap();
    }
    assert_eq!(tk.k.files.entry(f1).ref_count, 1);
    assert_eq!(tk.k.files.entry(f2).ref_count, 1);
    assert_eq!(tk.k.inodes.ref_count(inode), 2);

    // Child exits and is reaped: its surviving fd1 reference drains, while
    // the parent still holds fd2.
    exit_process(&mut tk.k, child, 0, false);
    try_wait(&mut tk.k, parent, -1, 0).unwrap().unwrap();
    assert_eq!(tk.k.files.entry(f1).ref_count, 0);
    assert_eq!(tk.k.files.entry(f2).ref_count, 1);
    assert_eq!(tk.k.inodes.ref_count(inode), 1);

    exit_process(&mut tk.k, parent, 0, false);
    crate::process::wait::release_process(&mut tk.k, parent);
    assert_eq!(tk.k.files.live_count(), 0);
    assert_eq!(tk.k.inodes.live_count(), 0);
}

/// kill(-1, SIGHUP): orphaned zombies are released and the pid counter
/// rewinds to 2.
#[test]
fn sighup_broadcast_reaps_orphans_and_resets_pids() {
    let mut tk = TestKernel::boot();
    let init = tk.spawn("INIT.BIN");
    let shell = tk.spawn("A.BIN");
    tk.run_to(shell);
    let worker = fork(&mut tk.k).unwrap();

    // The worker dies; its parent (the shell, not init) never reaps it.
    exit_process(&mut tk.k, worker, 3, false);
    assert!(tk.k.sched.zombies.contains(worker));
    let pages_with_zombie = tk.k.phys.free_count();

    kill(&mut tk.k, init, -1, crate::signal::SIGHUP).unwrap();

    // The orphaned zombie is gone, storage and slot released.
    assert!(!tk.k.sched.zombies.contains(worker));
    assert!(tk.k.procs.get(worker).is_none());
    assert!(tk.k.phys.free_count() > pages_with_zombie);

    // Fresh pids restart at 2.
    assert_eq!(tk.k.procs.alloc_pid().0, 2);
}

/// WNOHANG probes don't block and don't disturb state.
#[test]
fn wnohang_polls_without_blocking() {
    let mut tk = TestKernel::boot();
    let parent = tk.spawn("A.BIN");
    tk.run_to(parent);
    let child = fork(&mut tk.k).unwrap();

    assert_eq!(
        try_wait(&mut tk.k, parent, -1, WNOHANG),
        Err(crate::error::KernelError::WouldBlock)
    );
    assert_eq!(tk.k.procs.get(parent).unwrap().state, ProcessState::Running);

    exit_process(&mut tk.k, child, 1, false);
    let (reaped, _) = try_wait(&mut tk.k, parent, -1, WNOHANG).unwrap().unwrap();
    assert_eq!(reaped, child);
}

/// A signal wake of a sleeper that survives its handler leaves the event
/// set, so the sleep loop knows the wake was spurious.
#[test]
fn surviving_sleeper_sees_spurious_wake() {
    let mut tk = TestKernel::boot();
    let a = tk.spawn("A.BIN");
    tk.run_to(a);
    // A harmless user handler: the process survives delivery.
    crate::signal::install_handler(&mut tk.k, a, SIGINT, 0x9000).unwrap();
    sleep_bookkeeping(&mut tk.k, Event::Tick(500));

    send_signal(&mut tk.k, a, SIGINT);
    assert!(tk.k.sched.ready.contains(a));
    // The event survives the wake: the sleep loop will re-sleep.
    assert_eq!(tk.k.procs.get(a).unwrap().event, Event::Tick(500));

    // Selection delivers the handler and grants the CPU.
    let next = select_next(&mut tk.k);
    assert_eq!(next, a);
    let frame = unsafe { tk.k.procs.get(a).unwrap().trap_frame() };
    assert_eq!(frame.elr, 0x9000);
    assert_eq!(frame.x[0], SIGINT as u64);
}
