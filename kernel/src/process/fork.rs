//! Process creation and `fork`
//!
//! [`alloc_new_process`] produces a schedulable-but-empty process: a kernel
//! stack seeded so the first dispatch falls through the trap-return path
//! into EL0 at the user base, and an address space with nothing mapped yet.
//! [`spawn_program`] (boot) loads a program into it; [`fork`] clones the
//! caller instead.

use alloc::string::String;

use super::pcb::{Event, Process, ProcessState, WaitTarget};
use super::Pid;
use crate::error::KernelResult;
use crate::fs::file::clone_fd_table;
use crate::fs::FdTable;
use crate::kernel::Kernel;
use crate::mm::page_table::{copy_uvm, setup_uvm};
use crate::mm::{AddressSpace, PAGE_SIZE};
use crate::signal::SignalState;

/// Claim a free slot and build a process in state `Init`: fresh pid, one
/// kernel stack page, an empty address space, and a context frame seeded for
/// a first entry to EL0. Returns the new pid.
pub fn alloc_new_process(k: &mut Kernel, name: &str) -> KernelResult<Pid> {
    let slot = k
        .procs
        .free_slot_index()
        .ok_or(crate::error::KernelError::ResourceExhausted {
            resource: "process table",
        })?;

    let kstack = k.phys.alloc()?;
    let space = match AddressSpace::new(&mut k.phys) {
        Ok(space) => space,
        Err(e) => {
            // SAFETY: the stack page was never exposed.
            unsafe { k.phys.free(kstack) };
            return Err(e);
        }
    };

    let pid = k.procs.alloc_pid();
    let mut p = Process {
        pid,
        ppid: super::IDLE_PID,
        name: String::from(name),
        state: ProcessState::Init,
        kstack,
        kstack_sp: 0,
        space: Some(space),
        event: Event::None,
        daemon: false,
        wait_target: WaitTarget::NotWaiting,
        signals: SignalState::new(),
        fds: FdTable::new(),
        exit_status: 0,
    };
    p.seed_initial_stack();
    p.set_args_scratch(name);
    k.procs.insert(slot, p);

    log::debug!("proc: allocated pid {} ({})", pid, name);
    Ok(pid)
}

/// Free everything a half-built process owns and vacate its slot. Used on
/// creation failures; reaping goes through `wait::release_process`, which
/// also settles the fd table.
pub(crate) fn destroy_process(k: &mut Kernel, pid: Pid) {
    if let Some(p) = k.procs.remove(pid) {
        if p.kstack != 0 {
            // SAFETY: the process is out of the table; nothing references
            // its stack.
            unsafe { k.phys.free(p.kstack) };
        }
        if let Some(space) = p.space {
            space.free_uvm(&mut k.phys);
        }
    }
}

/// Create a process running `path`. Boot uses this to start init.
pub fn spawn_program(k: &mut Kernel, path: &str) -> KernelResult<Pid> {
    let pid = alloc_new_process(k, path)?;

    let result = {
        let p = k.procs.get_mut(pid).expect("proc: fresh pid vanished");
        setup_uvm(
            p.space.as_mut().expect("proc: fresh process without space"),
            &mut k.phys,
            k.volume.as_ref().expect("kernel: no volume mounted"),
            path,
        )
    };
    if let Err(e) = result {
        destroy_process(k, pid);
        return Err(e);
    }

    let p = k.procs.get_mut(pid).expect("proc: fresh pid vanished");
    p.state = ProcessState::Ready;
    k.sched.ready.push(pid);
    Ok(pid)
}

/// `fork`: clone the calling process. The child is a copy of the parent --
/// user page, context frame, fd table -- except that its return register
/// reads 0. The child is visible on the ready queue before the parent gets
/// its return value, and a foreground parent steps aside so the child can
/// claim the console at its first dispatch.
pub fn fork(k: &mut Kernel) -> KernelResult<Pid> {
    let parent_pid = k.sched.current;
    let name = k
        .procs
        .get(parent_pid)
        .expect("fork: no current process")
        .name
        .clone();

    let child_pid = alloc_new_process(k, &name)?;

    let copied = {
        let (parent, child) = k
            .procs
            .pair_mut(parent_pid, child_pid)
            .expect("fork: pair lookup failed");
        copy_uvm(
            child.space.as_mut().expect("fork: child without space"),
            parent.space.as_ref().expect("fork: parent without space"),
            &mut k.phys,
            PAGE_SIZE,
        )
    };
    if let Err(e) = copied {
        destroy_process(k, child_pid);
        return Err(e);
    }

    {
        let (parent, child) = k
            .procs
            .pair_mut(parent_pid, child_pid)
            .expect("fork: pair lookup failed");
        child.ppid = parent.pid;
        child.daemon = parent.daemon;
        // SAFETY: both processes own their stack pages; single core.
        unsafe {
            *child.trap_frame_mut() = *parent.trap_frame();
            child.trap_frame_mut().x[0] = 0;
        }
        child.fds = clone_fd_table(&parent.fds, &mut k.files, &mut k.inodes);
    }

    // Mirror the parent's argv line for ps.
    let line: alloc::vec::Vec<u8> = k
        .procs
        .get(parent_pid)
        .expect("fork: parent vanished")
        .args_scratch()
        .to_vec();
    let child = k.procs.get_mut(child_pid).expect("fork: child vanished");
    if let Ok(line) = core::str::from_utf8(&line) {
        child.set_args_scratch(line);
    }

    child.state = ProcessState::Ready;
    k.sched.ready.push(child_pid);

    if k.sched.fg == Some(parent_pid) {
        k.sched.fg = None;
    }

    log::debug!("proc: {} forked {}", parent_pid, child_pid);
    Ok(child_pid)
}
