//! Process-side system calls
//!
//! The handlers are thin target-only shims over the lifecycle operations;
//! the ps-support calls (`get_active_pids`, `get_proc_data`) carry their
//! logic here and are exercised by host tests.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::Pid;

/// Per-process record returned by `get_proc_data`. `#[repr(C)]` -- the user
/// library reads it as raw bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ProcData {
    pub pid: u64,
    pub ppid: u64,
    /// One-byte state code (`I`, `R`, `X`, `S`, `Z`).
    pub state: u8,
    pub daemon: u8,
    pub reserved: [u8; 6],
    /// Program name, NUL padded.
    pub name: [u8; 32],
    /// The argv line recorded at `exec`, NUL padded.
    pub args: [u8; 128],
}

impl ProcData {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C) plain-old-data with no interior padding (two u64s,
        // then byte arrays).
        unsafe {
            core::slice::from_raw_parts(
                self as *const Self as *const u8,
                core::mem::size_of::<Self>(),
            )
        }
    }
}

/// Fill a user array of u64 pids with every live process, idle included.
/// Returns how many were written.
pub fn get_active_pids(
    k: &mut Kernel,
    caller: Pid,
    va: usize,
    cap: usize,
) -> KernelResult<usize> {
    let pids: Vec<u64> = k.procs.iter_live().map(|p| p.pid.0).collect();
    let n = pids.len().min(cap);

    let p = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    for (i, pid) in pids.iter().take(n).enumerate() {
        p.copy_to_user(va + i * 8, &pid.to_le_bytes())?;
    }
    Ok(n)
}

/// Write `target`'s [`ProcData`] into the caller's buffer at `va`.
pub fn get_proc_data(
    k: &mut Kernel,
    caller: Pid,
    target: u64,
    va: usize,
) -> KernelResult<usize> {
    let t = k
        .procs
        .get(Pid(target))
        .ok_or(KernelError::NotFound { resource: "pid" })?;

    let mut data = ProcData {
        pid: t.pid.0,
        ppid: t.ppid.0,
        state: t.state.code(),
        daemon: t.daemon as u8,
        reserved: [0; 6],
        name: [0; 32],
        args: [0; 128],
    };
    let name = t.name.as_bytes();
    let n = name.len().min(data.name.len() - 1);
    data.name[..n].copy_from_slice(&name[..n]);
    if t.kstack != 0 {
        let args = t.args_scratch();
        let n = args.len().min(data.args.len() - 1);
        data.args[..n].copy_from_slice(&args[..n]);
    }

    let p = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    p.copy_to_user(va, data.as_bytes())?;
    Ok(0)
}

// ---------------------------------------------------------------------------
// Target-only syscall shims
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod shims {
    use super::*;
    use crate::arch::context::ContextFrame;
    use crate::process::{exec, exit, fork, wait, Event, ProcessState};

    fn abi(r: KernelResult<usize>) -> isize {
        match r {
            Ok(v) => v as isize,
            Err(e) => e.to_abi(),
        }
    }

    pub fn sys_sleep_ticks(frame: &mut ContextFrame) -> isize {
        let ticks = frame.arg(0);
        if ticks > 0 {
            let due = crate::timer_ticks().saturating_add(ticks);
            crate::sched::sleep(Event::Tick(due));
        }
        0
    }

    pub fn sys_fork(frame: &mut ContextFrame) -> isize {
        let _ = frame;
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        match fork::fork(&mut k) {
            Ok(pid) => pid.0 as isize,
            Err(e) => e.to_abi(),
        }
    }

    pub fn sys_wait(frame: &mut ContextFrame) -> isize {
        let target = frame.arg(0) as i64;
        let wstatus = frame.arg(1) as usize;
        let options = frame.arg(2);
        loop {
            let (caller, outcome) = {
                // SAFETY: trap context, IRQs masked.
                let mut k = unsafe { crate::kernel::kernel() };
                let caller = k.sched.current;
                (caller, wait::try_wait(&mut k, caller, target, options))
            };
            match outcome {
                Ok(Some((pid, status))) => {
                    if wstatus != 0 {
                        // SAFETY: as above.
                        let k = unsafe { crate::kernel::kernel() };
                        if let Some(p) = k.procs.get(caller) {
                            if p.copy_to_user(wstatus, &status.to_le_bytes()).is_err() {
                                return -1;
                            }
                        }
                    }
                    return pid.0 as isize;
                }
                Ok(None) => {
                    {
                        // SAFETY: as above.
                        let mut k = unsafe { crate::kernel::kernel() };
                        wait::set_wait_target(&mut k, caller, target);
                    }
                    crate::sched::sleep(Event::ZombieCleanup);
                    // SAFETY: as above.
                    let mut k = unsafe { crate::kernel::kernel() };
                    wait::clear_wait_target(&mut k, caller);
                }
                Err(e) => return e.to_abi(),
            }
        }
    }

    pub fn sys_exec(frame: &mut ContextFrame) -> isize {
        let name_va = frame.arg(0) as usize;
        let argv_va = frame.arg(1) as usize;

        let parsed = {
            // SAFETY: trap context, IRQs masked.
            let k = unsafe { crate::kernel::kernel() };
            let pid = k.sched.current;
            let Some(p) = k.procs.get(pid) else {
                return -1;
            };
            let name = match p.read_user_str(name_va, 64) {
                Ok(name) => name,
                Err(e) => return e.to_abi(),
            };
            let mut args = Vec::new();
            if argv_va == 0 {
                args.push(name.clone());
            } else {
                for i in 0..=exec::MAX_ARGS {
                    let Some(slot_va) = argv_va.checked_add(i * 8) else {
                        return -1;
                    };
                    let ptr = match p.read_user_u64(slot_va) {
                        Ok(ptr) => ptr,
                        Err(e) => return e.to_abi(),
                    };
                    if ptr == 0 {
                        break;
                    }
                    match p.read_user_str(ptr as usize, 128) {
                        Ok(arg) => args.push(arg),
                        Err(e) => return e.to_abi(),
                    }
                }
            }
            (pid, name, args)
        };

        let (pid, name, args) = parsed;
        let (result, killed) = {
            // SAFETY: as above.
            let mut k = unsafe { crate::kernel::kernel() };
            let result = exec::exec(&mut k, pid, &name, &args);
            let killed = k
                .procs
                .get(pid)
                .is_none_or(|p| p.state == ProcessState::Killed);
            (result, killed)
        };
        if killed {
            // The image is gone and so are we; the load failure already
            // zombified this process.
            crate::sched::schedule();
            unreachable!("dead process rescheduled");
        }
        abi(result)
    }

    pub fn sys_exit(frame: &mut ContextFrame) -> isize {
        let status = frame.arg(0) as i32;
        {
            // SAFETY: trap context, IRQs masked.
            let mut k = unsafe { crate::kernel::kernel() };
            let current = k.sched.current;
            exit::exit_process(&mut k, current, status, false);
        }
        crate::sched::schedule();
        unreachable!("dead process rescheduled");
    }

    pub fn sys_getpid(frame: &mut ContextFrame) -> isize {
        let _ = frame;
        // SAFETY: trap context, IRQs masked.
        let k = unsafe { crate::kernel::kernel() };
        k.sched.current.0 as isize
    }

    pub fn sys_kill(frame: &mut ContextFrame) -> isize {
        let target = frame.arg(0) as i64;
        let sig = frame.arg(1) as usize;
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let sender = k.sched.current;
        abi(crate::signal::kill(&mut k, sender, target, sig))
    }

    pub fn sys_signal(frame: &mut ContextFrame) -> isize {
        let sig = frame.arg(0) as usize;
        let handler = frame.arg(1);
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let current = k.sched.current;
        abi(crate::signal::install_handler(&mut k, current, sig, handler))
    }

    pub fn sys_get_active_pids(frame: &mut ContextFrame) -> isize {
        let va = frame.arg(0) as usize;
        let cap = frame.arg(1) as usize;
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let caller = k.sched.current;
        abi(get_active_pids(&mut k, caller, va, cap))
    }

    pub fn sys_get_proc_data(frame: &mut ContextFrame) -> isize {
        let target = frame.arg(0);
        let va = frame.arg(1) as usize;
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let caller = k.sched.current;
        abi(get_proc_data(&mut k, caller, target, va))
    }

    pub fn sys_sigreturn(frame: &mut ContextFrame) -> isize {
        let _ = frame;
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let current = k.sched.current;
        abi(crate::signal::sigreturn(&mut k, current))
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use shims::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::USER_BASE;
    use crate::test_support::TestKernel;

    #[test]
    fn active_pids_lists_idle_and_spawned() {
        let mut tk = TestKernel::boot();
        let a = tk.spawn("A.BIN");
        let b = tk.spawn("B.BIN");
        tk.run_to(a);

        let va = USER_BASE + 0x1000;
        let n = get_active_pids(&mut tk.k, a, va, 16).unwrap();
        assert_eq!(n, 3);

        let p = tk.k.procs.get(a).unwrap();
        let mut listed = Vec::new();
        for i in 0..n {
            listed.push(p.read_user_u64(va + i * 8).unwrap());
        }
        assert_eq!(listed, [0, a.0, b.0]);
    }

    #[test]
    fn active_pids_respects_capacity() {
        let mut tk = TestKernel::boot();
        let a = tk.spawn("A.BIN");
        tk.spawn("B.BIN");
        tk.run_to(a);
        let n = get_active_pids(&mut tk.k, a, USER_BASE + 0x1000, 1).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn proc_data_reports_name_state_and_args() {
        let mut tk = TestKernel::boot();
        let a = tk.spawn("A.BIN");
        tk.run_to(a);
        crate::process::exec::exec(
            &mut tk.k,
            a,
            "LS.BIN",
            &[alloc::string::String::from("LS.BIN"), alloc::string::String::from("-l")],
        )
        .unwrap();

        let va = USER_BASE + 0x2000;
        get_proc_data(&mut tk.k, a, a.0, va).unwrap();

        let p = tk.k.procs.get(a).unwrap();
        let mut raw = [0u8; core::mem::size_of::<ProcData>()];
        p.copy_from_user(va, &mut raw).unwrap();

        assert_eq!(u64::from_le_bytes(raw[0..8].try_into().unwrap()), a.0);
        assert_eq!(raw[16], b'X', "running state code");
        let name = &raw[24..24 + 6];
        assert_eq!(name, b"LS.BIN");
        let args = &raw[56..56 + 9];
        assert_eq!(args, b"LS.BIN -l");
    }

    #[test]
    fn proc_data_unknown_pid_errors() {
        let mut tk = TestKernel::boot();
        let a = tk.spawn("A.BIN");
        tk.run_to(a);
        assert_eq!(
            get_proc_data(&mut tk.k, a, 99, USER_BASE + 0x1000),
            Err(KernelError::NotFound { resource: "pid" })
        );
    }
}
