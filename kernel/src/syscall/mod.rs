//! System-call dispatch
//!
//! The trap glue hands over the context frame of an EL0 `svc`; the number
//! sits in x8, the arguments in x0..x5, and the result goes back in x0. The
//! table is fixed-size and the indices are ABI -- the user library is
//! compiled against them.

pub mod filesystem;
pub mod process;

use crate::arch::context::ContextFrame;

pub const SYS_WRITEU: usize = 0;
pub const SYS_SLEEP_TICKS: usize = 1;
pub const SYS_OPEN_FILE: usize = 2;
pub const SYS_CLOSE_FILE: usize = 3;
pub const SYS_GET_FILE_SIZE: usize = 4;
pub const SYS_READ_FILE: usize = 5;
pub const SYS_FORK: usize = 6;
pub const SYS_WAIT: usize = 7;
pub const SYS_EXEC: usize = 8;
pub const SYS_EXIT: usize = 9;
pub const SYS_GETCHAR: usize = 10;
pub const SYS_GETPID: usize = 11;
pub const SYS_KILL: usize = 12;
pub const SYS_SIGNAL: usize = 13;
pub const SYS_GET_ACTIVE_PIDS: usize = 14;
pub const SYS_GET_PROC_DATA: usize = 15;
pub const SYS_READ_ROOT_DIR: usize = 16;
pub const SYS_SIGRETURN: usize = 17;

/// Size of the dispatch table.
pub const TOTAL_SYSCALL_FUNCTIONS: usize = 18;

/// A syscall handler: full frame access, small-integer result.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
type SyscallFn = fn(&mut ContextFrame) -> isize;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
static SYSCALL_TABLE: [SyscallFn; TOTAL_SYSCALL_FUNCTIONS] = [
    filesystem::sys_writeu,
    process::sys_sleep_ticks,
    filesystem::sys_open_file,
    filesystem::sys_close_file,
    filesystem::sys_get_file_size,
    filesystem::sys_read_file,
    process::sys_fork,
    process::sys_wait,
    process::sys_exec,
    process::sys_exit,
    filesystem::sys_getchar,
    process::sys_getpid,
    process::sys_kill,
    process::sys_signal,
    process::sys_get_active_pids,
    process::sys_get_proc_data,
    filesystem::sys_read_root_dir,
    process::sys_sigreturn,
];

/// Dispatch the `svc` captured in `frame`; the result lands in x0.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn dispatch(frame: &mut ContextFrame) {
    let num = frame.syscall_num() as usize;
    let result = match SYSCALL_TABLE.get(num) {
        Some(handler) => handler(frame),
        None => {
            log::warn!("syscall: unknown number {}", num);
            -1
        }
    };
    frame.set_return(result);
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn dispatch(_frame: &mut ContextFrame) {
    unreachable!("syscall dispatch is target-only");
}
