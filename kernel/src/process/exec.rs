//! `exec`: replace a process's program image
//!
//! The argv strings are staged into kernel memory before the user page is
//! cleared, then laid out again at the top of the fresh user stack with a
//! pointer vector. A trailing `&` argument marks the process as a daemon
//! and is dropped. The page is cleared before the program is read in; if
//! the read then comes up short there is nothing to put back, and the
//! process is forcibly exited with status 1.

use alloc::string::String;

use super::Pid;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::{phys_to_virt, PAGE_SIZE, USER_BASE};

/// Cap on argv entries, matching the user library's contract.
pub const MAX_ARGS: usize = 16;

/// Replace `pid`'s image with `path`, passing `args` (argv[0] included).
///
/// On success the process's next return to EL0 enters the new program:
/// pc at [`USER_BASE`], x2 = argc, x1 = the argv vector, EL0 sp just below
/// the staged strings at the top of the user page.
pub fn exec(k: &mut Kernel, pid: Pid, path: &str, args: &[String]) -> KernelResult<usize> {
    // A trailing lone `&` requests daemon status and is not an argument.
    let (args, daemon) = match args.split_last() {
        Some((last, rest)) if last == "&" => (rest, true),
        _ => (args, false),
    };
    if args.len() > MAX_ARGS {
        return Err(KernelError::InvalidArgument { name: "argv" });
    }

    // Resolve before touching the image; a bad path must leave the caller
    // intact.
    let entry = k
        .volume
        .as_ref()
        .expect("kernel: no volume mounted")
        .lookup(path)?;

    let p = k.procs.get_mut(pid).ok_or(KernelError::NotFound { resource: "pid" })?;
    p.name = String::from(path);
    if daemon {
        p.daemon = true;
    }

    // Record the argv line for get_proc_data.
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(arg);
    }
    p.set_args_scratch(&line);

    // Point of no return: clear the page and pull the program in.
    let frame_pa = p.user_page().expect("exec: process without user page");
    let page = phys_to_virt(frame_pa);
    // SAFETY: the user frame is exclusively this process's.
    unsafe { core::ptr::write_bytes(page, 0, PAGE_SIZE) };

    let expected = (entry.size as usize).min(PAGE_SIZE);
    let image = {
        // SAFETY: as above; expected is clamped to the page.
        let buf = unsafe { core::slice::from_raw_parts_mut(page, expected) };
        k.volume
            .as_ref()
            .expect("kernel: no volume mounted")
            .read_file(entry.first_cluster, buf)
    };
    if image < expected {
        log::error!("exec: short read of {} ({}/{} bytes)", path, image, expected);
        crate::process::exit::exit_process(k, pid, 1, true);
        return Err(KernelError::NotFound { resource: "file" });
    }

    // Argv layout at the top of the user page: the strings first, then the
    // NUL-terminated pointer vector below them; sp lands on the vector.
    let p = k.procs.get_mut(pid).expect("exec: pid vanished");
    let top = USER_BASE + PAGE_SIZE;
    let strings_len: usize = args.iter().map(|a| a.len() + 1).sum();
    let mut cursor = top - strings_len;
    let mut pointers = [0u64; MAX_ARGS + 1];
    for (i, arg) in args.iter().enumerate() {
        pointers[i] = cursor as u64;
        p.copy_to_user(cursor, arg.as_bytes())?;
        p.copy_to_user(cursor + arg.len(), &[0])?;
        cursor += arg.len() + 1;
    }

    let vector_len = (args.len() + 1) * core::mem::size_of::<u64>();
    let vector_base = ((top - strings_len - vector_len) / 16) * 16;
    for (i, ptr) in pointers.iter().take(args.len() + 1).enumerate() {
        p.copy_to_user(vector_base + i * 8, &ptr.to_le_bytes())?;
    }

    // SAFETY: p owns its kernel stack; single core.
    let frame = unsafe { p.trap_frame_mut() };
    frame.elr = USER_BASE as u64;
    frame.sp_el0 = vector_base as u64;
    frame.spsr = crate::arch::context::SPSR_EL0;
    frame.x = [0; 31];
    frame.x[1] = vector_base as u64;
    frame.x[2] = args.len() as u64;

    log::debug!("exec: pid {} -> {} ({} args)", pid, path, args.len());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use crate::process::ProcessState;
    use crate::test_support::TestKernel;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| String::from(*a)).collect()
    }

    #[test]
    fn exec_replaces_image_and_builds_argv() {
        let mut tk = TestKernel::boot();
        let pid = tk.spawn("A.BIN");
        tk.run_to(pid);

        exec(&mut tk.k, pid, "LS.BIN", &argv(&["LS.BIN", "-l"])).unwrap();

        let p = tk.k.procs.get(pid).unwrap();
        assert_eq!(p.name, "LS.BIN");
        assert!(!p.daemon);
        assert_eq!(p.args_scratch(), b"LS.BIN -l");

        let frame = unsafe { p.trap_frame() };
        assert_eq!(frame.elr, USER_BASE as u64);
        assert_eq!(frame.x[2], 2, "argc in x2");
        let vector = frame.x[1] as usize;
        assert_eq!(frame.sp_el0 as usize, vector);
        assert_eq!(vector % 16, 0);

        // Walk the vector: two string pointers and the terminator.
        let argv0 = p.read_user_u64(vector).unwrap() as usize;
        let argv1 = p.read_user_u64(vector + 8).unwrap() as usize;
        assert_eq!(p.read_user_u64(vector + 16).unwrap(), 0);
        assert_eq!(p.read_user_str(argv0, 32).unwrap(), "LS.BIN");
        assert_eq!(p.read_user_str(argv1, 32).unwrap(), "-l");

        // The strings sit flush against the top of the user page.
        assert_eq!(argv1 + "-l".len() + 1, USER_BASE + PAGE_SIZE);

        // The program image itself landed at the base.
        let mut head = [0u8; 2];
        p.copy_from_user(USER_BASE, &mut head).unwrap();
        assert_eq!(&head, b"ls");
    }

    #[test]
    fn trailing_ampersand_marks_daemon_and_is_dropped() {
        let mut tk = TestKernel::boot();
        let pid = tk.spawn("A.BIN");
        tk.run_to(pid);

        exec(&mut tk.k, pid, "LS.BIN", &argv(&["LS.BIN", "&"])).unwrap();

        let p = tk.k.procs.get(pid).unwrap();
        assert!(p.daemon);
        let frame = unsafe { p.trap_frame() };
        assert_eq!(frame.x[2], 1, "the & is not an argument");
    }

    #[test]
    fn exec_missing_program_leaves_caller_untouched() {
        let mut tk = TestKernel::boot();
        let pid = tk.spawn("A.BIN");
        tk.run_to(pid);

        let before = unsafe { *tk.k.procs.get(pid).unwrap().trap_frame() };
        assert_eq!(
            exec(&mut tk.k, pid, "NOPE.BIN", &argv(&["NOPE.BIN"])),
            Err(KernelError::NotFound { resource: "file" })
        );
        let p = tk.k.procs.get(pid).unwrap();
        assert_eq!(p.name, "A.BIN");
        assert_eq!(p.state, ProcessState::Running);
        let after = unsafe { p.trap_frame() };
        assert_eq!(before.elr, after.elr);
        assert_eq!(before.sp_el0, after.sp_el0);
    }

    #[test]
    fn exec_clears_previous_page_contents() {
        let mut tk = TestKernel::boot();
        let pid = tk.spawn("A.BIN");
        tk.run_to(pid);

        // Scribble somewhere the new image won't reach.
        tk.k
            .procs
            .get(pid)
            .unwrap()
            .copy_to_user(USER_BASE + 4096, b"junk")
            .unwrap();

        exec(&mut tk.k, pid, "LS.BIN", &argv(&["LS.BIN"])).unwrap();

        let mut probe = [0u8; 4];
        tk.k
            .procs
            .get(pid)
            .unwrap()
            .copy_from_user(USER_BASE + 4096, &mut probe)
            .unwrap();
        assert_eq!(probe, [0, 0, 0, 0]);
    }
}
