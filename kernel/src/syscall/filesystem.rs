//! File and console system calls
//!
//! Reads are stateless: there is no file offset, a read always starts at the
//! beginning of the file -- the open-file entry only exists to pin the inode
//! and carry reference counts across `fork`.

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::Pid;

/// Entry of the listing filled by `read_root_dir`. `#[repr(C)]`, read by
/// the user library as raw bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RootDirEntry {
    /// `NAME.EXT`, NUL terminated.
    pub name: [u8; 16],
    pub size: u32,
}

/// Write a user buffer to the console. Returns the byte count.
pub fn writeu(k: &mut Kernel, caller: Pid, va: usize, len: usize) -> KernelResult<usize> {
    let p = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    let buf = p.user_slice_mut(va, len)?;
    crate::print!("{}", alloc::string::String::from_utf8_lossy(buf));
    Ok(len)
}

/// `open_file(path)` → fd.
pub fn open(k: &mut Kernel, caller: Pid, path_va: usize) -> KernelResult<usize> {
    let path = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?
        .read_user_str(path_va, 32)?;

    let volume = k.volume.as_ref().expect("kernel: no volume mounted");
    let p = k
        .procs
        .get_mut(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    crate::fs::file::open_file(&mut p.fds, &mut k.files, &mut k.inodes, volume, &path)
}

/// `close_file(fd)`.
pub fn close(k: &mut Kernel, caller: Pid, fd: isize) -> KernelResult<usize> {
    let p = k
        .procs
        .get_mut(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    crate::fs::file::close_file(&mut p.fds, &mut k.files, &mut k.inodes, fd)
}

/// Inode index behind a live fd of the caller.
fn resolve_fd(k: &Kernel, caller: Pid, fd: usize) -> KernelResult<usize> {
    let p = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    let file_idx = p
        .fds
        .get(fd)
        .ok_or(KernelError::NotFound { resource: "fd" })?;
    k.files
        .entry(file_idx)
        .inode
        .ok_or(KernelError::NotFound { resource: "fd" })
}

/// `get_file_size(fd)`.
pub fn file_size(k: &mut Kernel, caller: Pid, fd: usize) -> KernelResult<usize> {
    let inode_idx = resolve_fd(k, caller, fd)?;
    Ok(k.inodes.slot(inode_idx).size as usize)
}

/// `read_file(fd, buf, size)`: up to `size` bytes from the start of the
/// file into the caller's buffer. Returns the bytes read.
pub fn read(
    k: &mut Kernel,
    caller: Pid,
    fd: usize,
    va: usize,
    size: usize,
) -> KernelResult<usize> {
    let inode_idx = resolve_fd(k, caller, fd)?;
    let inode = *k.inodes.slot(inode_idx);
    let n = size.min(inode.size as usize);

    let p = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    let buf = p.user_slice_mut(va, n)?;
    let volume = k.volume.as_ref().expect("kernel: no volume mounted");
    Ok(volume.read_file(inode.first_cluster, buf))
}

/// `read_root_dir(buf, cap)`: fill a user array of [`RootDirEntry`].
/// Returns the number of entries written.
pub fn read_root_dir(
    k: &mut Kernel,
    caller: Pid,
    va: usize,
    cap: usize,
) -> KernelResult<usize> {
    let volume = k.volume.as_ref().expect("kernel: no volume mounted");
    let entries: alloc::vec::Vec<RootDirEntry> = volume
        .root_entries()
        .take(cap)
        .map(|e| {
            let (name, _) = e.display_name();
            let mut padded = [0u8; 16];
            padded[..13].copy_from_slice(&name);
            RootDirEntry {
                name: padded,
                size: e.size,
            }
        })
        .collect();

    let p = k
        .procs
        .get(caller)
        .ok_or(KernelError::NotFound { resource: "pid" })?;
    let step = core::mem::size_of::<RootDirEntry>();
    for (i, entry) in entries.iter().enumerate() {
        // SAFETY: repr(C) plain-old-data; the u32 tail pads the struct to
        // its alignment with no interior gaps before it.
        let bytes = unsafe {
            core::slice::from_raw_parts(entry as *const RootDirEntry as *const u8, step)
        };
        p.copy_to_user(va + i * step, bytes)?;
    }
    Ok(entries.len())
}

// ---------------------------------------------------------------------------
// Target-only syscall shims
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod shims {
    use super::*;
    use crate::arch::context::ContextFrame;
    use crate::process::Event;

    fn abi(r: KernelResult<usize>) -> isize {
        match r {
            Ok(v) => v as isize,
            Err(e) => e.to_abi(),
        }
    }

    fn with_current<T>(f: impl FnOnce(&mut Kernel, Pid) -> T) -> T {
        // SAFETY: trap context, IRQs masked.
        let mut k = unsafe { crate::kernel::kernel() };
        let caller = k.sched.current;
        f(&mut k, caller)
    }

    pub fn sys_writeu(frame: &mut ContextFrame) -> isize {
        let va = frame.arg(0) as usize;
        let len = frame.arg(1) as usize;
        with_current(|k, caller| abi(writeu(k, caller, va, len)))
    }

    pub fn sys_open_file(frame: &mut ContextFrame) -> isize {
        let path_va = frame.arg(0) as usize;
        with_current(|k, caller| abi(open(k, caller, path_va)))
    }

    pub fn sys_close_file(frame: &mut ContextFrame) -> isize {
        let fd = frame.arg(0) as isize;
        with_current(|k, caller| abi(close(k, caller, fd)))
    }

    pub fn sys_get_file_size(frame: &mut ContextFrame) -> isize {
        let fd = frame.arg(0) as usize;
        with_current(|k, caller| abi(file_size(k, caller, fd)))
    }

    pub fn sys_read_file(frame: &mut ContextFrame) -> isize {
        let fd = frame.arg(0) as usize;
        let va = frame.arg(1) as usize;
        let size = frame.arg(2) as usize;
        with_current(|k, caller| abi(read(k, caller, fd, va, size)))
    }

    pub fn sys_read_root_dir(frame: &mut ContextFrame) -> isize {
        let va = frame.arg(0) as usize;
        let cap = frame.arg(1) as usize;
        with_current(|k, caller| abi(read_root_dir(k, caller, va, cap)))
    }

    /// Console input is foreground-gated: a background caller parks until
    /// the foreground frees up, then blocks again until a byte arrives.
    pub fn sys_getchar(frame: &mut ContextFrame) -> isize {
        let _ = frame;
        enum Outcome {
            Byte(u8),
            WaitForeground,
            WaitInput,
        }
        loop {
            let outcome = with_current(|k, me| {
                if k.sched.fg != Some(me) {
                    Outcome::WaitForeground
                } else if let Some(byte) = k.console.pop() {
                    Outcome::Byte(byte)
                } else {
                    Outcome::WaitInput
                }
            });
            match outcome {
                Outcome::Byte(byte) => return byte as isize,
                Outcome::WaitForeground => crate::sched::sleep(Event::FgPaused),
                Outcome::WaitInput => crate::sched::sleep(Event::Input),
            }
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub use shims::*;
