//! Host-test scaffolding
//!
//! Builds a real `Kernel` value over heap-backed "physical" memory and a
//! synthetic FAT16 image, so lifecycle tests run the same code paths the
//! target does, minus the context switch itself.

use alloc::vec::Vec;

use crate::fs::fat::test_image::ImageBuilder;
use crate::fs::fat::test_image;
use crate::kernel::Kernel;
use crate::mm::{PAGE_SIZE, USER_BASE};
use crate::process::fork::spawn_program;
use crate::process::{Pid, ProcessState, IDLE_PID};
use crate::sched::grant_cpu;

/// Page-aligned backing for the test page pool, freed with the kernel.
struct Backing {
    ptr: *mut u8,
    layout: std::alloc::Layout,
}

impl Drop for Backing {
    fn drop(&mut self) {
        // SAFETY: allocated in `boot_with_pages` with this layout.
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

pub struct TestKernel {
    pub k: Kernel,
    _backing: Backing,
}

impl TestKernel {
    /// A kernel with a 16-page pool and the standard test volume mounted.
    pub fn boot() -> Self {
        Self::boot_with_pages(16)
    }

    pub fn boot_with_pages(pages: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: layout is non-zero.
        let ptr = unsafe { std::alloc::alloc(layout) };
        assert!(!ptr.is_null());

        let mut k = Kernel::new();
        // SAFETY: freshly allocated region, reserved for this pool.
        unsafe { k.phys.init(ptr as usize, ptr as usize + pages * PAGE_SIZE) };

        let mut img = ImageBuilder::new();
        img.add_file("INIT.BIN", b"init image");
        img.add_file("A.BIN", b"program a");
        img.add_file("B.BIN", b"program b");
        img.add_file("C.BIN", b"program c");
        img.add_file("LS.BIN", b"ls program image");
        img.add_file("HELLO.TXT", b"hello fat16");
        k.volume = Some(test_image::mount(img.build()));

        k.procs.install_idle();

        Self {
            k,
            _backing: Backing { ptr, layout },
        }
    }

    /// Spawn a program from the test volume; panics on failure.
    pub fn spawn(&mut self, path: &str) -> Pid {
        spawn_program(&mut self.k, path).unwrap()
    }

    /// Force `pid` onto the CPU, demoting whoever was running, as if the
    /// round robin had reached it.
    pub fn run_to(&mut self, pid: Pid) {
        let current = self.k.sched.current;
        if current != pid && current != IDLE_PID {
            if let Some(p) = self.k.procs.get_mut(current) {
                if p.state == ProcessState::Running {
                    p.state = ProcessState::Ready;
                    self.k.sched.ready.push(current);
                }
            }
        }
        self.k.sched.ready.remove(pid);
        grant_cpu(&mut self.k, pid);
    }

    /// Write a NUL-terminated string into `pid`'s user page.
    pub fn put_user_str(&mut self, pid: Pid, va: usize, s: &str) {
        let p = self.k.procs.get(pid).unwrap();
        p.copy_to_user(va, s.as_bytes()).unwrap();
        p.copy_to_user(va + s.len(), &[0]).unwrap();
    }

    /// Open a file on behalf of `pid`; returns the fd.
    pub fn open(&mut self, pid: Pid, path: &str) -> usize {
        let va = USER_BASE + 0x500;
        self.put_user_str(pid, va, path);
        crate::syscall::filesystem::open(&mut self.k, pid, va).unwrap()
    }

    /// Pids currently on the ready queue, in order.
    pub fn ready_pids(&self) -> Vec<Pid> {
        self.k.sched.ready.iter().collect()
    }
}
