//! The kernel state aggregate
//!
//! Every piece of process-wide mutable state lives in one [`Kernel`] value:
//! the page pool, the mounted volume, the process table, the scheduler
//! queues, the two file-system tables and the console ring. Subsystem
//! operations take `&mut Kernel`, which keeps every cross-subsystem flow a
//! plain function call -- and directly drivable from host tests.
//!
//! On the target the single instance sits in [`KERNEL`], guarded by the
//! IRQ-masked discipline rather than a lock: all kernel code runs in trap
//! context with IRQs masked, so there is exactly one borrower at a time.

use crate::console::Console;
use crate::fs::{Fat16Volume, FileTable, InodeTable};
use crate::mm::PhysAlloc;
use crate::process::ProcessTable;
use crate::sched::Scheduler;
use crate::sync::{KernelCell, KernelCellGuard};

pub struct Kernel {
    pub phys: PhysAlloc,
    pub volume: Option<Fat16Volume>,
    pub procs: ProcessTable,
    pub sched: Scheduler,
    pub files: FileTable,
    pub inodes: InodeTable,
    pub console: Console,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            phys: PhysAlloc::new(),
            volume: None,
            procs: ProcessTable::new(),
            sched: Scheduler::new(),
            files: FileTable::new(),
            inodes: InodeTable::new(),
            console: Console::new(),
        }
    }

    /// The mounted volume. Boot mounts it before anything can open files.
    pub fn volume(&self) -> &Fat16Volume {
        self.volume.as_ref().expect("kernel: no volume mounted")
    }
}

/// The kernel instance.
pub static KERNEL: KernelCell<Kernel> = KernelCell::new(Kernel::new());

/// Borrow the kernel instance.
///
/// # Safety
/// Caller must hold the IRQ-masked discipline: trap handlers and pre-IRQ
/// boot code qualify, and no other guard may be live.
pub unsafe fn kernel() -> KernelCellGuard<'static, Kernel> {
    // SAFETY: forwarded contract.
    unsafe { KERNEL.borrow() }
}
