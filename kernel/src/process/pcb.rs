//! The per-process control block
//!
//! One slot of the process table. A process exclusively owns one kernel
//! stack page and (unless it is idle) one user address space; both go back
//! to the page pool when `wait` reaps it.

use alloc::string::String;

use super::Pid;
use crate::arch::context::{ContextFrame, SwitchFrame, SPSR_EL0};
use crate::error::KernelError;
use crate::fs::FdTable;
use crate::mm::{phys_to_virt, AddressSpace, PAGE_SIZE, USER_BASE};
use crate::signal::SignalState;

/// Lifecycle states. An unoccupied table slot is `None` rather than a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Being created; not yet schedulable.
    Init,
    /// On the ready queue.
    Ready,
    /// Owns the CPU.
    Running,
    /// On the wait list, blocked on `event`.
    Sleep,
    /// A zombie awaiting `wait`.
    Killed,
}

/// What a sleeping process is blocked on. A genuine wake resets the event to
/// `None`; the sleep loop treats anything else as spurious and sleeps again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Event {
    #[default]
    None,
    /// Zombie tag: carries the dead process's own pid for `wait` to match.
    Reap(Pid),
    /// Waiters in `wait`, woken whenever a zombie is enqueued.
    ZombieCleanup,
    /// Processes parked until the foreground slot frees up.
    FgPaused,
    /// Sleepers due to wake at this tick.
    Tick(u64),
    /// Blocked on console input.
    Input,
}

/// Which children, if any, the process is currently blocked waiting for.
/// `exit` consults this to decide whether the parent wants this child's
/// SIGCHLD or whether it should fall through to init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTarget {
    #[default]
    NotWaiting,
    AnyChild,
    Child(Pid),
}

impl ProcessState {
    /// One-byte code reported by `get_proc_data`.
    pub fn code(self) -> u8 {
        match self {
            Self::Init => b'I',
            Self::Ready => b'R',
            Self::Running => b'X',
            Self::Sleep => b'S',
            Self::Killed => b'Z',
        }
    }
}

/// Bytes reserved at the bottom of the kernel stack page for the argv
/// scratch string that `get_proc_data` reports.
pub const ARG_SCRATCH_SIZE: usize = 128;

/// A process-table slot.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pub name: String,
    pub state: ProcessState,
    /// Physical address of the kernel stack page; 0 for idle, which keeps
    /// running on the boot stack.
    pub kstack: usize,
    /// Saved kernel SP, exchanged by the context-switch primitive.
    pub kstack_sp: usize,
    pub space: Option<AddressSpace>,
    pub event: Event,
    /// Daemons never claim the foreground slot.
    pub daemon: bool,
    pub wait_target: WaitTarget,
    pub signals: SignalState,
    pub fds: FdTable,
    /// Encoded status once `state == Killed`.
    pub exit_status: i32,
}

impl Process {
    /// The idle slot: pid 0, running from boot, never enters any queue and
    /// never claims the foreground.
    pub fn idle() -> Self {
        Self {
            pid: super::IDLE_PID,
            ppid: super::IDLE_PID,
            name: String::from("idle"),
            state: ProcessState::Running,
            kstack: 0,
            kstack_sp: 0,
            space: None,
            event: Event::None,
            daemon: true,
            wait_target: WaitTarget::NotWaiting,
            signals: SignalState::new(),
            fds: FdTable::new(),
            exit_status: 0,
        }
    }

    /// Kernel-visible pointer to the context frame at the top of the kernel
    /// stack.
    pub fn trap_frame_ptr(&self) -> *mut ContextFrame {
        debug_assert_ne!(self.kstack, 0, "idle has no trap frame");
        let top = phys_to_virt(self.kstack) as usize + PAGE_SIZE;
        (top - core::mem::size_of::<ContextFrame>()) as *mut ContextFrame
    }

    /// The context frame at the top of the kernel stack.
    ///
    /// # Safety
    /// The process must own its kernel stack page and must not be running
    /// user code on another core (trivially true: single core).
    pub unsafe fn trap_frame_mut(&mut self) -> &mut ContextFrame {
        // SAFETY: per the function contract.
        unsafe { &mut *self.trap_frame_ptr() }
    }

    /// Shared view of the context frame.
    ///
    /// # Safety
    /// Same contract as [`trap_frame_mut`](Self::trap_frame_mut).
    pub unsafe fn trap_frame(&self) -> &ContextFrame {
        // SAFETY: per the function contract.
        unsafe { &*self.trap_frame_ptr() }
    }

    /// Seed the kernel stack for the first dispatch: a context frame that
    /// enters EL0 at [`USER_BASE`] with the EL0 stack at the top of the user
    /// page and IRQs unmasked, and below it a switch frame returning through
    /// the trap-return epilogue.
    pub fn seed_initial_stack(&mut self) {
        // SAFETY: the freshly allocated stack page is exclusively ours.
        let frame = unsafe { self.trap_frame_mut() };
        *frame = ContextFrame::zeroed();
        frame.elr = USER_BASE as u64;
        frame.sp_el0 = (USER_BASE + PAGE_SIZE) as u64;
        frame.spsr = SPSR_EL0;

        let mut switch = SwitchFrame::zeroed();
        switch.lr = crate::arch::trap_return_addr() as u64;

        let switch_addr =
            self.trap_frame_ptr() as usize - core::mem::size_of::<SwitchFrame>();
        // SAFETY: as above; the switch frame sits below the context frame,
        // far from the arg scratch area at the bottom of the page.
        unsafe { *(switch_addr as *mut SwitchFrame) = switch };
        self.kstack_sp = switch_addr;
    }

    /// Record the argv line in the scratch area at the bottom of the kernel
    /// stack page, NUL-terminated and truncated to fit.
    pub fn set_args_scratch(&mut self, line: &str) {
        debug_assert_ne!(self.kstack, 0);
        let take = line.len().min(ARG_SCRATCH_SIZE - 1);
        // SAFETY: the bottom of our own stack page; the stack grows down
        // from the top and never reaches it.
        unsafe {
            let base = phys_to_virt(self.kstack);
            core::ptr::copy_nonoverlapping(line.as_ptr(), base, take);
            *base.add(take) = 0;
        }
    }

    /// The recorded argv line.
    pub fn args_scratch(&self) -> &[u8] {
        debug_assert_ne!(self.kstack, 0);
        // SAFETY: scratch area of our own stack page, always NUL-terminated
        // by `set_args_scratch`.
        unsafe {
            let base = phys_to_virt(self.kstack);
            let scratch = core::slice::from_raw_parts(base, ARG_SCRATCH_SIZE);
            let len = scratch.iter().position(|&b| b == 0).unwrap_or(0);
            &scratch[..len]
        }
    }

    /// Physical address of the single user page.
    pub fn user_page(&self) -> Option<usize> {
        self.space.as_ref().and_then(|s| s.user_page())
    }

    /// Kernel pointer to `[va, va + len)` in this process's user page, after
    /// a bounds check against the single-page user window.
    fn user_range(&self, va: usize, len: usize) -> Result<*mut u8, KernelError> {
        let page = self
            .user_page()
            .ok_or(KernelError::BadAddress { addr: va })?;
        let end = va.checked_add(len).ok_or(KernelError::BadAddress { addr: va })?;
        if va < USER_BASE || end > USER_BASE + PAGE_SIZE {
            return Err(KernelError::BadAddress { addr: va });
        }
        // SAFETY: the offset stays inside the single mapped user page.
        Ok(unsafe { phys_to_virt(page).add(va - USER_BASE) })
    }

    /// Borrow `[va, va + len)` of the user page as a kernel-side slice.
    /// Single core with IRQs masked: the owning process cannot touch the
    /// page while the kernel holds this.
    #[allow(clippy::mut_from_ref)]
    pub fn user_slice_mut(&self, va: usize, len: usize) -> Result<&mut [u8], KernelError> {
        let ptr = self.user_range(va, len)?;
        // SAFETY: bounds-checked window of a page only this process owns.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Copy bytes out of this process's user page.
    pub fn copy_from_user(&self, va: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        let src = self.user_range(va, buf.len())?;
        // SAFETY: user_range bounds-checked the window inside our user page.
        unsafe { core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Copy bytes into this process's user page.
    pub fn copy_to_user(&self, va: usize, data: &[u8]) -> Result<(), KernelError> {
        let dst = self.user_range(va, data.len())?;
        // SAFETY: as above; the page is exclusively this process's.
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    /// Read a NUL-terminated string from user memory, capped at `max` bytes.
    pub fn read_user_str(&self, va: usize, max: usize) -> Result<String, KernelError> {
        let mut out = alloc::vec::Vec::new();
        for off in 0..max {
            let addr = va
                .checked_add(off)
                .ok_or(KernelError::BadAddress { addr: va })?;
            let mut byte = [0u8; 1];
            self.copy_from_user(addr, &mut byte)?;
            if byte[0] == 0 {
                return String::from_utf8(out)
                    .map_err(|_| KernelError::InvalidArgument { name: "string" });
            }
            out.push(byte[0]);
        }
        Err(KernelError::InvalidArgument { name: "string" })
    }

    /// Read one little-endian u64 from user memory.
    pub fn read_user_u64(&self, va: usize) -> Result<u64, KernelError> {
        let mut raw = [0u8; 8];
        self.copy_from_user(va, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }
}
