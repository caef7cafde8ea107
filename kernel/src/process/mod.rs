//! Process lifecycle
//!
//! The process table, the per-process control block, and the lifecycle
//! operations (`fork`, `exec`, `exit`, `wait`, `kill` lives with the signal
//! code). Scheduling itself is in [`crate::sched`].

pub mod exec;
pub mod exit;
pub mod fork;
pub mod pcb;
pub mod table;
pub mod wait;

pub use pcb::{Event, Process, ProcessState, WaitTarget};
pub use table::{ProcessTable, PROC_TABLE_SIZE};

/// Process identifier. Pid 0 is the idle process, pid 1 is init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u64);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The idle process.
pub const IDLE_PID: Pid = Pid(0);

/// Init; the reaper of orphans.
pub const INIT_PID: Pid = Pid(1);
