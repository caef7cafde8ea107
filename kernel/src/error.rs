//! Kernel error types
//!
//! Every syscall handler returns `Result<usize, KernelError>`; the dispatcher
//! folds the error into the small-integer ABI the user library expects.
//! Conditions the kernel cannot continue from (bad FAT signature, allocation
//! failure during boot) are not errors and panic instead.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A fixed-size kernel table or the page pool is full.
    ResourceExhausted { resource: &'static str },

    /// A path, pid or fd lookup failed.
    NotFound { resource: &'static str },

    /// A syscall argument is out of range.
    InvalidArgument { name: &'static str },

    /// A user-supplied pointer falls outside the process's user page.
    BadAddress { addr: usize },

    /// Non-blocking wait found no reapable child.
    WouldBlock,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted { resource } => {
                write!(f, "out of {}", resource)
            }
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
            Self::BadAddress { addr } => write!(f, "bad user address {:#x}", addr),
            Self::WouldBlock => write!(f, "operation would block"),
        }
    }
}

/// Result alias used across the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Fold the error into the syscall ABI return value.
    ///
    /// `WouldBlock` maps to 0 (WNOHANG wait with no zombie); everything else
    /// is -1.
    pub fn to_abi(self) -> isize {
        match self {
            Self::WouldBlock => 0,
            _ => -1,
        }
    }
}
