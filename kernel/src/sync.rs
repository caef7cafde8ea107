//! Single-core interior mutability for global kernel state.
//!
//! The kernel is single-core and non-reentrant: every entry into kernel code
//! happens through the trap glue, which masks IRQs for the duration of the
//! handler. Under that discipline an atomic lock has nothing to guard
//! against, and on bare-metal AArch64 before the exclusive monitor is set up
//! a spinning CAS can hang outright. `KernelCell` is a plain `UnsafeCell`
//! wrapper with a lock-like API.
//!
//! The host test build never touches the global cell; tests construct their
//! own `Kernel` values and thread them through the subsystem functions.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

pub struct KernelCell<T: ?Sized> {
    data: UnsafeCell<T>,
}

// SAFETY: single-core, IRQs masked inside every kernel path that borrows.
unsafe impl<T: ?Sized + Send> Send for KernelCell<T> {}
unsafe impl<T: ?Sized + Send> Sync for KernelCell<T> {}

pub struct KernelCellGuard<'a, T: ?Sized> {
    data: &'a mut T,
}

impl<T> KernelCell<T> {
    pub const fn new(val: T) -> Self {
        Self {
            data: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> KernelCell<T> {
    /// Borrow the cell mutably.
    ///
    /// # Safety
    /// The caller must be executing with IRQs masked (true for every trap
    /// handler and for boot code before interrupts are enabled), and must not
    /// already hold a guard.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn borrow(&self) -> KernelCellGuard<'_, T> {
        KernelCellGuard {
            // SAFETY: per the function contract there is exactly one borrower.
            data: unsafe { &mut *self.data.get() },
        }
    }
}

impl<T: ?Sized> Deref for KernelCellGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: ?Sized> DerefMut for KernelCellGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}
