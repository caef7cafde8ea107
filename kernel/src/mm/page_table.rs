//! Per-process translation tables
//!
//! User address spaces are built from 4 KiB-granule translation tables with
//! 2 MiB block leaves at level 2, so a virtual address resolves through an
//! L0 -> L1 -> L2 walk. Each table occupies the first 4 KiB of a pool page;
//! everything the space owns (root, intermediate tables, user frames) comes
//! from the 2 MiB pool and goes back to it in `free_uvm`.
//!
//! The kernel's own high-half mapping behind `TTBR1_EL1` is set up by the
//! boot glue and never touched here.

use bitflags::bitflags;

use super::{phys_to_virt, PhysAlloc, ENTRIES_PER_TABLE, PAGE_SIZE, USER_BASE};
use crate::error::KernelResult;
use crate::fs::fat::Fat16Volume;

bitflags! {
    /// Translation table descriptor attribute bits.
    ///
    /// MAIR_EL1 is programmed by the boot glue with attr index 0 = device
    /// nGnRnE and attr index 1 = normal write-back, which `ATTR_NORMAL`
    /// selects via bits [4:2].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Descriptor: u64 {
        const VALID        = 1 << 0;
        /// Set: points to a next-level table. Clear on a valid L2 entry:
        /// a 2 MiB block.
        const TABLE        = 1 << 1;
        /// MAIR attr index 1 (normal memory). Index 0 (device) is the
        /// all-zero encoding.
        const ATTR_NORMAL  = 1 << 2;
        /// AP[1]: accessible from EL0.
        const USER         = 1 << 6;
        /// AP[2]: read-only.
        const READ_ONLY    = 1 << 7;
        const INNER_SHARED = 3 << 8;
        /// Access flag; without it the first access faults.
        const ACCESSED     = 1 << 10;
        const NON_GLOBAL   = 1 << 11;
        /// Privileged execute-never.
        const PXN          = 1 << 53;
        /// Unprivileged execute-never.
        const UXN          = 1 << 54;
    }
}

impl Descriptor {
    /// Leaf attributes for the user page: EL0-accessible normal memory.
    pub fn user_block() -> Self {
        Self::VALID
            | Self::ATTR_NORMAL
            | Self::USER
            | Self::INNER_SHARED
            | Self::ACCESSED
            | Self::NON_GLOBAL
            | Self::PXN
    }
}

/// Output-address field of a table descriptor (next-level table, 4 KiB aligned).
const TABLE_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Output-address field of a 2 MiB block descriptor.
const BLOCK_ADDR_MASK: u64 = 0x0000_FFFF_FFE0_0000;

/// Index into the table at `level` (0, 1 or 2) for a virtual address.
#[inline]
fn table_index(va: usize, level: usize) -> usize {
    (va >> (39 - 9 * level)) & (ENTRIES_PER_TABLE - 1)
}

#[inline]
fn entry_slot(table_pa: usize, index: usize) -> *mut u64 {
    // SAFETY of callers: table_pa is an owned, initialized table page.
    unsafe { (phys_to_virt(table_pa) as *mut u64).add(index) }
}

/// A user address space: the physical address of its L0 root table.
#[derive(Debug)]
pub struct AddressSpace {
    root: usize,
}

impl AddressSpace {
    /// Allocate an empty address space.
    pub fn new(phys: &mut PhysAlloc) -> KernelResult<Self> {
        let root = alloc_table(phys)?;
        Ok(Self { root })
    }

    /// Physical address of the root table, as loaded into `TTBR0_EL1`.
    pub fn root(&self) -> usize {
        self.root
    }

    /// Map the 2 MiB block at `va` to the frame at `pa`.
    ///
    /// Intermediate tables are created on demand. Remapping an already
    /// mapped block is an invariant violation.
    pub fn map_block(
        &mut self,
        phys: &mut PhysAlloc,
        va: usize,
        pa: usize,
        flags: Descriptor,
    ) -> KernelResult<()> {
        debug_assert_eq!(va % PAGE_SIZE, 0);
        debug_assert_eq!(pa % PAGE_SIZE, 0);

        let l1 = self.next_table(phys, self.root, table_index(va, 0))?;
        let l2 = self.next_table(phys, l1, table_index(va, 1))?;

        let slot = entry_slot(l2, table_index(va, 2));
        // SAFETY: slot is inside an owned table page.
        unsafe {
            assert_eq!(*slot & Descriptor::VALID.bits(), 0, "vm: remapping {:#x}", va);
            *slot = pa as u64 | flags.bits();
        }
        Ok(())
    }

    /// Walk one level, allocating the next table if the entry is empty.
    fn next_table(
        &mut self,
        phys: &mut PhysAlloc,
        table_pa: usize,
        index: usize,
    ) -> KernelResult<usize> {
        let slot = entry_slot(table_pa, index);
        // SAFETY: slot is inside an owned table page.
        let entry = unsafe { *slot };
        if entry & Descriptor::VALID.bits() != 0 {
            return Ok((entry & TABLE_ADDR_MASK) as usize);
        }
        let next = alloc_table(phys)?;
        // SAFETY: as above; next is exclusively owned.
        unsafe {
            *slot = next as u64 | (Descriptor::VALID | Descriptor::TABLE).bits();
        }
        Ok(next)
    }

    /// Physical address of the block mapped at `va`, if any.
    pub fn lookup_block(&self, va: usize) -> Option<usize> {
        let mut table = self.root;
        for level in 0..2 {
            // SAFETY: table pages are owned by this space.
            let entry = unsafe { *entry_slot(table, table_index(va, level)) };
            if entry & Descriptor::VALID.bits() == 0 {
                return None;
            }
            table = (entry & TABLE_ADDR_MASK) as usize;
        }
        // SAFETY: as above.
        let leaf = unsafe { *entry_slot(table, table_index(va, 2)) };
        if leaf & Descriptor::VALID.bits() == 0 {
            return None;
        }
        Some((leaf & BLOCK_ADDR_MASK) as usize)
    }

    /// Physical address of the single user page.
    pub fn user_page(&self) -> Option<usize> {
        self.lookup_block(USER_BASE)
    }

    /// Tear the space down: every mapped block, every table, then the root.
    pub fn free_uvm(self, phys: &mut PhysAlloc) {
        for i0 in 0..ENTRIES_PER_TABLE {
            // SAFETY: walking tables owned by this space.
            let e0 = unsafe { *entry_slot(self.root, i0) };
            if e0 & Descriptor::VALID.bits() == 0 {
                continue;
            }
            let l1 = (e0 & TABLE_ADDR_MASK) as usize;
            for i1 in 0..ENTRIES_PER_TABLE {
                // SAFETY: as above.
                let e1 = unsafe { *entry_slot(l1, i1) };
                if e1 & Descriptor::VALID.bits() == 0 {
                    continue;
                }
                let l2 = (e1 & TABLE_ADDR_MASK) as usize;
                for i2 in 0..ENTRIES_PER_TABLE {
                    // SAFETY: as above.
                    let e2 = unsafe { *entry_slot(l2, i2) };
                    if e2 & Descriptor::VALID.bits() != 0 {
                        // SAFETY: the block frame is owned by this space and
                        // unreachable once the space is gone.
                        unsafe { phys.free((e2 & BLOCK_ADDR_MASK) as usize) };
                    }
                }
                // SAFETY: table pages are owned by this space.
                unsafe { phys.free(l2) };
            }
            // SAFETY: as above.
            unsafe { phys.free(l1) };
        }
        // SAFETY: as above.
        unsafe { phys.free(self.root) };
    }

    /// Install this space in `TTBR0_EL1` and invalidate stale translations.
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    pub fn switch(&self) {
        use cortex_a::asm::barrier;
        use cortex_a::registers::*;

        TTBR0_EL1.set(self.root as u64);
        barrier::dsb(barrier::ISH);
        // SAFETY: TLB maintenance only; no memory is touched.
        unsafe {
            core::arch::asm!("tlbi vmalle1", options(nostack, preserves_flags));
        }
        barrier::dsb(barrier::ISH);
        barrier::isb(barrier::SY);
    }
}

fn alloc_table(phys: &mut PhysAlloc) -> KernelResult<usize> {
    // Tables are 4 KiB; the rest of the pool page is unused. Zeroing the
    // table region is what marks every entry invalid.
    let page = phys.alloc()?;
    // SAFETY: freshly allocated page, exclusively owned.
    unsafe { core::ptr::write_bytes(phys_to_virt(page), 0, ENTRIES_PER_TABLE * 8) };
    Ok(page)
}

/// Populate an empty user address space for `path`: one zeroed 2 MiB frame
/// mapped at [`USER_BASE`], loaded with the file's contents.
pub fn setup_uvm(
    space: &mut AddressSpace,
    phys: &mut PhysAlloc,
    volume: &Fat16Volume,
    path: &str,
) -> KernelResult<()> {
    let entry = volume.lookup(path)?;

    let frame = phys.alloc_zeroed()?;
    if let Err(e) = space.map_block(phys, USER_BASE, frame, Descriptor::user_block()) {
        // SAFETY: the frame is not yet reachable from the space.
        unsafe { phys.free(frame) };
        return Err(e);
    }

    let size = (entry.size as usize).min(PAGE_SIZE);
    // SAFETY: frame is an owned 2 MiB page; size is clamped to it.
    let buf = unsafe { core::slice::from_raw_parts_mut(phys_to_virt(frame), size) };
    volume.read_file(entry.first_cluster, buf);
    Ok(())
}

/// Clone the single user page of `src` into a fresh frame mapped identically
/// in `dst`. `size` bytes are copied.
pub fn copy_uvm(
    dst: &mut AddressSpace,
    src: &AddressSpace,
    phys: &mut PhysAlloc,
    size: usize,
) -> KernelResult<()> {
    let src_frame = src.user_page().expect("vm: source space has no user page");
    let frame = phys.alloc()?;
    // SAFETY: both frames are owned 2 MiB pages; size is clamped below.
    unsafe {
        core::ptr::copy_nonoverlapping(
            phys_to_virt(src_frame),
            phys_to_virt(frame),
            size.min(PAGE_SIZE),
        );
    }
    if let Err(e) = dst.map_block(phys, USER_BASE, frame, Descriptor::user_block()) {
        // SAFETY: the frame never became reachable from dst.
        unsafe { phys.free(frame) };
        return Err(e);
    }
    Ok(())
}
