//! Physical page allocator
//!
//! Hands out 2 MiB frames from the free region between the loaded kernel
//! image and [`MEMORY_END`](super::MEMORY_END). Free pages form a singly
//! linked list threaded through the pages themselves: the first word of a
//! free page holds the physical address of the next free page. Both `alloc`
//! and `free` are O(1).

use super::{page_align_down, page_align_up, phys_to_virt, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};

/// End-of-list marker in the embedded free list.
const NIL: usize = 0;

/// 2 MiB page frame pool.
pub struct PhysAlloc {
    free_head: usize,
    pool_start: usize,
    pool_end: usize,
    free_pages: usize,
}

impl PhysAlloc {
    /// An empty pool. [`init`](Self::init) must run before the first `alloc`.
    pub const fn new() -> Self {
        Self {
            free_head: NIL,
            pool_start: 0,
            pool_end: 0,
            free_pages: 0,
        }
    }

    /// Seed the pool with every whole page in `[start, end)`.
    ///
    /// # Safety
    /// The range must be unused RAM, mapped through the kernel linear
    /// mapping, and must not overlap the kernel image or any live data.
    pub unsafe fn init(&mut self, start: usize, end: usize) {
        self.pool_start = page_align_up(start);
        self.pool_end = page_align_down(end);
        assert!(
            self.pool_start < self.pool_end,
            "phys: empty pool [{:#x}, {:#x})",
            start,
            end
        );

        let mut page = self.pool_start;
        while page < self.pool_end {
            // SAFETY: page is within the caller-guaranteed free range.
            unsafe { self.push(page) };
            page += PAGE_SIZE;
        }
        log::info!(
            "phys: {} pages in [{:#x}, {:#x})",
            self.free_pages,
            self.pool_start,
            self.pool_end
        );
    }

    /// Take one page from the pool. Contents are unspecified.
    pub fn alloc(&mut self) -> KernelResult<usize> {
        if self.free_head == NIL {
            return Err(KernelError::ResourceExhausted { resource: "pages" });
        }
        let page = self.free_head;
        // SAFETY: every page on the list was pushed by init/free and lies in
        // the pool range.
        self.free_head = unsafe { *(phys_to_virt(page) as *const usize) };
        self.free_pages -= 1;
        Ok(page)
    }

    /// Take one zeroed page from the pool.
    pub fn alloc_zeroed(&mut self) -> KernelResult<usize> {
        let page = self.alloc()?;
        // SAFETY: the page was just handed out by alloc and is exclusively ours.
        unsafe { core::ptr::write_bytes(phys_to_virt(page), 0, PAGE_SIZE) };
        Ok(page)
    }

    /// Return a page to the pool.
    ///
    /// # Safety
    /// `page` must have come from [`alloc`](Self::alloc) and must not be
    /// referenced by anything after this call.
    pub unsafe fn free(&mut self, page: usize) {
        assert_eq!(page % PAGE_SIZE, 0, "phys: freeing unaligned {:#x}", page);
        assert!(
            page >= self.pool_start && page < self.pool_end,
            "phys: freeing {:#x} outside pool",
            page
        );
        // SAFETY: per the function contract the page is unreferenced.
        unsafe { self.push(page) };
    }

    unsafe fn push(&mut self, page: usize) {
        // SAFETY: caller guarantees exclusive access to the page.
        unsafe { *(phys_to_virt(page) as *mut usize) = self.free_head };
        self.free_head = page;
        self.free_pages += 1;
    }

    /// Number of pages currently free.
    pub fn free_count(&self) -> usize {
        self.free_pages
    }
}

#[cfg(test)]
pub(crate) mod test_pool {
    //! Host-side page pool backing: a leaked, page-aligned heap block whose
    //! addresses stand in for physical addresses.

    use super::*;

    pub fn alloc_backing(pages: usize) -> (usize, usize) {
        let size = pages * PAGE_SIZE;
        let layout = std::alloc::Layout::from_size_align(size, PAGE_SIZE).unwrap();
        // Leaked on purpose; test pools live for the whole test process.
        let base = unsafe { std::alloc::alloc(layout) } as usize;
        assert_ne!(base, 0);
        (base, base + size)
    }

    pub fn new_pool(pages: usize) -> PhysAlloc {
        let (start, end) = alloc_backing(pages);
        let mut pool = PhysAlloc::new();
        unsafe { pool.init(start, end) };
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_counts_pages() {
        let pool = test_pool::new_pool(4);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn alloc_drains_then_exhausts() {
        let mut pool = test_pool::new_pool(3);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(
            pool.alloc(),
            Err(KernelError::ResourceExhausted { resource: "pages" })
        );
    }

    #[test]
    fn free_makes_page_reusable() {
        let mut pool = test_pool::new_pool(1);
        let a = pool.alloc().unwrap();
        assert_eq!(pool.free_count(), 0);
        unsafe { pool.free(a) };
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.alloc().unwrap(), a);
    }

    #[test]
    fn alloc_zeroed_clears_contents() {
        let mut pool = test_pool::new_pool(2);
        let a = pool.alloc().unwrap();
        unsafe {
            core::ptr::write_bytes(phys_to_virt(a), 0xAB, PAGE_SIZE);
            pool.free(a);
        }
        let b = pool.alloc_zeroed().unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(phys_to_virt(b), PAGE_SIZE) };
        assert!(bytes.iter().all(|&x| x == 0));
    }

    #[test]
    #[should_panic(expected = "outside pool")]
    fn free_out_of_range_panics() {
        let mut pool = test_pool::new_pool(1);
        unsafe { pool.free(0xDEAD_E000_0000 & !(PAGE_SIZE - 1)) };
    }
}
