//! Page-granular allocation for thread stacks.
//!
//! Every thread owns exactly one page: its record at the base, its kernel
//! stack growing down from the top. Pages come from the global allocator
//! and are recycled through a free list so stack churn does not hammer the
//! heap.

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;
use core::ptr::NonNull;
use portable_atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Size and alignment of a thread's stack page. Record placement relies on
/// the alignment: the record sits at `page & !(PGSIZE - 1)`.
pub const PGSIZE: usize = 4096;

// PGSIZE is a power of two, so this layout is always valid.
const PAGE_LAYOUT: Layout = unsafe { Layout::from_size_align_unchecked(PGSIZE, PGSIZE) };

/// Pool of PGSIZE-aligned, zero-filled pages.
pub struct PagePool {
    free: Mutex<Vec<NonNull<u8>>>,
    allocated: AtomicUsize,
    in_use: AtomicUsize,
}

unsafe impl Send for PagePool {}
unsafe impl Sync for PagePool {}

impl PagePool {
    pub const fn new() -> PagePool {
        PagePool {
            free: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// A zeroed page, or `None` when the allocator is exhausted.
    pub fn alloc_zeroed(&self) -> Option<NonNull<u8>> {
        if let Some(page) = self.free.lock().pop() {
            unsafe { core::ptr::write_bytes(page.as_ptr(), 0, PGSIZE) };
            self.in_use.fetch_add(1, Ordering::AcqRel);
            return Some(page);
        }

        let page = NonNull::new(unsafe { alloc_zeroed(PAGE_LAYOUT) })?;
        self.allocated.fetch_add(1, Ordering::AcqRel);
        self.in_use.fetch_add(1, Ordering::AcqRel);
        Some(page)
    }

    /// Return `page` to the pool.
    ///
    /// # Safety
    ///
    /// `page` must have come from [`Self::alloc_zeroed`] on this pool and
    /// must not be touched afterwards.
    pub unsafe fn free(&self, page: NonNull<u8>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().push(page);
    }

    /// Pages currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Pages ever obtained from the global allocator.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }
}

impl Default for PagePool {
    fn default() -> PagePool {
        PagePool::new()
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        let mut free = self.free.lock();
        while let Some(page) = free.pop() {
            unsafe { dealloc(page.as_ptr(), PAGE_LAYOUT) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_aligned_and_zeroed() {
        let pool = PagePool::new();
        let page = pool.alloc_zeroed().unwrap();
        assert_eq!(page.as_ptr() as usize % PGSIZE, 0);
        let bytes = unsafe { core::slice::from_raw_parts(page.as_ptr(), PGSIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { pool.free(page) };
    }

    #[test]
    fn freed_pages_are_reused_and_rezeroed() {
        let pool = PagePool::new();
        let page = pool.alloc_zeroed().unwrap();
        unsafe {
            page.as_ptr().write(0xAA);
            pool.free(page);
        }

        let again = pool.alloc_zeroed().unwrap();
        assert_eq!(again, page);
        assert_eq!(unsafe { again.as_ptr().read() }, 0);
        assert_eq!(pool.allocated(), 1);
        unsafe { pool.free(again) };
    }

    #[test]
    fn usage_counters_track_handouts() {
        let pool = PagePool::new();
        let a = pool.alloc_zeroed().unwrap();
        let b = pool.alloc_zeroed().unwrap();
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.allocated(), 2);
        unsafe { pool.free(a) };
        assert_eq!(pool.in_use(), 1);
        unsafe { pool.free(b) };
        assert_eq!(pool.in_use(), 0);
    }
}
