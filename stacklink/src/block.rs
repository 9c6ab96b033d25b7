//! Shared data block.
//!
//! Exists only once sharing has escaped stack confinement. Holds the atomic
//! count and the object's deleter; the object address itself stays in every
//! handle. Allocation is fallible and goes through the raw allocator so a
//! failure can be reported instead of aborting.

use crate::config::Config;
use crate::deleter::Deleter;
use crate::error::{HybridError, Result, fatal};
use crate::stats;
use alloc::alloc::{Layout, alloc, dealloc};
use core::mem::{self, ManuallyDrop};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering, fence};

/// Counts above this are treated as a leak of references.
const MAX_REFCOUNT: usize = isize::MAX as usize;

pub(crate) struct SharedBlock<D> {
    count: AtomicUsize,
    deleter: ManuallyDrop<D>,
}

/// Memory for a block, reserved against the live block budget but not yet
/// initialized.
pub(crate) struct Reserved<D> {
    ptr: NonNull<SharedBlock<D>>,
}

impl<D> SharedBlock<D> {
    #[inline]
    fn layout() -> Layout {
        Layout::new::<SharedBlock<D>>()
    }

    /// Reserves memory for a block.
    ///
    /// Nothing observable changes on failure, so callers reserve before they
    /// start rewriting handle states.
    pub(crate) fn reserve(config: &Config) -> Result<Reserved<D>> {
        stats::reserve_block(config.max_live_blocks)?;
        let layout = Self::layout();
        // SAFETY: the layout is never zero-sized, the block holds a counter.
        let raw = unsafe { alloc(layout) } as *mut SharedBlock<D>;
        match NonNull::new(raw) {
            Some(ptr) => Ok(Reserved { ptr }),
            None => {
                stats::cancel_block_reservation();
                Err(HybridError::AllocationFailed {
                    size: layout.size(),
                })
            }
        }
    }

    /// Adds one reference.
    ///
    /// # Safety
    ///
    /// `block` must be live and the caller must already hold a reference.
    #[inline]
    pub(crate) unsafe fn acquire(block: NonNull<Self>) {
        let old = unsafe { block.as_ref() }
            .count
            .fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            fatal("shared block count overflow");
        }
    }

    /// Current number of references.
    ///
    /// # Safety
    ///
    /// `block` must be live.
    #[inline]
    pub(crate) unsafe fn count(block: NonNull<Self>) -> usize {
        unsafe { block.as_ref() }.count.load(Ordering::Acquire)
    }

    /// Drops one reference; the last one frees the block and deletes `object`.
    ///
    /// # Safety
    ///
    /// The caller gives up a reference it holds on `block`, and `object` is
    /// the address managed through it.
    pub(crate) unsafe fn release<T>(block: NonNull<Self>, object: NonNull<T>)
    where
        D: Deleter<T>,
    {
        if unsafe { block.as_ref() }.count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);

        // SAFETY: count reached zero, nobody else can reach the block.
        let deleter = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).deleter) };
        unsafe { dealloc(block.as_ptr() as *mut u8, Self::layout()) };
        stats::block_freed();
        tracing::debug!(target: "stacklink", block = ?block, "last shared reference released");

        unsafe { deleter.delete(object) };
        stats::object_deleted();
    }
}

impl<D> Reserved<D> {
    /// Moves the deleter into the block and sets the initial count.
    pub(crate) fn fill(self, deleter: D, count: usize) -> NonNull<SharedBlock<D>> {
        let ptr = self.ptr;
        mem::forget(self);
        // SAFETY: `ptr` is freshly allocated with the block's layout.
        unsafe {
            ptr.as_ptr().write(SharedBlock {
                count: AtomicUsize::new(count),
                deleter: ManuallyDrop::new(deleter),
            });
        }
        stats::block_allocated();
        ptr
    }
}

impl<D> Drop for Reserved<D> {
    fn drop(&mut self) {
        // SAFETY: the memory was never initialized, only give it back.
        unsafe { dealloc(self.ptr.as_ptr() as *mut u8, SharedBlock::<D>::layout()) };
        stats::cancel_block_reservation();
    }
}
