//! Helpers shared by the integration tests.

#![allow(dead_code)]

use stacklink::{AddressClassifier, HybridPtr, ThreadStack};
use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Drop-counting payload
// ============================================================================

/// Increments a shared counter when dropped.
#[derive(Debug)]
pub struct Tracked {
    pub id: usize,
    drops: Arc<AtomicUsize>,
}

impl Tracked {
    pub fn new(id: usize, drops: &Arc<AtomicUsize>) -> Self {
        Self {
            id,
            drops: drops.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(drops: &Arc<AtomicUsize>) -> usize {
    drops.load(Ordering::SeqCst)
}

/// Tests relying on the real stack classifier return early when the target
/// cannot report thread stack bounds.
pub fn probe_available() -> bool {
    ThreadStack.bounds().is_some()
}

/// Pinned handles of one frame, deepest first.
///
/// Array elements sit at increasing addresses and drop in index order, so a
/// lower index is both deeper on the stack and released earlier.
pub fn split<T, const N: usize>(
    handles: Pin<&mut [HybridPtr<T>; N]>,
) -> [Pin<&mut HybridPtr<T>>; N] {
    // SAFETY: the elements are never moved out of the pinned array.
    unsafe {
        handles
            .get_unchecked_mut()
            .each_mut()
            .map(|handle| Pin::new_unchecked(handle))
    }
}

// ============================================================================
// Heap-resident holder
// ============================================================================

/// Heap struct owning a handle, the way a node or a cached value would.
pub struct Holder<T> {
    pa: Pin<Box<HybridPtr<T>>>,
}

impl<T> Holder<T> {
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self {
            pa: Box::pin(HybridPtr::new(value)),
        })
    }

    pub fn vacant() -> Box<Self> {
        Box::new(Self {
            pa: Box::pin(HybridPtr::vacant()),
        })
    }

    pub fn pa(&mut self) -> Pin<&mut HybridPtr<T>> {
        self.pa.as_mut()
    }

    pub fn handle(&self) -> &HybridPtr<T> {
        &self.pa
    }
}

// ============================================================================
// Scripted classifier
// ============================================================================

/// Classifier with a scripted memory layout.
///
/// Addresses registered with [`Frames::place`] belong to a numbered stack;
/// everything else is heap. [`Frames::enter`] selects which stack counts as
/// "the calling thread's stack", which lets a single test model several
/// independent stacks. Handles placed later sit deeper.
#[derive(Default)]
pub struct Frames {
    current: Cell<u32>,
    homes: RefCell<Vec<(usize, u32)>>,
}

impl Frames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, stack: u32) {
        self.current.set(stack);
    }

    pub fn place<T>(&self, handle: &HybridPtr<T>, stack: u32) {
        let addr = handle as *const HybridPtr<T> as usize;
        self.homes.borrow_mut().push((addr, stack));
    }
}

impl AddressClassifier for Frames {
    fn is_in_stack(&self, addr: usize) -> bool {
        let current = self.current.get();
        self.homes
            .borrow()
            .iter()
            .any(|&(home, stack)| home == addr && stack == current)
    }

    fn is_deeper(&self, addr: usize, than: usize) -> bool {
        let homes = self.homes.borrow();
        let order = |addr| homes.iter().position(|&(home, _)| home == addr);
        matches!((order(addr), order(than)), (Some(a), Some(b)) if a > b)
    }
}
