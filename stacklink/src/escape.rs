//! Counted references detached from any handle.

use crate::block::SharedBlock;
use crate::deleter::{BoxDeleter, Deleter};
use core::fmt;
use core::marker::PhantomData as marker;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::NonNull;

/// One reference on a shared block, free to cross threads.
///
/// Obtained from [`HybridPtr::escape`](crate::HybridPtr::escape) and turned
/// back into a handle on the receiving side with
/// [`HybridPtr::from_escaped`](crate::HybridPtr::from_escaped). Cloning adds
/// a reference; dropping the last reference deletes the object.
///
/// ```rust
/// use core::pin::pin;
/// use stacklink::HybridPtr;
///
/// let mut local = pin!(HybridPtr::new(vec![1, 2, 3]));
/// let token = local.as_mut().escape().unwrap();
///
/// let sum = std::thread::spawn(move || {
///     let remote = HybridPtr::from_escaped(token);
///     remote.iter().sum::<i32>()
/// })
/// .join()
/// .unwrap();
/// assert_eq!(sum, 6);
/// ```
pub struct Escaped<T, D: Deleter<T> = BoxDeleter> {
    object: NonNull<T>,
    block: NonNull<SharedBlock<D>>,
    marker: marker<T>,
}

// SAFETY: the object is reachable from every thread holding a reference and
// deleted on whichever thread drops the last one.
unsafe impl<T: Send + Sync, D: Deleter<T> + Send> Send for Escaped<T, D> {}
// SAFETY: `&Escaped` hands out `&T` and can clone a reference.
unsafe impl<T: Send + Sync, D: Deleter<T> + Send> Sync for Escaped<T, D> {}

impl<T, D: Deleter<T>> Escaped<T, D> {
    /// Wraps a reference the caller already holds.
    #[inline]
    pub(crate) fn from_parts(object: NonNull<T>, block: NonNull<SharedBlock<D>>) -> Self {
        Self {
            object,
            block,
            marker,
        }
    }

    /// Gives the reference away without releasing it.
    #[inline]
    pub(crate) fn into_parts(self) -> (NonNull<T>, NonNull<SharedBlock<D>>) {
        let this = ManuallyDrop::new(self);
        (this.object, this.block)
    }

    /// The shared object.
    #[inline]
    pub fn get(&self) -> &T {
        // SAFETY: the reference held keeps the object alive.
        unsafe { self.object.as_ref() }
    }

    /// Number of references on the shared block, handles included.
    #[inline]
    pub fn strong_count(&self) -> usize {
        // SAFETY: the reference held keeps the block alive.
        unsafe { SharedBlock::count(self.block) }
    }

    /// Returns true if both tokens share the same object.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.block == other.block
    }
}

impl<T, D: Deleter<T>> Clone for Escaped<T, D> {
    fn clone(&self) -> Self {
        // SAFETY: `self` holds a reference.
        unsafe { SharedBlock::acquire(self.block) };
        Self::from_parts(self.object, self.block)
    }
}

impl<T, D: Deleter<T>> Drop for Escaped<T, D> {
    fn drop(&mut self) {
        // SAFETY: the token gives up the reference it holds.
        unsafe { SharedBlock::release(self.block, self.object) };
    }
}

impl<T, D: Deleter<T>> Deref for Escaped<T, D> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: fmt::Debug, D: Deleter<T>> fmt::Debug for Escaped<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Escaped")
            .field("value", self.get())
            .field("strong_count", &self.strong_count())
            .finish()
    }
}
