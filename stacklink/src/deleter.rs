//! Deleter capabilities.
//!
//! Exactly one deleter exists per managed object. It moves between handle
//! states and the shared block but is never duplicated, and is consumed by
//! the single deletion.

use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;

/// Disposes of a managed object.
pub trait Deleter<T> {
    /// Deletes `object`.
    ///
    /// # Safety
    ///
    /// `object` must be the pointer the owning handle was built with, and
    /// this must be the only deletion of it.
    unsafe fn delete(self, object: NonNull<T>);
}

/// Default deleter: the object was allocated with `Box`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BoxDeleter;

impl<T> Deleter<T> for BoxDeleter {
    #[inline]
    unsafe fn delete(self, object: NonNull<T>) {
        // SAFETY: caller guarantees `object` came from Box::into_raw and is
        // deleted once.
        drop(unsafe { Box::from_raw(object.as_ptr()) });
    }
}

/// Deleter built from a closure.
///
/// ```rust
/// use core::ptr::NonNull;
/// use stacklink::{FnDeleter, HybridPtr};
///
/// let raw = NonNull::from(Box::leak(Box::new(5u32)));
/// let deleter = FnDeleter(|p: NonNull<u32>| unsafe { drop(Box::from_raw(p.as_ptr())) });
/// let handle = unsafe { HybridPtr::from_raw(raw, deleter) };
/// assert_eq!(*handle, 5);
/// ```
#[derive(Clone, Copy)]
pub struct FnDeleter<F>(pub F);

impl<T, F: FnOnce(NonNull<T>)> Deleter<T> for FnDeleter<F> {
    #[inline]
    unsafe fn delete(self, object: NonNull<T>) {
        (self.0)(object)
    }
}

impl<F> fmt::Debug for FnDeleter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnDeleter(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_box_deleter_drops_value() {
        let drops = Rc::new(Cell::new(0));
        struct Probe(Rc<Cell<usize>>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let raw = NonNull::from(Box::leak(Box::new(Probe(drops.clone()))));
        unsafe { BoxDeleter.delete(raw) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_fn_deleter_receives_pointer() {
        let seen = Cell::new(None);
        let raw = NonNull::from(Box::leak(Box::new(9u8)));
        let deleter = FnDeleter(|p: NonNull<u8>| {
            seen.set(Some(p));
            drop(unsafe { Box::from_raw(p.as_ptr()) });
        });
        unsafe { deleter.delete(raw) };
        assert_eq!(seen.get(), Some(raw));
    }
}
