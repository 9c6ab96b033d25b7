//! Address classification.
//!
//! The linker asks a classifier whether a handle lives on the calling
//! thread's stack. Answering `false` is always safe: the handle then takes
//! the cross-link or shared-counting path instead of stack linking.
//!
//! A stack copy only links to a root that is released after it. The
//! classifier decides that from the two addresses with
//! [`AddressClassifier::is_deeper`]; the default assumes a downward-growing
//! stack. Handles in the same frame are laid out by the compiler, so only
//! copies made in a callee frame, or placed at a lower index of the same
//! array, are guaranteed to link.

use core::cell::Cell;
use stacklink_probe::ProbeError;

pub use stacklink_probe::StackBounds;

/// Tells whether an address lies in the calling thread's stack.
pub trait AddressClassifier {
    /// Returns true if `addr` is inside the calling thread's stack.
    fn is_in_stack(&self, addr: usize) -> bool;

    /// Returns true if the stack slot at `addr` is released before the one
    /// at `than`. Both addresses are on the calling thread's stack.
    #[inline]
    fn is_deeper(&self, addr: usize, than: usize) -> bool {
        addr < than
    }
}

impl<C: AddressClassifier + ?Sized> AddressClassifier for &C {
    #[inline]
    fn is_in_stack(&self, addr: usize) -> bool {
        (**self).is_in_stack(addr)
    }

    #[inline]
    fn is_deeper(&self, addr: usize, than: usize) -> bool {
        (**self).is_deeper(addr, than)
    }
}

impl<C: AddressClassifier + ?Sized> AddressClassifier for alloc::boxed::Box<C> {
    #[inline]
    fn is_in_stack(&self, addr: usize) -> bool {
        (**self).is_in_stack(addr)
    }

    #[inline]
    fn is_deeper(&self, addr: usize, than: usize) -> bool {
        (**self).is_deeper(addr, than)
    }
}

/// Fixed range, e.g. bounds captured ahead of time.
impl AddressClassifier for StackBounds {
    #[inline]
    fn is_in_stack(&self, addr: usize) -> bool {
        self.contains(addr)
    }
}

/// Classifier backed by the OS-reported bounds of the calling thread.
///
/// Bounds are looked up once per thread. Targets without a supported probe
/// classify every address as off-stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStack;

impl ThreadStack {
    /// Bounds of the calling thread's stack, if they can be determined.
    pub fn bounds(&self) -> Option<StackBounds> {
        match stacklink_probe::thread_bounds() {
            Ok(bounds) => Some(bounds),
            Err(err) => {
                warn_once(err);
                None
            }
        }
    }
}

impl AddressClassifier for ThreadStack {
    #[inline]
    fn is_in_stack(&self, addr: usize) -> bool {
        self.bounds().is_some_and(|bounds| bounds.contains(addr))
    }
}

thread_local! {
    static WARNED: Cell<bool> = const { Cell::new(false) };
}

#[cold]
fn warn_once(err: ProbeError) {
    let first = WARNED.try_with(|w| !w.replace(true)).unwrap_or(false);
    if first {
        tracing::warn!(
            target: "stacklink",
            error = %err,
            "stack bounds unavailable, stack linking disabled on this thread"
        );
    }
}
