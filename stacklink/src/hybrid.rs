//! `HybridPtr<T>`: a shared pointer that links instead of counting while all
//! of its copies stay on one call stack.
//!
//! # Topologies
//!
//! - **Owning**: the first handle holds the object and its deleter.
//! - **Linked**: a copy on the same stack as its source defers to the stack
//!   root, the handle further up the stack that owns the object.
//! - **Cross-linked**: a stack copy of a unique heap owner; the two handles
//!   point at each other and whichever is destroyed first hands ownership to
//!   the survivor.
//! - **Shared**: everything else uses a shared block with an atomic count,
//!   allocated at most once per object.
//!
//! # Pinning
//!
//! Links record handle addresses, so a handle only takes part in copies
//! while pinned. A copy is built in two steps: place a vacant handle where
//! it will live, then [`attach`](HybridPtr::attach) it to its source.
//!
//! ```rust
//! use core::pin::pin;
//! use stacklink::HybridPtr;
//!
//! let mut root = pin!(HybridPtr::new(String::from("hello")));
//! {
//!     let mut copy = pin!(HybridPtr::<String>::vacant());
//!     copy.as_mut().attach(root.as_mut()).unwrap();
//!     assert_eq!(copy.len(), 5);
//! }
//! assert_eq!(root.as_str(), "hello");
//! ```
//!
//! A stack copy only links to a root that lies further up the stack, in a
//! caller's frame or at a higher index of the same pinned array. Other stack
//! copies take the shared path. Locals of one frame are laid out by the
//! compiler, so two handles declared side by side may end up either way.
//! Releasing a handle that still has linked copies is a fatal error.

use crate::block::SharedBlock;
use crate::config::config;
use crate::deleter::{BoxDeleter, Deleter};
use crate::error::{Result, fatal};
use crate::escape::Escaped;
use crate::link::Linker;
use crate::state::{State, StateKind};
use crate::stats;
use alloc::boxed::Box;
use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::marker::{PhantomData as marker, PhantomPinned};
use core::ops::Deref;
use core::pin::Pin;
use core::ptr::NonNull;

/// Hybrid shared pointer.
///
/// See the [module documentation](self) for the ownership topologies.
///
/// The handle is `!Send` and `!Sync`: links are only valid between handles
/// of the same thread. Use [`escape`](HybridPtr::escape) to hand a counted
/// reference to another thread.
pub struct HybridPtr<T, D: Deleter<T> = BoxDeleter> {
    state: UnsafeCell<State<T, D>>,
    /// Number of `Linked` handles using this one as their root.
    dependents: Cell<usize>,
    _pinned: PhantomPinned,
    marker: marker<T>,
}

impl<T> HybridPtr<T> {
    /// Allocates `value` on the heap and manages it.
    ///
    /// No shared block is allocated.
    #[inline]
    pub fn new(value: T) -> Self {
        let object = NonNull::from(Box::leak(Box::new(value)));
        Self::with_state(State::Owning {
            object,
            deleter: BoxDeleter,
        })
    }
}

impl<T, D: Deleter<T>> HybridPtr<T, D> {
    /// Manages `object`, deleting it with `deleter` once the last handle is
    /// gone.
    ///
    /// # Safety
    ///
    /// `object` must be valid until `deleter` runs, and must not be managed
    /// by any other owner.
    #[inline]
    pub unsafe fn from_raw(object: NonNull<T>, deleter: D) -> Self {
        Self::with_state(State::Owning { object, deleter })
    }

    /// Creates a handle managing nothing, ready to be attached.
    #[inline]
    pub const fn vacant() -> Self {
        Self::with_state(State::Vacant)
    }

    /// Takes over the reference held by an escaped token.
    pub fn from_escaped(token: Escaped<T, D>) -> Self {
        let (object, block) = token.into_parts();
        Self::with_state(State::Shared { object, block })
    }

    #[inline]
    const fn with_state(state: State<T, D>) -> Self {
        Self {
            state: UnsafeCell::new(state),
            dependents: Cell::new(0),
            _pinned: PhantomPinned,
            marker,
        }
    }

    /// Makes this vacant handle a copy of `source`, using the thread's stack
    /// classifier and the process-wide [`Config`](crate::Config).
    ///
    /// `source` is taken mutably: establishing a cross-link or a shared block
    /// rewrites it.
    ///
    /// # Errors
    ///
    /// Fails if a shared block is needed and cannot be allocated. Both
    /// handles are left unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not vacant.
    pub fn attach(self: Pin<&mut Self>, source: Pin<&mut Self>) -> Result<()> {
        Linker::thread_default().attach(self, source)
    }

    /// Same as [`attach`](HybridPtr::attach) with an explicit linker.
    pub fn attach_with<C>(
        self: Pin<&mut Self>,
        source: Pin<&mut Self>,
        linker: &Linker<C>,
    ) -> Result<()>
    where
        C: crate::classify::AddressClassifier,
    {
        linker.attach(self, source)
    }

    /// Returns a counted reference that may leave this thread.
    ///
    /// Materializes the shared block if the object is not shared yet.
    ///
    /// # Panics
    ///
    /// Panics if `self` is vacant.
    pub fn escape(self: Pin<&mut Self>) -> Result<Escaped<T, D>> {
        crate::link::escape(self.as_ref().get_ref(), config())
    }

    /// Destroys this handle's share of ownership now and leaves it vacant.
    ///
    /// The handle can be attached again afterwards.
    pub fn release(self: Pin<&mut Self>) {
        self.as_ref().get_ref().dismantle();
    }

    /// Current ownership state.
    #[inline]
    pub fn kind(&self) -> StateKind {
        self.state().kind()
    }

    /// Returns true if the handle manages nothing.
    #[inline]
    pub fn is_vacant(&self) -> bool {
        self.state().is_vacant()
    }

    /// Number of linked copies using this handle as their root.
    #[inline]
    pub fn dependents(&self) -> usize {
        self.dependents.get()
    }

    /// Count of the shared block, when the handle is shared.
    pub fn shared_count(&self) -> Option<usize> {
        // SAFETY: a Shared handle keeps its block alive.
        self.state()
            .block()
            .map(|block| unsafe { SharedBlock::count(block) })
    }

    /// Address of the managed object.
    ///
    /// Follows at most one link: a linked handle reads its root, the heap
    /// side of a cross-link reads its stack partner.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        let state = self.state();
        if let Some(object) = state.own_object() {
            return Some(object);
        }
        state.target().map(|other| {
            // SAFETY: roots and partners outlive the handles pointing at them.
            let other = unsafe { other.as_ref() };
            match other.state().own_object() {
                Some(object) => object,
                None => fatal("link target does not hold the object"),
            }
        })
    }

    /// Reference to the managed object, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: the object outlives every handle sharing it.
        self.as_ptr().map(|object| unsafe { object.as_ref() })
    }

    #[inline]
    pub(crate) fn state(&self) -> &State<T, D> {
        // SAFETY: state words are only rewritten through `replace_state`,
        // never while a reference obtained here is in use.
        unsafe { &*self.state.get() }
    }

    #[inline]
    pub(crate) fn replace_state(&self, state: State<T, D>) -> State<T, D> {
        // SAFETY: handles are confined to one thread and no reference from
        // `state()` is held across this call.
        unsafe { core::mem::replace(&mut *self.state.get(), state) }
    }

    #[inline]
    pub(crate) fn take_state(&self) -> State<T, D> {
        // SAFETY: as in `replace_state`.
        unsafe { (*self.state.get()).take() }
    }

    pub(crate) fn add_dependent(&self) {
        self.dependents.set(self.dependents.get() + 1);
    }

    fn ensure_no_dependents(&self) {
        if self.dependents.get() != 0 {
            fatal("handle released while linked copies still use it as their root");
        }
    }

    /// Undoes this handle's part of the topology and leaves it vacant.
    fn dismantle(&self) {
        let this = NonNull::from(self);
        match self.take_state() {
            State::Vacant => self.ensure_no_dependents(),
            State::Owning { object, deleter } => {
                self.ensure_no_dependents();
                // SAFETY: the owning handle holds the only deleter.
                unsafe { deleter.delete(object) };
                stats::object_deleted();
            }
            State::Linked { root } => {
                // SAFETY: the root outlives its dependents, checked below.
                let root = unsafe { root.as_ref() };
                let count = root.dependents.get();
                if count == 0 || root.is_vacant() {
                    fatal("linked handle outlived its root");
                }
                root.dependents.set(count - 1);
            }
            State::CrossStack { object, partner } => {
                self.ensure_no_dependents();
                // SAFETY: a cross-linked partner stays live until it unlinks.
                let heap = unsafe { partner.as_ref() };
                match heap.take_state() {
                    State::CrossHeap { partner: back, deleter } if back == this => {
                        heap.replace_state(State::Owning { object, deleter });
                        tracing::trace!(target: "stacklink", heap = ?partner, "stack side released, heap side owns again");
                    }
                    _ => fatal("cross-link partner does not point back"),
                }
            }
            State::CrossHeap { partner, deleter } => {
                // SAFETY: as above.
                let stack = unsafe { partner.as_ref() };
                let object = match stack.state() {
                    State::CrossStack { object, partner } if *partner == this => *object,
                    _ => fatal("cross-link partner does not point back"),
                };
                stack.replace_state(State::Owning { object, deleter });
                tracing::trace!(target: "stacklink", stack = ?partner, "heap side released, stack root takes ownership");
            }
            State::Shared { object, block } => {
                self.ensure_no_dependents();
                // SAFETY: this handle holds one reference on `block`.
                unsafe { SharedBlock::release(block, object) };
            }
        }
    }
}

impl<T, D: Deleter<T>> Drop for HybridPtr<T, D> {
    fn drop(&mut self) {
        self.dismantle();
    }
}

impl<T, D: Deleter<T>> Default for HybridPtr<T, D> {
    fn default() -> Self {
        Self::vacant()
    }
}

impl<T, D: Deleter<T>> Deref for HybridPtr<T, D> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced a vacant HybridPtr"),
        }
    }
}

impl<T: fmt::Debug, D: Deleter<T>> fmt::Debug for HybridPtr<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridPtr")
            .field("kind", &self.kind())
            .field("value", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deleter::FnDeleter;
    use core::pin::pin;
    use std::cell::Cell;

    #[test]
    fn test_new_owns_without_block() {
        let before = stats::local();
        {
            let handle = HybridPtr::new(41u32);
            assert_eq!(handle.kind(), StateKind::Owning);
            assert_eq!(*handle + 1, 42);
            assert_eq!(handle.shared_count(), None);
        }
        let delta = stats::local().since(&before);
        assert_eq!(delta.blocks_allocated, 0);
        assert_eq!(delta.objects_deleted, 1);
    }

    #[test]
    fn test_vacant_handle() {
        let handle: HybridPtr<u8> = HybridPtr::default();
        assert!(handle.is_vacant());
        assert!(handle.get().is_none());
        assert_eq!(format!("{handle:?}"), "HybridPtr { kind: Vacant, value: None }");
    }

    #[test]
    #[should_panic(expected = "vacant")]
    fn test_deref_vacant_panics() {
        let handle: HybridPtr<u8> = HybridPtr::vacant();
        let _ = *handle;
    }

    #[test]
    fn test_custom_deleter_runs_once() {
        let calls = Cell::new(0);
        let raw = NonNull::from(Box::leak(Box::new(String::from("x"))));
        {
            let deleter = FnDeleter(|p: NonNull<String>| {
                calls.set(calls.get() + 1);
                drop(unsafe { Box::from_raw(p.as_ptr()) });
            });
            let handle = unsafe { HybridPtr::from_raw(raw, deleter) };
            assert_eq!(handle.as_str(), "x");
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_release_leaves_vacant_and_reusable() {
        let mut first = pin!(HybridPtr::new(1u8));
        let mut second = pin!(HybridPtr::new(2u8));

        first.as_mut().release();
        assert!(first.is_vacant());

        let linker = Linker::new(crate::classify::StackBounds::new(0, 0), Default::default());
        first.as_mut().attach_with(second.as_mut(), &linker).unwrap();
        assert_eq!(**first, 2);
        assert_eq!(first.kind(), StateKind::Shared);
        assert_eq!(second.shared_count(), Some(2));
    }
}
