//! Copy construction.
//!
//! A [`Linker`] decides how a vacant handle becomes a copy of another one:
//! link to a stack root, cross-link with a unique heap owner, or take a
//! reference on the shared block, materializing it on first need.

use crate::block::SharedBlock;
use crate::classify::{AddressClassifier, ThreadStack};
use crate::config::{Config, config};
use crate::deleter::Deleter;
use crate::error::{Result, fatal};
use crate::escape::Escaped;
use crate::hybrid::HybridPtr;
use crate::state::State;
use core::pin::Pin;
use core::ptr::NonNull;

/// Attaches copies using a classifier and a configuration.
///
/// [`HybridPtr::attach`] uses [`Linker::thread_default`]. Build one
/// explicitly to supply another classifier or to override the process-wide
/// [`Config`]:
///
/// ```rust
/// use core::pin::pin;
/// use stacklink::{Config, HybridPtr, Linker, StackBounds, StateKind};
///
/// // Nothing classifies as stack: every copy shares a block.
/// let linker = Linker::new(StackBounds::new(0, 0), Config::default());
///
/// let mut first = pin!(HybridPtr::new(7u32));
/// let mut second = pin!(HybridPtr::<u32>::vacant());
/// linker.attach(second.as_mut(), first.as_mut()).unwrap();
/// assert_eq!(first.kind(), StateKind::Shared);
/// assert_eq!(second.shared_count(), Some(2));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Linker<C = ThreadStack> {
    classifier: C,
    config: Config,
}

impl Linker<ThreadStack> {
    /// Linker for the calling thread's stack with the process-wide config.
    #[inline]
    pub fn thread_default() -> Self {
        Self::new(ThreadStack, *config())
    }
}

impl<C: AddressClassifier> Linker<C> {
    /// Creates a linker.
    #[inline]
    pub const fn new(classifier: C, config: Config) -> Self {
        Self { classifier, config }
    }

    /// The classifier in use.
    #[inline]
    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// The configuration in use.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Makes the vacant `target` a copy of `source`.
    ///
    /// # Errors
    ///
    /// Fails if a shared block is needed and cannot be obtained, leaving both
    /// handles unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `target` is not vacant.
    pub fn attach<T, D: Deleter<T>>(
        &self,
        target: Pin<&mut HybridPtr<T, D>>,
        source: Pin<&mut HybridPtr<T, D>>,
    ) -> Result<()> {
        let target = target.into_ref().get_ref();
        let source = source.into_ref().get_ref();
        assert!(target.is_vacant(), "attach target must be vacant");

        let linking = self.config.linking;
        let target_in_stack = linking && self.in_stack(target);

        match source.state() {
            State::Vacant => Ok(()),
            State::CrossHeap { partner, .. } => {
                // SAFETY: the stack partner outlives the cross-link.
                let partner = unsafe { partner.as_ref() };
                if target_in_stack && self.in_stack(partner) && self.is_deeper(target, partner) {
                    link(target, partner);
                    return Ok(());
                }
                attach_shared(target, source, &self.config)
            }
            // A handle with dependents is a stack root, whatever the classifier says now.
            State::Owning { .. }
                if target_in_stack && !self.in_stack(source) && source.dependents() == 0 =>
            {
                cross_link(target, source);
                Ok(())
            }
            State::Shared { object, block } if !(target_in_stack && self.in_stack(source)) => {
                let (object, block) = (*object, *block);
                // SAFETY: `source` holds a reference on `block`.
                unsafe { SharedBlock::acquire(block) };
                target.replace_state(State::Shared { object, block });
                tracing::trace!(target: "stacklink", "copied shared reference");
                Ok(())
            }
            _ if target_in_stack
                && self.in_stack(source)
                && self.is_deeper(target, stack_root(source)) =>
            {
                link(target, stack_root(source));
                Ok(())
            }
            _ => attach_shared(target, source, &self.config),
        }
    }

    /// Returns a counted reference to `source`'s object that may leave the
    /// thread. See [`HybridPtr::escape`].
    pub fn escape<T, D: Deleter<T>>(
        &self,
        source: Pin<&mut HybridPtr<T, D>>,
    ) -> Result<Escaped<T, D>> {
        escape(source.into_ref().get_ref(), &self.config)
    }

    #[inline]
    fn in_stack<T, D: Deleter<T>>(&self, handle: &HybridPtr<T, D>) -> bool {
        self.classifier
            .is_in_stack(handle as *const HybridPtr<T, D> as usize)
    }

    /// A root must be released after every handle linked to it.
    #[inline]
    fn is_deeper<T, D: Deleter<T>>(&self, copy: &HybridPtr<T, D>, root: &HybridPtr<T, D>) -> bool {
        self.classifier.is_deeper(
            copy as *const HybridPtr<T, D> as usize,
            root as *const HybridPtr<T, D> as usize,
        )
    }
}

pub(crate) fn escape<T, D: Deleter<T>>(
    source: &HybridPtr<T, D>,
    config: &Config,
) -> Result<Escaped<T, D>> {
    assert!(!source.is_vacant(), "cannot escape a vacant handle");
    let (object, block) = share(source, config)?;
    // SAFETY: `block` is live and held by the source topology.
    unsafe { SharedBlock::acquire(block) };
    Ok(Escaped::from_parts(object, block))
}

/// Handle a stack copy of `source` should link to.
fn stack_root<T, D: Deleter<T>>(source: &HybridPtr<T, D>) -> &HybridPtr<T, D> {
    match source.state() {
        // SAFETY: a root outlives the handles linked to it.
        State::Linked { root } => unsafe { root.as_ref() },
        _ => source,
    }
}

fn link<T, D: Deleter<T>>(target: &HybridPtr<T, D>, root: &HybridPtr<T, D>) {
    target.replace_state(State::Linked {
        root: NonNull::from(root),
    });
    root.add_dependent();
    tracing::trace!(
        target: "stacklink",
        root = ?NonNull::from(root),
        dependents = root.dependents(),
        "linked to stack root"
    );
}

fn cross_link<T, D: Deleter<T>>(stack: &HybridPtr<T, D>, heap: &HybridPtr<T, D>) {
    let (object, deleter) = match heap.take_state() {
        State::Owning { object, deleter } => (object, deleter),
        _ => fatal("cross-link source is not a unique owner"),
    };
    heap.replace_state(State::CrossHeap {
        partner: NonNull::from(stack),
        deleter,
    });
    stack.replace_state(State::CrossStack {
        object,
        partner: NonNull::from(heap),
    });
    tracing::trace!(target: "stacklink", heap = ?NonNull::from(heap), "cross-linked with heap owner");
}

fn attach_shared<T, D: Deleter<T>>(
    target: &HybridPtr<T, D>,
    source: &HybridPtr<T, D>,
    config: &Config,
) -> Result<()> {
    let (object, block) = share(source, config)?;
    // SAFETY: `share` returns a block the topology holds references on.
    unsafe { SharedBlock::acquire(block) };
    target.replace_state(State::Shared { object, block });
    Ok(())
}

/// Shared block backing `source`'s object, materialized if needed.
///
/// Follows a link to its root, then converts the root, or the cross-linked
/// pair it belongs to, to shared counting. The block is allocated before any
/// state is rewritten.
fn share<T, D: Deleter<T>>(
    source: &HybridPtr<T, D>,
    config: &Config,
) -> Result<(NonNull<T>, NonNull<SharedBlock<D>>)> {
    let root = stack_root(source);
    match root.state() {
        State::Shared { object, block } => Ok((*object, *block)),
        State::Owning { .. } => {
            let reserved = SharedBlock::reserve(config)?;
            let (object, deleter) = match root.take_state() {
                State::Owning { object, deleter } => (object, deleter),
                _ => fatal("owner changed while sharing"),
            };
            let block = reserved.fill(deleter, 1);
            root.replace_state(State::Shared { object, block });
            tracing::debug!(target: "stacklink", block = ?block, "shared block materialized from unique owner");
            Ok((object, block))
        }
        State::CrossStack { partner, .. } => {
            // SAFETY: cross-link partners are live while linked.
            let heap = unsafe { partner.as_ref() };
            share_pair(root, heap, config)
        }
        State::CrossHeap { partner, .. } => {
            // SAFETY: as above.
            let stack = unsafe { partner.as_ref() };
            share_pair(stack, root, config)
        }
        State::Linked { .. } => fatal("link chain longer than one hop"),
        State::Vacant if source.is_vacant() => panic!("cannot share a vacant handle"),
        State::Vacant => fatal("linked handle outlived its root"),
    }
}

fn share_pair<T, D: Deleter<T>>(
    stack: &HybridPtr<T, D>,
    heap: &HybridPtr<T, D>,
    config: &Config,
) -> Result<(NonNull<T>, NonNull<SharedBlock<D>>)> {
    let object = match (stack.state(), heap.state()) {
        (State::CrossStack { object, partner }, State::CrossHeap { partner: back, .. })
            if *partner == NonNull::from(heap) && *back == NonNull::from(stack) =>
        {
            *object
        }
        _ => fatal("cross-link partner does not point back"),
    };

    let reserved = SharedBlock::reserve(config)?;
    let deleter = match heap.take_state() {
        State::CrossHeap { deleter, .. } => deleter,
        _ => fatal("cross-link changed while sharing"),
    };
    let block = reserved.fill(deleter, 2);
    stack.replace_state(State::Shared { object, block });
    heap.replace_state(State::Shared { object, block });
    tracing::debug!(target: "stacklink", block = ?block, "shared block materialized from cross-linked pair");
    Ok((object, block))
}
