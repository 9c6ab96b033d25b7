//! Ownership state word.
//!
//! One tagged value per handle. Payload pointers to other handles are
//! non-owning: their validity is guaranteed by the construction order of
//! the topology and checked on release.

use crate::block::SharedBlock;
use crate::deleter::Deleter;
use crate::hybrid::HybridPtr;
use core::mem;
use core::ptr::NonNull;

/// Discriminant of a handle's ownership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Manages nothing.
    Vacant,
    /// Sole owner holding the deleter. No allocation.
    Owning,
    /// Defers to a stack root higher up the same stack.
    Linked,
    /// Stack root cross-linked with the unique heap owner.
    CrossStack,
    /// Unique heap owner whose authority is delegated to a stack root.
    CrossHeap,
    /// One reference of a shared block's atomic count.
    Shared,
}

impl StateKind {
    /// Returns true for the states that involve no shared block.
    #[inline]
    pub fn is_confined(self) -> bool {
        !matches!(self, StateKind::Shared)
    }
}

pub(crate) enum State<T, D: Deleter<T>> {
    Vacant,
    Owning {
        object: NonNull<T>,
        deleter: D,
    },
    Linked {
        root: NonNull<HybridPtr<T, D>>,
    },
    CrossStack {
        object: NonNull<T>,
        partner: NonNull<HybridPtr<T, D>>,
    },
    CrossHeap {
        partner: NonNull<HybridPtr<T, D>>,
        deleter: D,
    },
    Shared {
        object: NonNull<T>,
        block: NonNull<SharedBlock<D>>,
    },
}

impl<T, D: Deleter<T>> State<T, D> {
    #[inline]
    pub(crate) fn kind(&self) -> StateKind {
        match self {
            State::Vacant => StateKind::Vacant,
            State::Owning { .. } => StateKind::Owning,
            State::Linked { .. } => StateKind::Linked,
            State::CrossStack { .. } => StateKind::CrossStack,
            State::CrossHeap { .. } => StateKind::CrossHeap,
            State::Shared { .. } => StateKind::Shared,
        }
    }

    #[inline]
    pub(crate) fn is_vacant(&self) -> bool {
        matches!(self, State::Vacant)
    }

    /// Object address stored in this word itself, without following links.
    #[inline]
    pub(crate) fn own_object(&self) -> Option<NonNull<T>> {
        match self {
            State::Owning { object, .. }
            | State::CrossStack { object, .. }
            | State::Shared { object, .. } => Some(*object),
            State::Vacant | State::Linked { .. } | State::CrossHeap { .. } => None,
        }
    }

    /// Handle this word points at: the root of a link or a cross-link partner.
    #[inline]
    pub(crate) fn target(&self) -> Option<NonNull<HybridPtr<T, D>>> {
        match self {
            State::Linked { root } => Some(*root),
            State::CrossStack { partner, .. } | State::CrossHeap { partner, .. } => Some(*partner),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<SharedBlock<D>>> {
        match self {
            State::Shared { block, .. } => Some(*block),
            _ => None,
        }
    }

    /// Moves the word out, leaving `Vacant`.
    #[inline]
    pub(crate) fn take(&mut self) -> Self {
        mem::replace(self, State::Vacant)
    }
}
