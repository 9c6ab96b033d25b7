//! Stacklink: a shared pointer that stays allocation-free while sharing is
//! confined to one call stack.
//!
//! Copies made on the same stack as their source are linked to a stack root
//! instead of counted. A unique heap owner copied onto the stack is
//! cross-linked with its copy. Only when sharing escapes stack confinement
//! is a shared block with an atomic count allocated, and at most once per
//! object.
//!
//! # Key Features
//!
//! - **No allocation for stack-confined sharing**: links cost one counter bump
//! - **Lazy shared block**: materialized on the first copy that needs it
//! - **Explicit failure**: block allocation errors surface as [`HybridError`]
//! - **Thread escape**: [`Escaped`] tokens carry counted references across threads
//!
//! # Example
//!
//! ```rust
//! use core::pin::{Pin, pin};
//! use stacklink::{HybridPtr, StateKind, stats};
//!
//! #[inline(never)]
//! fn len_of_copy(source: Pin<&mut HybridPtr<Vec<u8>>>) -> usize {
//!     // Place the copy, then attach it to its source.
//!     let mut copy = pin!(HybridPtr::<Vec<u8>>::vacant());
//!     copy.as_mut().attach(source).unwrap();
//!     copy.len()
//! }
//!
//! let before = stats::local();
//!
//! let mut root = pin!(HybridPtr::new(vec![1u8, 2, 3]));
//! assert_eq!(len_of_copy(root.as_mut()), 3);
//!
//! // On targets where the stack can be probed, no block was needed.
//! if stacklink::ThreadStack.bounds().is_some() {
//!     assert_eq!(root.kind(), StateKind::Owning);
//!     assert_eq!(stats::local().since(&before).blocks_allocated, 0);
//! }
//! ```

#![warn(missing_docs)]

extern crate alloc;

mod block;
mod classify;
mod config;
mod deleter;
mod error;
mod escape;
mod hybrid;
mod link;
mod state;
pub mod stats;

pub use classify::{AddressClassifier, StackBounds, ThreadStack};
pub use config::{Config, ENV_LINKING, ENV_MAX_LIVE_BLOCKS, config, configure};
pub use deleter::{BoxDeleter, Deleter, FnDeleter};
pub use error::{HybridError, Result};
pub use escape::Escaped;
pub use hybrid::HybridPtr;
pub use link::Linker;
pub use state::StateKind;
