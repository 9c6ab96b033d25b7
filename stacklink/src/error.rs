//! Error types.
//!
//! Only resource exhaustion is recoverable. Broken ownership topology is a
//! programming error and ends the process through [`fatal`].

/// Errors returned by operations that may allocate a shared block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HybridError {
    /// The allocator could not provide memory for a shared block.
    #[error("shared block allocation of {size} bytes failed")]
    AllocationFailed {
        /// Requested block size in bytes.
        size: usize,
    },
    /// The configured limit of live shared blocks was reached.
    #[error("live shared block limit of {limit} reached")]
    BlockLimit {
        /// The configured limit.
        limit: usize,
    },
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, HybridError>;

/// Reports a corrupted ownership topology and aborts.
///
/// Unwinding is not an option here: destructors on the way up would walk
/// the same broken links.
#[cold]
#[inline(never)]
pub(crate) fn fatal(message: &str) -> ! {
    tracing::error!(target: "stacklink", "fatal ownership error: {message}");
    eprintln!("stacklink: fatal ownership error: {message}");
    std::process::abort()
}
