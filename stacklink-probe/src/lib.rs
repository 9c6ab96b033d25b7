//! Per-thread stack bounds.
//!
//! Answers one question for the calling thread: does an address lie inside
//! this thread's stack? Bounds are queried from the OS once per thread and
//! cached in a thread local afterwards.
//!
//! # Example
//!
//! ```rust
//! let local = 7u32;
//! let boxed = Box::new(7u32);
//!
//! if stacklink_probe::thread_bounds().is_ok() {
//!     assert!(stacklink_probe::is_in_stack(&local as *const u32 as usize));
//!     assert!(!stacklink_probe::is_in_stack(&*boxed as *const u32 as usize));
//! }
//! ```

#![warn(missing_docs)]

use core::cell::Cell;
use core::fmt;

/// Errors returned while probing the stack of the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The target has no supported way of querying thread stack bounds.
    #[error("stack bounds cannot be probed on this target")]
    Unsupported,
    /// An OS call failed.
    #[error("{call} failed with code {code}")]
    Os {
        /// Name of the failing call.
        call: &'static str,
        /// Error code returned by the call.
        code: i32,
    },
}

/// Half-open address range `[low, high)` covering a thread's stack.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackBounds {
    low: usize,
    high: usize,
}

impl StackBounds {
    /// Creates bounds from the lowest and one-past-highest addresses.
    ///
    /// # Panics
    ///
    /// Panics if `low > high`.
    pub const fn new(low: usize, high: usize) -> Self {
        assert!(low <= high, "stack bounds are inverted");
        Self { low, high }
    }

    /// Lowest address of the stack.
    #[inline]
    pub const fn low(&self) -> usize {
        self.low
    }

    /// One past the highest address of the stack.
    #[inline]
    pub const fn high(&self) -> usize {
        self.high
    }

    /// Size of the range in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.high - self.low
    }

    /// Returns true for an empty range.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.low == self.high
    }

    /// Returns true if `addr` lies within the range.
    #[inline]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.low && addr < self.high
    }
}

impl fmt::Debug for StackBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StackBounds({:#x}..{:#x})", self.low, self.high)
    }
}

#[derive(Clone, Copy)]
enum Lookup {
    Pending,
    Done(Result<StackBounds, ProbeError>),
}

thread_local! {
    static BOUNDS: Cell<Lookup> = const { Cell::new(Lookup::Pending) };
}

/// Returns the stack bounds of the calling thread.
///
/// The OS is queried on the first call from each thread; later calls read
/// the thread-local cache. Failures are cached too.
pub fn thread_bounds() -> Result<StackBounds, ProbeError> {
    // During thread-local teardown the cache may be gone: probe directly.
    BOUNDS
        .try_with(|cell| match cell.get() {
            Lookup::Done(result) => result,
            Lookup::Pending => {
                let result = current_thread_bounds();
                cell.set(Lookup::Done(result));
                result
            }
        })
        .unwrap_or_else(|_| current_thread_bounds())
}

/// Returns true if `addr` lies within the calling thread's stack.
///
/// Returns false when the bounds cannot be determined.
#[inline]
pub fn is_in_stack(addr: usize) -> bool {
    match thread_bounds() {
        Ok(bounds) => bounds.contains(addr),
        Err(_) => false,
    }
}

/// Queries the OS for the calling thread's stack bounds, bypassing the cache.
pub fn current_thread_bounds() -> Result<StackBounds, ProbeError> {
    imp::current()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use super::{ProbeError, StackBounds};
    use core::mem::MaybeUninit;
    use core::ptr;

    pub(super) fn current() -> Result<StackBounds, ProbeError> {
        let mut attr = MaybeUninit::<libc::pthread_attr_t>::zeroed();
        // SAFETY: `attr` is initialized by pthread_getattr_np on success and
        // destroyed before returning.
        unsafe {
            let rc = libc::pthread_getattr_np(libc::pthread_self(), attr.as_mut_ptr());
            if rc != 0 {
                return Err(ProbeError::Os {
                    call: "pthread_getattr_np",
                    code: rc,
                });
            }

            let mut addr: *mut libc::c_void = ptr::null_mut();
            let mut size: libc::size_t = 0;
            let rc = libc::pthread_attr_getstack(attr.as_ptr(), &mut addr, &mut size);
            libc::pthread_attr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(ProbeError::Os {
                    call: "pthread_attr_getstack",
                    code: rc,
                });
            }

            let low = addr as usize;
            Ok(StackBounds::new(low, low + size))
        }
    }
}

#[cfg(target_os = "freebsd")]
mod imp {
    use super::{ProbeError, StackBounds};
    use core::mem::MaybeUninit;
    use core::ptr;

    pub(super) fn current() -> Result<StackBounds, ProbeError> {
        let mut attr = MaybeUninit::<libc::pthread_attr_t>::zeroed();
        // SAFETY: `attr` is initialized by pthread_attr_init and destroyed
        // on every path after that.
        unsafe {
            let rc = libc::pthread_attr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(ProbeError::Os {
                    call: "pthread_attr_init",
                    code: rc,
                });
            }

            let rc = libc::pthread_attr_get_np(libc::pthread_self(), attr.as_mut_ptr());
            if rc != 0 {
                libc::pthread_attr_destroy(attr.as_mut_ptr());
                return Err(ProbeError::Os {
                    call: "pthread_attr_get_np",
                    code: rc,
                });
            }

            let mut addr: *mut libc::c_void = ptr::null_mut();
            let mut size: libc::size_t = 0;
            let rc = libc::pthread_attr_getstack(attr.as_ptr(), &mut addr, &mut size);
            libc::pthread_attr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(ProbeError::Os {
                    call: "pthread_attr_getstack",
                    code: rc,
                });
            }

            let low = addr as usize;
            Ok(StackBounds::new(low, low + size))
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod imp {
    use super::{ProbeError, StackBounds};

    pub(super) fn current() -> Result<StackBounds, ProbeError> {
        // SAFETY: both calls only read the descriptor of the calling thread.
        // The returned address is the top of the stack (it grows down).
        let (high, size) = unsafe {
            let this = libc::pthread_self();
            (
                libc::pthread_get_stackaddr_np(this) as usize,
                libc::pthread_get_stacksize_np(this),
            )
        };
        if high == 0 || size == 0 || size > high {
            return Err(ProbeError::Os {
                call: "pthread_get_stackaddr_np",
                code: 0,
            });
        }
        Ok(StackBounds::new(high - size, high))
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "macos",
    target_os = "ios"
)))]
mod imp {
    use super::{ProbeError, StackBounds};

    pub(super) fn current() -> Result<StackBounds, ProbeError> {
        Err(ProbeError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static STATIC_INT: u64 = 0;

    fn addr_of<T>(value: &T) -> usize {
        value as *const T as usize
    }

    fn check_current_thread() {
        let bounds = match thread_bounds() {
            Ok(bounds) => bounds,
            Err(ProbeError::Unsupported) => return,
            Err(err) => panic!("probe failed: {err}"),
        };
        assert!(!bounds.is_empty());

        let stack_int = 0u64;
        let heap_int = Box::new(0u64);

        assert!(is_in_stack(addr_of(&stack_int)));
        assert!(!is_in_stack(addr_of(&STATIC_INT)));
        assert!(!is_in_stack(addr_of(&*heap_int)));
    }

    #[test]
    fn test_classifies_current_thread() {
        check_current_thread();
    }

    #[test]
    fn test_classifies_spawned_thread() {
        std::thread::spawn(check_current_thread).join().unwrap();
    }

    #[test]
    fn test_bounds_are_cached() {
        assert_eq!(thread_bounds(), thread_bounds());
    }

    #[test]
    fn test_threads_see_their_own_stack() {
        let Ok(main_bounds) = thread_bounds() else {
            return;
        };
        let local = 1u8;
        let main_addr = addr_of(&local);

        let other = std::thread::spawn(move || {
            let bounds = thread_bounds().unwrap();
            (bounds, bounds.contains(main_addr))
        })
        .join()
        .unwrap();

        assert_ne!(main_bounds, other.0);
        assert!(!other.1, "another thread's stack must not match");
    }

    #[test]
    fn test_bounds_range_checks() {
        let bounds = StackBounds::new(0x1000, 0x2000);
        assert!(bounds.contains(0x1000));
        assert!(bounds.contains(0x1fff));
        assert!(!bounds.contains(0x2000));
        assert!(!bounds.contains(0x0fff));
        assert_eq!(bounds.len(), 0x1000);
        assert_eq!(format!("{bounds:?}"), "StackBounds(0x1000..0x2000)");
    }

    #[test]
    #[should_panic(expected = "inverted")]
    fn test_inverted_bounds_panic() {
        let _ = StackBounds::new(0x2000, 0x1000);
    }
}
