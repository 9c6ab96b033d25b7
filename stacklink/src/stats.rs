//! Allocation and deletion counters.
//!
//! Counters are kept twice: per thread, for deterministic observation from
//! tests that run side by side, and process-wide. The process-wide number of
//! live blocks backs [`Config::max_live_blocks`](crate::Config::max_live_blocks).

use crate::error::{HybridError, Result};
use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Shared blocks allocated.
    pub blocks_allocated: usize,
    /// Shared blocks freed.
    pub blocks_freed: usize,
    /// Managed objects handed to their deleter.
    pub objects_deleted: usize,
}

impl Snapshot {
    /// Blocks allocated but not yet freed.
    ///
    /// For a thread-local snapshot this is only meaningful when blocks are
    /// freed on the thread that allocated them.
    #[inline]
    pub fn live_blocks(&self) -> usize {
        self.blocks_allocated.saturating_sub(self.blocks_freed)
    }

    /// Counter deltas since `earlier`. Counters that went backwards, e.g.
    /// snapshots passed in the wrong order, read as zero.
    pub fn since(&self, earlier: &Snapshot) -> Snapshot {
        Snapshot {
            blocks_allocated: self.blocks_allocated.saturating_sub(earlier.blocks_allocated),
            blocks_freed: self.blocks_freed.saturating_sub(earlier.blocks_freed),
            objects_deleted: self.objects_deleted.saturating_sub(earlier.objects_deleted),
        }
    }
}

struct GlobalCounters {
    blocks_allocated: AtomicUsize,
    blocks_freed: AtomicUsize,
    objects_deleted: AtomicUsize,
    /// Reserved or allocated blocks not yet freed.
    live: AtomicUsize,
}

static GLOBAL: GlobalCounters = GlobalCounters {
    blocks_allocated: AtomicUsize::new(0),
    blocks_freed: AtomicUsize::new(0),
    objects_deleted: AtomicUsize::new(0),
    live: AtomicUsize::new(0),
};

struct LocalCounters {
    blocks_allocated: Cell<usize>,
    blocks_freed: Cell<usize>,
    objects_deleted: Cell<usize>,
}

thread_local! {
    static LOCAL: LocalCounters = const {
        LocalCounters {
            blocks_allocated: Cell::new(0),
            blocks_freed: Cell::new(0),
            objects_deleted: Cell::new(0),
        }
    };
}

/// Counters of the calling thread.
pub fn local() -> Snapshot {
    LOCAL
        .try_with(|c| Snapshot {
            blocks_allocated: c.blocks_allocated.get(),
            blocks_freed: c.blocks_freed.get(),
            objects_deleted: c.objects_deleted.get(),
        })
        .unwrap_or_default()
}

/// Process-wide counters.
pub fn global() -> Snapshot {
    Snapshot {
        blocks_allocated: GLOBAL.blocks_allocated.load(Ordering::Relaxed),
        blocks_freed: GLOBAL.blocks_freed.load(Ordering::Relaxed),
        objects_deleted: GLOBAL.objects_deleted.load(Ordering::Relaxed),
    }
}

/// Process-wide number of live shared blocks.
pub fn live_blocks() -> usize {
    GLOBAL.live.load(Ordering::Relaxed)
}

/// Takes one unit of the live block budget.
pub(crate) fn reserve_block(limit: Option<usize>) -> Result<()> {
    let Some(limit) = limit else {
        GLOBAL.live.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    };
    GLOBAL
        .live
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
            (live < limit).then_some(live + 1)
        })
        .map(|_| ())
        .map_err(|_| HybridError::BlockLimit { limit })
}

/// Returns a reservation that never became a block.
pub(crate) fn cancel_block_reservation() {
    GLOBAL.live.fetch_sub(1, Ordering::Relaxed);
}

pub(crate) fn block_allocated() {
    GLOBAL.blocks_allocated.fetch_add(1, Ordering::Relaxed);
    let _ = LOCAL.try_with(|c| c.blocks_allocated.set(c.blocks_allocated.get() + 1));
}

pub(crate) fn block_freed() {
    GLOBAL.live.fetch_sub(1, Ordering::Relaxed);
    GLOBAL.blocks_freed.fetch_add(1, Ordering::Relaxed);
    let _ = LOCAL.try_with(|c| c.blocks_freed.set(c.blocks_freed.get() + 1));
}

pub(crate) fn object_deleted() {
    GLOBAL.objects_deleted.fetch_add(1, Ordering::Relaxed);
    let _ = LOCAL.try_with(|c| c.objects_deleted.set(c.objects_deleted.get() + 1));
}
