//! Stress tests for stacklink
//!
//! Many threads building random local topologies, some of them around one
//! object shared through escaped tokens.

mod common;

use common::{Tracked, count, counter};
use rand::Rng;
use rand::seq::SliceRandom;
use stacklink::{HybridPtr, StateKind, stats};
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread;

type Boxed = Pin<Box<HybridPtr<Tracked>>>;

/// Copies `source` onto this frame, sometimes onto the heap too, and recurses.
#[inline(never)]
fn grow(
    source: Pin<&mut HybridPtr<Tracked>>,
    depth: usize,
    heap: &mut Vec<Boxed>,
    rng: &mut impl Rng,
) -> usize {
    let mut copy = pin!(HybridPtr::<Tracked>::vacant());
    copy.as_mut().attach(source).unwrap();
    let mut seen = copy.id;

    if rng.random_bool(0.3) {
        let mut boxed = Box::pin(HybridPtr::<Tracked>::vacant());
        boxed.as_mut().attach(copy.as_mut()).unwrap();
        heap.push(boxed);
    }
    if depth > 0 {
        seen += grow(copy.as_mut(), depth - 1, heap, rng);
    }
    seen
}

fn churn(id: usize, drops: &Arc<AtomicUsize>, rng: &mut impl Rng) {
    let mut heap = Vec::new();
    let depth = rng.random_range(0..6);
    if rng.random_bool(0.5) {
        let mut owner = pin!(HybridPtr::new(Tracked::new(id, drops)));
        assert_eq!(grow(owner.as_mut(), depth, &mut heap, rng), id * (depth + 1));
    } else {
        let mut owner = Box::pin(HybridPtr::new(Tracked::new(id, drops)));
        assert_eq!(grow(owner.as_mut(), depth, &mut heap, rng), id * (depth + 1));
        heap.push(owner);
    }
    for handle in &heap {
        assert!(matches!(handle.kind(), StateKind::Owning | StateKind::Shared));
    }
    heap.shuffle(rng);
}

#[test]
#[cfg_attr(miri, ignore)]
fn random_local_topologies_delete_every_object() {
    const NUM_THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|tid| {
            thread::spawn(move || {
                let drops = counter();
                let mut rng = rand::rng();
                let before = stats::local();
                for round in 0..ROUNDS {
                    churn(tid * ROUNDS + round, &drops, &mut rng);
                    assert_eq!(count(&drops), round + 1);
                }
                let delta = stats::local().since(&before);
                assert_eq!(delta.live_blocks(), 0);
                assert_eq!(delta.objects_deleted, ROUNDS);
                assert!(delta.blocks_allocated <= ROUNDS);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn escaped_object_survives_concurrent_local_copies() {
    const NUM_THREADS: usize = 8;
    const ROUNDS: usize = 5_000;

    let drops = counter();
    let token = {
        let mut root = pin!(HybridPtr::new(Tracked::new(1, &drops)));
        root.as_mut().escape().unwrap()
    };
    assert_eq!(token.strong_count(), 1);

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let token = token.clone();
            thread::spawn(move || {
                let mut rng = rand::rng();
                let before = stats::local();
                let mut root = pin!(HybridPtr::from_escaped(token));
                for _ in 0..ROUNDS {
                    let mut heap = Vec::new();
                    let depth = rng.random_range(0..4);
                    assert_eq!(grow(root.as_mut(), depth, &mut heap, &mut rng), depth + 1);
                    heap.shuffle(&mut rng);
                }
                // The block already exists: nothing on this thread allocates.
                stats::local().since(&before).blocks_allocated
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 0);
    }
    assert_eq!(count(&drops), 0);
    assert_eq!(token.strong_count(), 1);
    drop(token);
    assert_eq!(count(&drops), 1);
}
