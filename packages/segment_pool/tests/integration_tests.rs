//! Integration tests for the `segment_pool` package.
//!
//! These tests exercise `SegmentPool` through its public API only, covering growth across
//! segments, both reclaim orders, both purge timings and sharing between threads.

use std::collections::HashSet;
use std::num::NonZero;
use std::ops::RangeInclusive;
use std::ptr::NonNull;
use std::sync::{Arc, Barrier};
use std::thread;

use segment_pool::{PurgeTiming, ReclaimOrder, SegmentPool};

const CHUNKS_PER_SEGMENT: usize = 100;

fn deferred_pool(reclaim_order: ReclaimOrder) -> SegmentPool {
    SegmentPool::builder()
        .layout_of::<[u64; 2]>()
        .chunks_per_segment(NonZero::new(CHUNKS_PER_SEGMENT).unwrap())
        .reclaim_order(reclaim_order)
        .purge_timing(PurgeTiming::Deferred)
        .build()
}

fn allocate_n(pool: &SegmentPool, count: usize) -> Vec<NonNull<u8>> {
    (0..count).map(|_| pool.allocate().unwrap()).collect()
}

fn free_all(pool: &SegmentPool, ptrs: impl IntoIterator<Item = NonNull<u8>>) {
    for ptr in ptrs {
        // SAFETY: Every pointer came from this pool and is freed exactly once.
        unsafe { pool.free(ptr) };
    }
}

fn address_span(ptrs: &[NonNull<u8>]) -> RangeInclusive<usize> {
    let addresses = ptrs.iter().map(|ptr| ptr.as_ptr().addr());

    let min = addresses.clone().min().unwrap();
    let max = addresses.max().unwrap();

    min..=max
}

#[test]
fn grows_by_whole_segments_and_purges_them_all() {
    let pool = deferred_pool(ReclaimOrder::MostRecentlyUsed);

    let ptrs = allocate_n(&pool, 250);

    let stats = pool.stats();
    assert_eq!(stats.segments(), 3);
    assert_eq!(stats.capacity(), 300);
    assert_eq!(stats.used_objects(), 250);
    assert_eq!(stats.free_chunks(), 50);

    free_all(&pool, ptrs);
    assert_eq!(pool.used_objects(), 0);
    assert_eq!(pool.segment_count(), 3);

    assert_eq!(pool.purge(), 3);

    let stats = pool.stats();
    assert_eq!(stats.segments(), 0);
    assert_eq!(stats.free_chunks(), 0);
    assert_eq!(stats.segments_created(), 3);
    assert_eq!(stats.segments_released(), 3);

    // Still usable after being emptied out completely.
    let ptr = pool.allocate().unwrap();
    assert_eq!(pool.segment_count(), 1);
    free_all(&pool, [ptr]);
}

#[test]
fn growth_happens_only_when_free_list_is_empty() {
    let pool = deferred_pool(ReclaimOrder::MostRecentlyUsed);

    let first = allocate_n(&pool, CHUNKS_PER_SEGMENT);
    assert_eq!(pool.segment_count(), 1);

    let extra = pool.allocate().unwrap();
    assert_eq!(pool.segment_count(), 2);

    free_all(&pool, [extra]);
    free_all(&pool, first);
    assert_eq!(pool.purge(), 2);
}

#[test]
fn allocations_are_distinct_aligned_and_do_not_overlap() {
    let pool = SegmentPool::builder()
        .layout_of::<[u128; 3]>()
        .purge_timing(PurgeTiming::Deferred)
        .build();

    let size = pool.item_layout().size();
    let ptrs = allocate_n(&pool, 500);

    let unique: HashSet<_> = ptrs.iter().copied().collect();
    assert_eq!(unique.len(), ptrs.len());

    let mut addresses: Vec<_> = ptrs.iter().map(|ptr| ptr.as_ptr().addr()).collect();
    addresses.sort_unstable();

    for pair in addresses.windows(2) {
        let [lower, upper] = pair else { unreachable!() };
        assert!(upper - lower >= size);
    }

    for (i, ptr) in ptrs.iter().enumerate() {
        let item = ptr.cast::<[u128; 3]>();
        assert!(item.as_ptr().is_aligned());

        let value = u128::try_from(i).unwrap();

        // SAFETY: The chunk is ours, aligned and large enough for the item.
        unsafe { item.write([value; 3]) };
    }

    // Nothing was overwritten by a neighbor.
    for (i, ptr) in ptrs.iter().enumerate() {
        // SAFETY: Written above and not freed yet.
        let item = unsafe { ptr.cast::<[u128; 3]>().read() };
        assert_eq!(item, [u128::try_from(i).unwrap(); 3]);
    }

    free_all(&pool, ptrs);
    pool.purge();
}

#[test]
fn most_recently_used_order_is_lifo() {
    let pool = deferred_pool(ReclaimOrder::MostRecentlyUsed);

    // Fill the segment so that only freed chunks are on the free list.
    let ptrs = allocate_n(&pool, CHUNKS_PER_SEGMENT);
    let (a, b) = (ptrs[10], ptrs[20]);

    free_all(&pool, [a, b]);

    assert_eq!(pool.allocate().unwrap(), b);
    assert_eq!(pool.allocate().unwrap(), a);

    free_all(&pool, ptrs);
}

#[test]
fn first_in_first_out_order_is_fifo() {
    let pool = deferred_pool(ReclaimOrder::FirstInFirstOut);

    let ptrs = allocate_n(&pool, CHUNKS_PER_SEGMENT);
    let (a, b) = (ptrs[10], ptrs[20]);

    free_all(&pool, [a, b]);

    assert_eq!(pool.allocate().unwrap(), a);
    assert_eq!(pool.allocate().unwrap(), b);

    free_all(&pool, ptrs);
}

#[test]
fn purged_segment_is_never_handed_out_again() {
    let pool = deferred_pool(ReclaimOrder::FirstInFirstOut);

    let drained = allocate_n(&pool, CHUNKS_PER_SEGMENT);
    let keeper = pool.allocate().unwrap();
    let drained_span = address_span(&drained);

    free_all(&pool, drained);
    assert_eq!(pool.purge(), 1);
    assert_eq!(pool.segment_count(), 1);

    // Drain the free list of the surviving segment without growing the pool. Under FIFO order
    // the purged chunks would have come first had they been left on the free list.
    let rest = allocate_n(&pool, CHUNKS_PER_SEGMENT - 1);
    assert_eq!(pool.segment_count(), 1);

    for ptr in &rest {
        assert!(!drained_span.contains(&ptr.as_ptr().addr()));
    }

    free_all(&pool, rest);
    free_all(&pool, [keeper]);
    assert_eq!(pool.purge(), 1);
}

#[test]
fn emptied_segment_chunks_are_reused_before_purge() {
    let pool = deferred_pool(ReclaimOrder::MostRecentlyUsed);

    let ptrs = allocate_n(&pool, CHUNKS_PER_SEGMENT);
    let span = address_span(&ptrs);

    free_all(&pool, ptrs);

    // The segment is empty but not purged, so its chunks are still fair game.
    let reused = pool.allocate().unwrap();
    assert!(span.contains(&reused.as_ptr().addr()));
    assert_eq!(pool.segment_count(), 1);

    // It is no longer empty, so purge leaves it alone.
    assert_eq!(pool.purge(), 0);

    free_all(&pool, [reused]);
    assert_eq!(pool.purge(), 1);
}

#[test]
fn eager_purge_releases_drained_segments_immediately() {
    let pool = SegmentPool::builder()
        .layout_of::<u64>()
        .chunks_per_segment(NonZero::new(CHUNKS_PER_SEGMENT).unwrap())
        .purge_timing(PurgeTiming::Eager)
        .build();

    let first = allocate_n(&pool, CHUNKS_PER_SEGMENT);
    let second = allocate_n(&pool, 1);
    assert_eq!(pool.segment_count(), 2);

    free_all(&pool, first);
    assert_eq!(pool.segment_count(), 1);
    assert_eq!(pool.stats().free_chunks(), CHUNKS_PER_SEGMENT - 1);

    free_all(&pool, second);
    assert_eq!(pool.segment_count(), 0);
    assert_eq!(pool.purge(), 0);
}

#[test]
#[should_panic]
fn double_free_is_detected() {
    let pool = deferred_pool(ReclaimOrder::MostRecentlyUsed);

    let ptr = pool.allocate().unwrap();
    let _keep_segment_alive = pool.allocate().unwrap();

    // SAFETY: Deliberately violating the contract to test the panic.
    unsafe {
        pool.free(ptr);
        pool.free(ptr);
    }
}

#[test]
fn many_threads_share_one_pool() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 300;

    for purge_timing in [PurgeTiming::Eager, PurgeTiming::Deferred] {
        let pool = Arc::new(
            SegmentPool::builder()
                .layout_of::<u64>()
                .chunks_per_segment(NonZero::new(CHUNKS_PER_SEGMENT).unwrap())
                .purge_timing(purge_timing)
                .build(),
        );

        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);

                thread::spawn(move || {
                    barrier.wait();

                    let tag = u64::try_from(worker).unwrap();
                    let ptrs: Vec<_> = (0..PER_THREAD)
                        .map(|_| {
                            let ptr = pool.allocate().unwrap().cast::<u64>();
                            // SAFETY: The chunk is ours, aligned and large enough for a u64.
                            unsafe { ptr.write(tag) };
                            ptr
                        })
                        .collect();

                    for ptr in ptrs {
                        // SAFETY: Written above; no other thread was handed the same chunk.
                        assert_eq!(unsafe { ptr.read() }, tag);
                        // SAFETY: The pointer came from this pool and is freed exactly once.
                        unsafe { pool.free(ptr.cast()) };
                    }

                    // Purging concurrently with other threads' allocations must be safe.
                    pool.purge();
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(pool.is_empty());
        pool.purge();
        assert_eq!(pool.segment_count(), 0);
    }
}
