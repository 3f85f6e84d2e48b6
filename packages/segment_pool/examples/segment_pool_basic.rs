//! Basic usage example for `SegmentPool`.
//!
//! Allocates enough objects to span several segments, frees them and purges the drained
//! segments. Segment mapping and release events are logged to stderr.

use std::num::NonZero;

use segment_pool::{PurgeTiming, ReclaimOrder, SegmentPool};
use tracing::Level;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_writer(std::io::stderr)
        .init();

    let pool = SegmentPool::builder()
        .layout_of::<[u64; 2]>()
        .chunks_per_segment(NonZero::new(100).unwrap())
        .reclaim_order(ReclaimOrder::MostRecentlyUsed)
        .purge_timing(PurgeTiming::Deferred)
        .build();

    let ptrs: Vec<_> = (0..250_u64)
        .map(|i| {
            let ptr = pool.allocate().unwrap().cast::<[u64; 2]>();

            // SAFETY: The chunk is aligned and large enough for the item and nobody else has it.
            unsafe { ptr.write([i, i.wrapping_mul(i)]) };

            ptr
        })
        .collect();

    println!("After allocating 250 objects: {:?}", pool.stats());

    let sum: u64 = ptrs
        .iter()
        // SAFETY: We initialized every chunk above and have not freed any yet.
        .map(|ptr| unsafe { ptr.read() }[0])
        .sum();

    println!("Sum of first fields: {sum}");

    for ptr in ptrs {
        // SAFETY: The pointer came from this pool and is freed exactly once.
        unsafe { pool.free(ptr.cast()) };
    }

    println!("After freeing everything: {:?}", pool.stats());

    let released = pool.purge();

    println!("Purge released {released} segments: {:?}", pool.stats());
}
