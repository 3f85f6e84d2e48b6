/// Where a freed chunk is put back on the pool's free list.
///
/// This only affects chunks returned via [`free()`][crate::SegmentPool::free]. Chunks of a newly
/// mapped segment are always appended in address order.
///
/// # Examples
///
/// ```
/// use segment_pool::{ReclaimOrder, SegmentPool};
///
/// let pool = SegmentPool::builder()
///     .layout_of::<u64>()
///     .reclaim_order(ReclaimOrder::FirstInFirstOut)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReclaimOrder {
    /// Freed chunks go to the head of the free list, so the next allocation reuses the most
    /// recently freed chunk while it is likely still in cache. This is the default.
    #[default]
    MostRecentlyUsed,

    /// Freed chunks go to the tail of the free list, so a freed chunk is reused as late as
    /// possible. Reuse order becomes predictable, which helps when chasing use-after-free bugs.
    FirstInFirstOut,
}

/// When a segment whose chunks are all free is returned to the operating system.
///
/// # Examples
///
/// ```
/// use segment_pool::{PurgeTiming, SegmentPool};
///
/// let pool = SegmentPool::builder()
///     .layout_of::<u64>()
///     .purge_timing(PurgeTiming::Deferred)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum PurgeTiming {
    /// A segment is unmapped as soon as its last allocated chunk is freed. This is the default.
    ///
    /// Memory is returned promptly, at the cost of mapping a new segment again if allocations
    /// keep crossing the same segment boundary.
    #[default]
    Eager,

    /// Emptied segments stay mapped, with their chunks still available for reuse, until
    /// [`purge()`][crate::SegmentPool::purge] is called.
    Deferred,
}
