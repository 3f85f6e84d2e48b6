/// A snapshot of the state of a [`SegmentPool`][crate::SegmentPool].
///
/// Obtained from [`SegmentPool::stats()`][crate::SegmentPool::stats]. All values are taken
/// under the pool's lock, so they are consistent with each other.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    segments: usize,
    capacity: usize,
    used_objects: usize,
    free_chunks: usize,
    segments_created: u64,
    segments_released: u64,
}

impl PoolStats {
    pub(crate) fn new(
        segments: usize,
        capacity: usize,
        used_objects: usize,
        free_chunks: usize,
        segments_created: u64,
        segments_released: u64,
    ) -> Self {
        Self {
            segments,
            capacity,
            used_objects,
            free_chunks,
            segments_created,
            segments_released,
        }
    }

    /// Number of segments currently mapped.
    #[must_use]
    pub fn segments(&self) -> usize {
        self.segments
    }

    /// Number of chunks across all mapped segments, whether allocated or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of chunks currently allocated.
    #[must_use]
    pub fn used_objects(&self) -> usize {
        self.used_objects
    }

    /// Number of chunks on the free list.
    #[must_use]
    pub fn free_chunks(&self) -> usize {
        self.free_chunks
    }

    /// Number of segments mapped over the lifetime of the pool.
    #[must_use]
    pub fn segments_created(&self) -> u64 {
        self.segments_created
    }

    /// Number of segments unmapped over the lifetime of the pool.
    #[must_use]
    pub fn segments_released(&self) -> u64 {
        self.segments_released
    }
}
