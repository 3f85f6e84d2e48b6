use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, error, trace, warn};

use crate::chunk::{CHUNK_HEADER_SIZE, ChunkCoordinates, ChunkHeader, SegmentIndex};
use crate::constants::ERR_POISONED_LOCK;
use crate::free_list::FreeList;
use crate::layout::ChunkLayout;
use crate::pal::{Bindings, BindingsFacade};
use crate::segment::Segment;
use crate::segment_table::SegmentTable;
use crate::{AllocError, PoolStats, PurgeTiming, ReclaimOrder, SegmentPoolBuilder};

/// A thread-safe pool of fixed-size memory chunks, carved out of segments that are mapped from
/// the operating system on demand.
///
/// Every chunk has the size and alignment of the item layout the pool was built with. The pool
/// hands out raw payload pointers; it never creates or drops values in that memory.
///
/// When no free chunk is left, the pool maps a new segment and puts all of its chunks on a free
/// list shared by all segments. Segments that no longer have any allocated chunks are returned
/// to the operating system, either as soon as they drain ([`PurgeTiming::Eager`]) or on the next
/// call to [`purge()`][Self::purge] ([`PurgeTiming::Deferred`]).
///
/// # Example
///
/// ```
/// use segment_pool::SegmentPool;
///
/// let pool = SegmentPool::builder().layout_of::<u64>().build();
///
/// let ptr = pool.allocate().unwrap().cast::<u64>();
///
/// // SAFETY: The pointer is valid, aligned for u64 and not shared with anyone.
/// unsafe {
///     ptr.write(42);
///     assert_eq!(ptr.read(), 42);
/// }
///
/// // SAFETY: The pointer came from this pool and has not been freed yet.
/// unsafe { pool.free(ptr.cast()) };
/// ```
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]). Every operation takes a single internal lock
/// for its whole duration, including the operating system calls that map and release segments.
///
/// # Out of band access
///
/// The pool never creates references to payload memory. Callers may read and write the memory
/// behind the pointers they hold while other threads allocate and free other chunks.
///
/// # Dropping the pool
///
/// All chunks must be freed before the pool is dropped. If any are still allocated, their
/// segments are leaked instead of released, and the drop panics in debug builds.
#[derive(Debug)]
pub struct SegmentPool {
    item_layout: Layout,
    chunk_layout: ChunkLayout,
    reclaim_order: ReclaimOrder,
    purge_timing: PurgeTiming,
    bindings: BindingsFacade,

    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    segments: SegmentTable,
    free_list: FreeList,

    /// Number of chunks currently handed out to callers, across all segments.
    used_objects: usize,

    segments_created: u64,
    segments_released: u64,
}

impl SegmentPool {
    /// Starts building a new [`SegmentPool`].
    ///
    /// # Example
    ///
    /// ```
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder().layout_of::<[u8; 24]>().build();
    /// assert!(pool.is_empty());
    /// ```
    #[cfg_attr(test, mutants::skip)] // Gets mutated to alternate version of itself.
    pub fn builder() -> SegmentPoolBuilder {
        SegmentPoolBuilder::new()
    }

    pub(crate) fn new_inner(
        item_layout: Layout,
        reclaim_order: ReclaimOrder,
        purge_timing: PurgeTiming,
        chunks_per_segment: Option<NonZero<usize>>,
        bindings: BindingsFacade,
    ) -> Self {
        let chunk_layout =
            ChunkLayout::calculate(item_layout, bindings.page_size(), chunks_per_segment);

        Self {
            item_layout,
            chunk_layout,
            reclaim_order,
            purge_timing,
            bindings,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The layout of the items the pool hands out memory for.
    #[must_use]
    pub fn item_layout(&self) -> Layout {
        self.item_layout
    }

    /// Where freed chunks are put back on the free list.
    #[must_use]
    pub fn reclaim_order(&self) -> ReclaimOrder {
        self.reclaim_order
    }

    /// When emptied segments are returned to the operating system.
    #[must_use]
    pub fn purge_timing(&self) -> PurgeTiming {
        self.purge_timing
    }

    /// Number of chunks in each segment.
    #[must_use]
    pub fn chunks_per_segment(&self) -> NonZero<usize> {
        self.chunk_layout.chunks_per_segment()
    }

    /// Number of chunks currently allocated.
    #[must_use]
    pub fn used_objects(&self) -> usize {
        self.lock_state().used_objects
    }

    /// Number of chunks the pool can hold without mapping another segment.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock_state().segments.capacity()
    }

    /// Number of segments currently mapped.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.lock_state().segments.len()
    }

    /// Whether no chunk is currently allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used_objects() == 0
    }

    /// A consistent snapshot of the pool's counters.
    ///
    /// # Example
    ///
    /// ```
    /// use segment_pool::{PurgeTiming, SegmentPool};
    ///
    /// let pool = SegmentPool::builder()
    ///     .layout_of::<u32>()
    ///     .purge_timing(PurgeTiming::Deferred)
    ///     .build();
    ///
    /// let ptr = pool.allocate().unwrap();
    /// // SAFETY: The pointer came from this pool and has not been freed yet.
    /// unsafe { pool.free(ptr) };
    ///
    /// let stats = pool.stats();
    /// assert_eq!(stats.segments(), 1);
    /// assert_eq!(stats.used_objects(), 0);
    /// assert_eq!(stats.free_chunks(), stats.capacity());
    /// ```
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();

        PoolStats::new(
            state.segments.len(),
            state.segments.capacity(),
            state.used_objects,
            state.free_list.len(),
            state.segments_created,
            state.segments_released,
        )
    }

    /// Hands out one chunk, mapping a new segment first if no chunk is free.
    ///
    /// The returned pointer is aligned to the pool's item layout and valid for reads and writes
    /// of `item_layout().size()` bytes until it is passed to [`free()`][Self::free]. The memory
    /// is not initialized; it may hold whatever a previous owner of the chunk left there.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if a new segment was needed but the operating system
    /// declined to map it. The pool is left unchanged and the call may be retried later.
    ///
    /// # Example
    ///
    /// ```
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder().layout_of::<u64>().build();
    ///
    /// let first = pool.allocate().unwrap();
    /// let second = pool.allocate().unwrap();
    /// assert_ne!(first, second);
    /// assert_eq!(pool.used_objects(), 2);
    ///
    /// // SAFETY: Both pointers came from this pool and have not been freed yet.
    /// unsafe {
    ///     pool.free(first);
    ///     pool.free(second);
    /// }
    /// ```
    pub fn allocate(&self) -> Result<NonNull<u8>, AllocError> {
        let mut state = self.lock_state();

        if state.free_list.is_empty() {
            self.expand(&mut state)?;
        }

        let PoolState {
            segments,
            free_list,
            used_objects,
            ..
        } = &mut *state;

        let chunk = free_list
            .pop_front(segments)
            .expect("free list cannot be empty right after a successful expansion");

        let segment = segments
            .get_mut(chunk.segment())
            .expect("free list only refers to live segments");

        segment.header_mut(chunk.slot()).mark_allocated();
        segment.increment_used();

        // Cannot overflow because every allocated object occupies a distinct chunk in memory.
        *used_objects = used_objects.wrapping_add(1);

        let ptr = segment.payload_ptr(chunk.slot());

        #[cfg(debug_assertions)]
        self.debug_check(&state, Some(chunk.segment()));

        Ok(ptr)
    }

    /// Returns a chunk to the pool.
    ///
    /// The chunk goes back on the free list according to the pool's [`ReclaimOrder`]. Under
    /// [`PurgeTiming::Eager`], the chunk's segment is released immediately if this was its last
    /// allocated chunk.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate()`][Self::allocate] on this pool and must
    /// not have been freed since. The caller must not access the memory after this call.
    ///
    /// # Panics
    ///
    /// Panics if the pool can tell that `ptr` was not allocated from it or was already freed.
    /// Not every such misuse is detectable.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: The caller guarantees the pointer came from allocate(), which returns a pointer
        // just past a chunk header. The header is in the same mapping.
        let header = unsafe { ptr.byte_sub(CHUNK_HEADER_SIZE) }.cast::<ChunkHeader>();

        let mut state = self.lock_state();

        // SAFETY: The caller guarantees the pointer came from this pool, so the header is
        // initialized and lives in one of our segments. We hold the lock, so nobody is writing it.
        let segment_index = unsafe { ChunkHeader::read_segment(header) };

        let PoolState {
            segments,
            free_list,
            used_objects,
            ..
        } = &mut *state;

        let segment = segments.get_mut(segment_index).unwrap_or_else(|| {
            panic!("freed pointer {ptr:p} claims to belong to segment {segment_index}, which does not exist")
        });

        let slot = segment.slot_of(header).unwrap_or_else(|| {
            panic!("freed pointer {ptr:p} is not the start of a chunk of segment {segment_index}")
        });

        segment.header_mut(slot).mark_free();
        segment.decrement_used();
        let segment_drained = segment.is_empty();

        let chunk = ChunkCoordinates::from_parts(segment_index, slot);

        match self.reclaim_order {
            ReclaimOrder::MostRecentlyUsed => free_list.push_front(segments, chunk),
            ReclaimOrder::FirstInFirstOut => free_list.push_back(segments, chunk),
        }

        // Cannot underflow because the chunk was allocated, so it was counted.
        *used_objects = used_objects.wrapping_sub(1);

        if segment_drained && self.purge_timing == PurgeTiming::Eager {
            Self::release_segments(&mut state, |index| index == segment_index);
        }

        #[cfg(debug_assertions)]
        self.debug_check(&state, Some(segment_index));
    }

    /// Returns every segment without allocated chunks to the operating system. Returns the
    /// number of segments released.
    ///
    /// Under [`PurgeTiming::Eager`] there is never anything to release, because segments are
    /// released as soon as they drain.
    ///
    /// # Example
    ///
    /// ```
    /// use segment_pool::{PurgeTiming, SegmentPool};
    ///
    /// let pool = SegmentPool::builder()
    ///     .layout_of::<u64>()
    ///     .purge_timing(PurgeTiming::Deferred)
    ///     .build();
    ///
    /// let ptr = pool.allocate().unwrap();
    /// // SAFETY: The pointer came from this pool and has not been freed yet.
    /// unsafe { pool.free(ptr) };
    /// assert_eq!(pool.segment_count(), 1);
    ///
    /// assert_eq!(pool.purge(), 1);
    /// assert_eq!(pool.segment_count(), 0);
    /// ```
    pub fn purge(&self) -> usize {
        let mut state = self.lock_state();

        // Indexed by segment index, so the free list walk can test each chunk in constant time.
        let mut drained: Vec<bool> = Vec::with_capacity(state.segments.len());

        for (index, segment) in state.segments.iter() {
            // Vacant entries are never drained. The table iterates in ascending index order.
            drained.resize(index.get(), false);
            drained.push(segment.is_empty());
        }

        if !drained.contains(&true) {
            trace!("purge found no empty segments");
            return 0;
        }

        let released = Self::release_segments(&mut state, |index| {
            drained.get(index.get()).copied().unwrap_or(false)
        });

        #[cfg(debug_assertions)]
        self.debug_check(&state, None);

        trace!(released, remaining = state.segments.len(), "purged empty segments");

        released
    }

    /// Maps a new segment and appends all of its chunks to the free list.
    ///
    /// Nothing changes if the mapping fails.
    fn expand(&self, state: &mut PoolState) -> Result<(), AllocError> {
        let mut segment = Segment::create(&self.bindings, self.chunk_layout).inspect_err(|e| {
            warn!(
                size = e.size(),
                error = %e,
                "failed to map a new pool segment"
            );
        })?;

        let index = state.segments.vacant_index();
        let chain = segment.link_chunks(index);
        let address_range = segment.address_range();

        state.segments.insert(index, segment);
        state.free_list.append(&mut state.segments, chain);

        // Cannot overflow because we would run out of address space long before.
        state.segments_created = state.segments_created.wrapping_add(1);

        debug!(
            segment = %index,
            bytes = address_range.len(),
            chunks = chain.len,
            start = format_args!("{:#x}", address_range.start),
            end = format_args!("{:#x}", address_range.end),
            "mapped pool segment"
        );

        #[cfg(debug_assertions)]
        self.debug_check(state, None);

        Ok(())
    }

    /// Removes the chunks of every segment matching `filter` from the free list and releases the
    /// segments. Every matching segment must be empty. Returns the number of segments released.
    fn release_segments(state: &mut PoolState, filter: impl Fn(SegmentIndex) -> bool) -> usize {
        let excised = state.free_list.excise(&mut state.segments, &filter);

        let doomed: Vec<SegmentIndex> = state
            .segments
            .iter()
            .map(|(index, _)| index)
            .filter(|index| filter(*index))
            .collect();

        for index in &doomed {
            let segment = state.segments.remove(*index);
            let address_range = segment.address_range();

            segment.destroy();

            // Cannot overflow because we would run out of address space long before.
            state.segments_released = state.segments_released.wrapping_add(1);

            debug!(
                segment = %index,
                start = format_args!("{:#x}", address_range.start),
                end = format_args!("{:#x}", address_range.end),
                "released pool segment"
            );
        }

        trace!(
            segments = doomed.len(),
            chunks = excised,
            "removed chunks of released segments from the free list"
        );

        doomed.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }

    /// Constant-time consistency check run after every mutation in debug builds. `touched` is the
    /// segment the operation allocated from or freed into, if any.
    ///
    /// Test builds additionally walk the entire free list and segment table.
    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is test logic, no point mutating.
    fn debug_check(&self, state: &PoolState, touched: Option<SegmentIndex>) {
        assert_eq!(
            state.free_list.len().checked_add(state.used_objects),
            Some(state.segments.capacity()),
            "every chunk must be either allocated or on the free list"
        );

        let touched =
            touched.and_then(|index| state.segments.get(index).map(|segment| (index, segment)));

        if let Some((index, segment)) = touched {
            assert!(
                self.purge_timing != PurgeTiming::Eager || !segment.is_empty(),
                "segment {index} drained under eager purge timing but was not released"
            );
        }

        #[cfg(test)]
        Self::integrity_check(state);
    }

    /// Verifies that the free list, the segment table and the counters agree with each other.
    #[cfg(all(test, debug_assertions))]
    #[mutants::skip] // This is test logic, no point mutating.
    fn integrity_check(state: &PoolState) {
        let mut walked: usize = 0;
        let mut last = None;

        for chunk in state.free_list.iter(&state.segments) {
            let segment = state.segments.get(chunk.segment()).unwrap_or_else(|| {
                panic!("free list refers to segment {} which does not exist", chunk.segment())
            });

            assert!(
                segment.header(chunk.slot()).is_free(),
                "free list holds chunk {} of segment {} which is not marked free",
                chunk.slot(),
                chunk.segment()
            );

            walked = walked
                .checked_add(1)
                .expect("free list walk cannot exceed the size of virtual memory");
            last = Some(chunk);
        }

        assert_eq!(
            walked,
            state.free_list.len(),
            "free list length does not match the number of linked chunks"
        );
        assert_eq!(
            last,
            state.free_list.tail(),
            "free list tail is not the last linked chunk"
        );

        let used: usize = state
            .segments
            .iter()
            .map(|(_, segment)| segment.used_count())
            .sum();

        assert_eq!(
            used, state.used_objects,
            "segment used counts do not add up to the pool's used object count"
        );

        let capacity = state.segments.capacity();

        assert_eq!(
            capacity.checked_sub(used),
            Some(state.free_list.len()),
            "every chunk must be either allocated or on the free list"
        );
    }
}

impl Drop for SegmentPool {
    fn drop(&mut self) {
        // Whatever the state of the lock, we still own the segments and must dispose of them.
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if state.used_objects == 0 {
            return;
        }

        let outstanding = state.used_objects;

        // Someone may still be using the memory, so the segments must outlive the pool.
        state.segments.leak_all();

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if thread::panicking() {
            return;
        }

        if cfg!(debug_assertions) {
            panic!("dropped SegmentPool with {outstanding} objects still allocated");
        }

        error!(
            outstanding,
            "dropped SegmentPool with objects still allocated; their segments have been leaked"
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::pal::MockBindings;

    assert_impl_all!(SegmentPool: Send, Sync, std::fmt::Debug);

    const PAGE_SIZE: usize = 4096;

    /// Mock bindings that report a 4 KB page and map real memory, except that every mapping
    /// after the first `successful_maps` fails.
    fn bindings_failing_after(successful_maps: usize) -> (BindingsFacade, Arc<AtomicUsize>) {
        let maps = Arc::new(AtomicUsize::new(0));
        let mut mock = MockBindings::new();

        mock.expect_page_size().return_const(PAGE_SIZE);

        let counter = Arc::clone(&maps);
        mock.expect_map_anonymous().returning(move |len| {
            if counter.fetch_add(1, Ordering::Relaxed) >= successful_maps {
                Err(io::Error::from(io::ErrorKind::OutOfMemory))
            } else {
                BindingsFacade::fallback().map_anonymous(len)
            }
        });

        mock.expect_unmap()
            .returning(|ptr, len| BindingsFacade::fallback().unmap(ptr, len));

        (BindingsFacade::from_mock(mock), maps)
    }

    fn pool(reclaim_order: ReclaimOrder, purge_timing: PurgeTiming) -> SegmentPool {
        SegmentPool::builder()
            .layout_of::<u64>()
            .reclaim_order(reclaim_order)
            .purge_timing(purge_timing)
            .chunks_per_segment(nz!(2))
            .bindings(BindingsFacade::fallback())
            .build()
    }

    fn free_all(pool: &SegmentPool, ptrs: impl IntoIterator<Item = NonNull<u8>>) {
        for ptr in ptrs {
            // SAFETY: Every pointer came from this pool and is freed exactly once.
            unsafe { pool.free(ptr) };
        }
    }

    #[test]
    fn new_pool_maps_nothing() {
        let (bindings, maps) = bindings_failing_after(usize::MAX);

        let pool = SegmentPool::builder()
            .layout_of::<u64>()
            .bindings(bindings)
            .build();

        assert!(pool.is_empty());
        assert_eq!(pool.segment_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(maps.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn default_segment_size_uses_mocked_page_size() {
        let (bindings, _) = bindings_failing_after(usize::MAX);

        let pool = SegmentPool::builder()
            .layout_of::<u64>()
            .bindings(bindings)
            .build();

        // Two 4 KB pages of 32-byte chunks.
        assert_eq!(pool.chunks_per_segment().get(), 256);
    }

    #[test]
    fn first_allocation_maps_one_segment() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Eager);

        let ptr = pool.allocate().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.segments(), 1);
        assert_eq!(stats.capacity(), 2);
        assert_eq!(stats.used_objects(), 1);
        assert_eq!(stats.free_chunks(), 1);
        assert_eq!(stats.segments_created(), 1);

        free_all(&pool, [ptr]);
    }

    #[test]
    fn payload_is_aligned_and_writable() {
        let pool = SegmentPool::builder()
            .layout_of::<u128>()
            .bindings(BindingsFacade::fallback())
            .build();

        let ptrs: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();

        for (i, ptr) in ptrs.iter().enumerate() {
            assert!(ptr.cast::<u128>().as_ptr().is_aligned());

            // SAFETY: The chunk is ours, aligned and large enough for a u128.
            unsafe { ptr.cast::<u128>().write(u128::try_from(i).unwrap()) };
        }

        for (i, ptr) in ptrs.iter().enumerate() {
            // SAFETY: We wrote this value above.
            assert_eq!(
                unsafe { ptr.cast::<u128>().read() },
                u128::try_from(i).unwrap()
            );
        }

        free_all(&pool, ptrs);
    }

    #[test]
    fn eager_purge_releases_segment_on_last_free() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Eager);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert_eq!(pool.segment_count(), 2);

        free_all(&pool, [c]);
        assert_eq!(pool.segment_count(), 1);

        free_all(&pool, [a]);
        assert_eq!(pool.segment_count(), 1);

        free_all(&pool, [b]);

        let stats = pool.stats();
        assert_eq!(stats.segments(), 0);
        assert_eq!(stats.free_chunks(), 0);
        assert_eq!(stats.segments_released(), 2);

        // Nothing left to purge.
        assert_eq!(pool.purge(), 0);
    }

    #[test]
    fn deferred_purge_keeps_segments_until_purge() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);

        let ptrs: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.segment_count(), 3);

        free_all(&pool, ptrs);
        assert_eq!(pool.segment_count(), 3);
        assert_eq!(pool.stats().free_chunks(), 6);

        assert_eq!(pool.purge(), 3);

        let stats = pool.stats();
        assert_eq!(stats.segments(), 0);
        assert_eq!(stats.free_chunks(), 0);
        assert_eq!(stats.segments_released(), 3);
    }

    #[test]
    fn purge_only_releases_empty_segments() {
        let pool = pool(ReclaimOrder::FirstInFirstOut, PurgeTiming::Deferred);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        // Segment 0 drains, segment 1 still holds `c`.
        free_all(&pool, [a, b]);

        assert_eq!(pool.purge(), 1);
        assert_eq!(pool.segment_count(), 1);
        assert_eq!(pool.stats().free_chunks(), 1);

        free_all(&pool, [c]);
        assert_eq!(pool.purge(), 1);
        assert_eq!(pool.segment_count(), 0);
    }

    #[test]
    fn purge_releases_drained_segments_around_vacancies_and_busy_ones() {
        let pool = pool(ReclaimOrder::FirstInFirstOut, PurgeTiming::Deferred);

        let segments: Vec<Vec<_>> = (0..5)
            .map(|_| (0..2).map(|_| pool.allocate().unwrap()).collect())
            .collect();
        let [s0, s1, s2, s3, s4] = <[_; 5]>::try_from(segments).unwrap();

        // Leave a vacant entry at index 1.
        free_all(&pool, s1);
        assert_eq!(pool.purge(), 1);

        // Segments 0 and 3 drain, segments 2 and 4 stay busy.
        free_all(&pool, s0);
        free_all(&pool, s3);
        assert_eq!(pool.purge(), 2);

        let stats = pool.stats();
        assert_eq!(stats.segments(), 2);
        assert_eq!(stats.capacity(), 4);
        assert_eq!(stats.free_chunks(), 0);

        free_all(&pool, s2);
        free_all(&pool, s4);
        assert_eq!(pool.purge(), 2);
        assert_eq!(pool.segment_count(), 0);
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Too slow under Miri.
    fn large_churn_keeps_counters_consistent() {
        let pool = SegmentPool::builder()
            .layout_of::<u64>()
            .chunks_per_segment(nz!(16))
            .purge_timing(PurgeTiming::Deferred)
            .bindings(BindingsFacade::fallback())
            .build();

        let ptrs: Vec<_> = (0..2000).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.segment_count(), 125);

        free_all(&pool, ptrs.iter().copied().step_by(2));
        assert_eq!(pool.used_objects(), 1000);
        assert_eq!(pool.purge(), 0);

        free_all(&pool, ptrs.iter().copied().skip(1).step_by(2));
        assert_eq!(pool.purge(), 125);
        assert_eq!(pool.stats().free_chunks(), 0);
    }

    #[test]
    fn released_segment_index_is_reused() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);

        let first: Vec<_> = (0..2).map(|_| pool.allocate().unwrap()).collect();
        let second: Vec<_> = (0..2).map(|_| pool.allocate().unwrap()).collect();

        free_all(&pool, first);
        assert_eq!(pool.purge(), 1);

        // The free list is empty, so this maps a segment into the vacated index.
        let third: Vec<_> = (0..2).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.segment_count(), 2);
        assert_eq!(pool.stats().segments_created(), 3);

        free_all(&pool, second);
        free_all(&pool, third);
        assert_eq!(pool.purge(), 2);
    }

    #[test]
    fn mru_reuses_most_recently_freed_chunk() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        free_all(&pool, [a, b]);

        assert_eq!(pool.allocate().unwrap(), b);
        assert_eq!(pool.allocate().unwrap(), a);

        free_all(&pool, [a, b]);
    }

    #[test]
    fn fifo_reuses_least_recently_freed_chunk() {
        let pool = pool(ReclaimOrder::FirstInFirstOut, PurgeTiming::Deferred);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        free_all(&pool, [a, b]);

        assert_eq!(pool.allocate().unwrap(), a);
        assert_eq!(pool.allocate().unwrap(), b);

        free_all(&pool, [a, b]);
    }

    #[test]
    fn map_failure_reports_out_of_memory_and_changes_nothing() {
        let (bindings, maps) = bindings_failing_after(1);

        let pool = SegmentPool::builder()
            .layout_of::<u64>()
            .chunks_per_segment(nz!(2))
            .bindings(bindings)
            .build();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let before = pool.stats();

        let result = pool.allocate();
        assert!(matches!(result, Err(AllocError::OutOfMemory(_))));
        assert_eq!(pool.stats(), before);
        assert_eq!(maps.load(Ordering::Relaxed), 2);

        // Freeing still works and makes room again.
        free_all(&pool, [b]);
        let again = pool.allocate().unwrap();
        assert_eq!(again, b);

        free_all(&pool, [a, again]);
    }

    #[test]
    fn map_failure_carries_requested_size() {
        let (bindings, _) = bindings_failing_after(0);

        let pool = SegmentPool::builder()
            .layout_of::<u64>()
            .bindings(bindings)
            .build();

        let Err(AllocError::OutOfMemory(error)) = pool.allocate() else {
            panic!("allocation must fail when nothing can be mapped");
        };

        assert_eq!(error.size(), PAGE_SIZE.checked_mul(2).unwrap());
    }

    #[test]
    #[should_panic]
    #[cfg_attr(miri, ignore)] // Miri reports the segment leaked by the panicking pool.
    fn double_free_panics() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        // SAFETY: Deliberately violating the contract to test the panic. The segment is still
        // mapped because `_b` keeps it alive and purge timing is deferred anyway.
        unsafe {
            pool.free(a);
            pool.free(a);
        }
    }

    #[test]
    #[should_panic]
    #[cfg_attr(miri, ignore)] // Miri reports the segment leaked by the panicking pool.
    fn pointer_inside_chunk_panics() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);

        let ptr = pool.allocate().unwrap();

        // SAFETY: Deliberately violating the contract to test the panic. The offset stays inside
        // the chunk, and the fresh chunk is zeroed so the misplaced header names segment 0.
        unsafe { pool.free(ptr.byte_add(8)) };
    }

    #[test]
    #[should_panic(expected = "is not the start of a chunk")]
    #[cfg_attr(miri, ignore)] // Miri reports the segments leaked by the panicking pools.
    fn pointer_from_other_pool_panics() {
        let owner = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);
        let other = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Deferred);

        // Both pools have a segment 0, so the header of the foreign chunk names a live segment.
        let foreign = owner.allocate().unwrap();
        let _local = other.allocate().unwrap();

        // SAFETY: Deliberately violating the contract to test the panic. The header is readable
        // because `owner` keeps its segment mapped.
        unsafe { other.free(foreign) };
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    #[cfg_attr(miri, ignore)] // Miri reports the deliberately leaked segment.
    fn drop_with_outstanding_objects_panics_in_debug() {
        let pool = pool(ReclaimOrder::MostRecentlyUsed, PurgeTiming::Eager);

        _ = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    fn concurrent_allocate_and_free() {
        let pool = Arc::new(pool(ReclaimOrder::FirstInFirstOut, PurgeTiming::Eager));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);

                thread::spawn(move || {
                    for _ in 0..50 {
                        let ptrs: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();
                        free_all(&pool, ptrs);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert!(pool.is_empty());
        assert_eq!(pool.segment_count(), 0);
    }
}
