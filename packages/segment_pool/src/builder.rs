use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::pal::BindingsFacade;
use crate::{PurgeTiming, ReclaimOrder, SegmentPool};

/// Builder for creating an instance of [`SegmentPool`].
///
/// [`SegmentPool`] requires the item memory layout to be specified at construction time.
/// Use either `.layout()` to provide a specific layout or `.layout_of::<T>()` to generate
/// a layout based on the provided type.
///
/// The layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// ```
/// use segment_pool::{PurgeTiming, ReclaimOrder, SegmentPool};
///
/// let pool = SegmentPool::builder()
///     .layout_of::<[u64; 3]>()
///     .reclaim_order(ReclaimOrder::MostRecentlyUsed)
///     .purge_timing(PurgeTiming::Deferred)
///     .build();
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct SegmentPoolBuilder {
    item_layout: Option<Layout>,
    reclaim_order: ReclaimOrder,
    purge_timing: PurgeTiming,
    chunks_per_segment: Option<NonZero<usize>>,
    bindings: BindingsFacade,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl SegmentPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            item_layout: None,
            reclaim_order: ReclaimOrder::default(),
            purge_timing: PurgeTiming::default(),
            chunks_per_segment: None,
            bindings: BindingsFacade::target(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the memory layout of the items the pool hands out memory for.
    ///
    /// # Panics
    ///
    /// Panics if the layout is zero-sized or requires more than 16-byte alignment.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use segment_pool::SegmentPool;
    ///
    /// let layout = Layout::from_size_align(48, 8).unwrap();
    /// let pool = SegmentPool::builder().layout(layout).build();
    /// ```
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        assert_supported(layout);
        self.item_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the items based on a type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or requires more than 16-byte alignment.
    ///
    /// # Examples
    ///
    /// ```
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder().layout_of::<u64>().build();
    /// ```
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets where freed chunks are put back on the free list. Defaults to
    /// [`ReclaimOrder::MostRecentlyUsed`].
    #[inline]
    pub fn reclaim_order(mut self, order: ReclaimOrder) -> Self {
        self.reclaim_order = order;
        self
    }

    /// Sets when emptied segments are returned to the operating system. Defaults to
    /// [`PurgeTiming::Eager`].
    #[inline]
    pub fn purge_timing(mut self, timing: PurgeTiming) -> Self {
        self.purge_timing = timing;
        self
    }

    /// Sets the exact number of chunks in each segment, instead of deriving it from the page size.
    ///
    /// Each segment's mapping is still rounded up to whole pages; the remainder stays unused.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZero;
    ///
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder()
    ///     .layout_of::<u64>()
    ///     .chunks_per_segment(NonZero::new(100).unwrap())
    ///     .build();
    ///
    /// let ptr = pool.allocate().unwrap();
    /// assert_eq!(pool.capacity(), 100);
    /// # unsafe { pool.free(ptr) };
    /// ```
    #[inline]
    pub fn chunks_per_segment(mut self, chunks: NonZero<usize>) -> Self {
        self.chunks_per_segment = Some(chunks);
        self
    }

    #[cfg(test)]
    pub(crate) fn bindings(mut self, bindings: BindingsFacade) -> Self {
        self.bindings = bindings;
        self
    }

    /// Builds the pool with the specified configuration. No memory is mapped until the first
    /// allocation.
    ///
    /// # Panics
    ///
    /// Panics if no layout has been set using either [`layout`](Self::layout) or
    /// [`layout_of`](Self::layout_of).
    #[inline]
    #[must_use]
    pub fn build(self) -> SegmentPool {
        let item_layout = self.item_layout.expect(
            "Layout must be set using .layout() or .layout_of::<T>() before calling .build()",
        );

        SegmentPool::new_inner(
            item_layout,
            self.reclaim_order,
            self.purge_timing,
            self.chunks_per_segment,
            self.bindings,
        )
    }
}

fn assert_supported(layout: Layout) {
    assert!(layout.size() > 0, "SegmentPool must have non-zero item size");
    assert!(
        layout.align() <= crate::chunk::CHUNK_ALIGNMENT,
        "SegmentPool items can require at most {}-byte alignment, got {}",
        crate::chunk::CHUNK_ALIGNMENT,
        layout.align()
    );
}
