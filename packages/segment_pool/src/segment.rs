use std::ops::Range;
use std::ptr::{self, NonNull};
use std::thread;

use crate::MapError;
use crate::chunk::{CHUNK_HEADER_SIZE, ChunkCoordinates, ChunkHeader, FreeLink, SegmentIndex};
use crate::layout::ChunkLayout;
use crate::mapping::Mapping;
use crate::pal::BindingsFacade;

/// One memory mapping subdivided into equally sized chunks.
///
/// The segment owns the mapping and knows how many of its chunks are currently on loan to callers.
/// It does not know which chunks are free - that is tracked by the pool's free list, which spans
/// segments.
///
/// # Out of band access
///
/// The segment never creates references to payload memory, so callers may access payloads via
/// pointers while the pool mutates chunk headers. Headers and payloads never overlap.
#[derive(Debug)]
pub(crate) struct Segment {
    /// `None` once the mapping has been released or leaked. A segment in this state owns nothing
    /// and may be discarded freely.
    mapping: Option<Mapping>,

    layout: ChunkLayout,

    /// Number of chunks from this segment that are currently allocated.
    used_count: usize,

    /// Whether `link_chunks()` has already run.
    linked: bool,
}

/// A forward-linked run of free chunks, as produced by [`Segment::link_chunks()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ChunkChain {
    pub(crate) head: ChunkCoordinates,
    pub(crate) tail: ChunkCoordinates,
    pub(crate) len: usize,
}

impl Segment {
    /// Maps memory for a new segment. The chunks are not usable until [`link_chunks()`] is called.
    ///
    /// [`link_chunks()`]: Self::link_chunks
    pub(crate) fn create(bindings: &BindingsFacade, layout: ChunkLayout) -> Result<Self, MapError> {
        let mapping = Mapping::new(bindings, layout.segment_size())?;

        Ok(Self {
            mapping: Some(mapping),
            layout,
            used_count: 0,
            linked: false,
        })
    }

    fn mapping(&self) -> &Mapping {
        self.mapping
            .as_ref()
            .expect("segment mapping accessed after the segment was released")
    }

    /// Number of chunk slots in the segment.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.layout.chunks_per_segment().get()
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn used_count(&self) -> usize {
        self.used_count
    }

    /// Whether no chunk from this segment is allocated.
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.used_count == 0
    }

    /// The addresses spanned by the segment's mapping.
    #[must_use]
    pub(crate) fn address_range(&self) -> Range<usize> {
        self.mapping().address_range()
    }

    /// Writes a vacant header into every slot and chains them in address order.
    ///
    /// Every header records `index` as its owning segment, so this must be the index at which the
    /// segment is placed in the segment table.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub(crate) fn link_chunks(&mut self, index: SegmentIndex) -> ChunkChain {
        assert!(!self.linked, "segment chunks can only be linked once");
        self.linked = true;

        let capacity = self.capacity();

        // Cannot underflow because capacity is NonZero.
        let last_slot = capacity.wrapping_sub(1);

        for slot in 0..capacity {
            let next = if slot == last_slot {
                FreeLink::END
            } else {
                // Cannot overflow because slot < last_slot.
                FreeLink::to(ChunkCoordinates::from_parts(index, slot.wrapping_add(1)))
            };

            // SAFETY: header_ptr() returns a properly aligned pointer inside our mapping, which we
            // own exclusively. Nothing has been handed out from this segment yet.
            unsafe {
                ptr::write(
                    self.header_ptr(slot).as_ptr(),
                    ChunkHeader::vacant(index, next),
                );
            }
        }

        ChunkChain {
            head: ChunkCoordinates::from_parts(index, 0),
            tail: ChunkCoordinates::from_parts(index, last_slot),
            len: capacity,
        }
    }

    fn header_ptr(&self, slot: usize) -> NonNull<ChunkHeader> {
        assert!(
            slot < self.capacity(),
            "slot {slot} out of bounds in segment of capacity {}",
            self.capacity()
        );

        // SAFETY: The offset of an in-bounds slot lies within the mapping.
        unsafe {
            self.mapping()
                .base()
                .byte_add(self.layout.offset_of(slot))
                .cast::<ChunkHeader>()
        }
    }

    /// Shared access to the header of a linked chunk.
    #[must_use]
    pub(crate) fn header(&self, slot: usize) -> &ChunkHeader {
        debug_assert!(self.linked);

        // SAFETY: The header was initialized by link_chunks() and headers are only ever mutated
        // through `&mut self`, so no exclusive reference can exist while we hold `&self`.
        unsafe { self.header_ptr(slot).as_ref() }
    }

    /// Exclusive access to the header of a linked chunk.
    #[must_use]
    pub(crate) fn header_mut(&mut self, slot: usize) -> &mut ChunkHeader {
        debug_assert!(self.linked);

        // SAFETY: The header was initialized by link_chunks() and we hold `&mut self`, so this is
        // the only reference to it. Callers only ever receive payload pointers, never headers.
        unsafe { self.header_ptr(slot).as_mut() }
    }

    /// Pointer to the payload of a chunk.
    #[must_use]
    pub(crate) fn payload_ptr(&self, slot: usize) -> NonNull<u8> {
        // SAFETY: The payload directly follows the header and lies within the same chunk.
        unsafe { self.header_ptr(slot).byte_add(CHUNK_HEADER_SIZE).cast::<u8>() }
    }

    /// The slot whose header starts at `header`, or `None` if the address is not the start of
    /// one of this segment's chunk headers.
    #[must_use]
    pub(crate) fn slot_of(&self, header: NonNull<ChunkHeader>) -> Option<usize> {
        let offset = header
            .as_ptr()
            .addr()
            .checked_sub(self.mapping().base().as_ptr().addr())?;

        let chunk_size = self.layout.chunk_size();

        #[expect(
            clippy::integer_division,
            clippy::modulo_arithmetic,
            reason = "we need both the whole slot index and the remainder"
        )]
        let (slot, remainder) = (offset / chunk_size, offset % chunk_size);

        (remainder == 0 && slot < self.capacity()).then_some(slot)
    }

    /// Records that a chunk of this segment was handed out.
    pub(crate) fn increment_used(&mut self) {
        assert!(
            self.used_count < self.capacity(),
            "segment of capacity {} cannot have more used chunks than slots",
            self.capacity()
        );

        // Cannot overflow because it is bounded by capacity.
        self.used_count = self.used_count.wrapping_add(1);
    }

    /// Records that a chunk of this segment was returned.
    pub(crate) fn decrement_used(&mut self) {
        assert!(self.used_count > 0, "segment has no used chunks to return");

        // Cannot underflow because we just checked it is non-zero.
        self.used_count = self.used_count.wrapping_sub(1);
    }

    /// Releases the mapping back to the operating system.
    ///
    /// # Panics
    ///
    /// Panics if any chunk of the segment is still allocated. The mapping is leaked rather than
    /// released in that case, because callers may still be using it.
    pub(crate) fn destroy(mut self) {
        self.release();
    }

    /// Gives up the mapping without releasing it. The segment is left empty.
    pub(crate) fn leak(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            mapping.leak();
        }
    }

    fn release(&mut self) {
        let Some(mapping) = self.mapping.take() else {
            return;
        };

        if self.used_count == 0 {
            drop(mapping);
            return;
        }

        // Unmapping would pull memory out from under live objects - better to leak.
        mapping.leak();

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() {
            panic!(
                "destroyed a pool segment with {} chunks still allocated",
                self.used_count
            );
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.release();
    }
}
