use std::alloc::Layout;
use std::num::NonZero;

use new_zealand::nz;

use crate::chunk::{CHUNK_ALIGNMENT, CHUNK_HEADER_SIZE};

/// Pages per segment for payloads smaller than one eighth of a page.
pub(crate) const SMALL_PAYLOAD_SEGMENT_PAGES: NonZero<usize> = nz!(2);

/// Number of chunks a segment is sized for when the payload is at least one eighth of a page.
pub(crate) const LARGE_PAYLOAD_CHUNKS_PER_SEGMENT: NonZero<usize> = nz!(24);

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
///
/// # Panics
///
/// Panics if the result does not fit in `usize`.
#[must_use]
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());

    // Cannot underflow because alignment is a non-zero power of two.
    let mask = alignment.wrapping_sub(1);

    value
        .checked_add(mask)
        .expect("aligned size exceeds the size of virtual memory")
        & !mask
}

/// Size of one chunk (header plus payload) holding an item of `payload` layout.
///
/// The same stride is used to size segments and to walk their slots.
#[must_use]
pub(crate) fn chunk_size(payload: Layout) -> usize {
    align_up(payload.size(), CHUNK_ALIGNMENT)
        .checked_add(CHUNK_HEADER_SIZE)
        .expect("chunk size exceeds the size of virtual memory")
}

/// Whether a payload is big enough that segments are sized by chunk count instead of by
/// a fixed number of pages.
#[must_use]
pub(crate) fn is_large_payload(payload: Layout, page_size: usize) -> bool {
    payload.size() >= page_size / 8
}

/// How every segment of one pool is laid out. Calculated once when the pool is built.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ChunkLayout {
    /// Stride between consecutive chunks in a segment.
    chunk_size: usize,

    /// Length of each segment's mapping. Always a multiple of the page size.
    segment_size: usize,

    /// Number of chunks linked into each segment.
    chunks_per_segment: NonZero<usize>,
}

impl ChunkLayout {
    /// Calculates the chunk layout for a payload.
    ///
    /// With `chunks_per_segment` set, each segment links exactly that many chunks and the mapping
    /// is just large enough for them. Otherwise, small payloads get a two-page segment and large
    /// payloads get a segment with room for [`LARGE_PAYLOAD_CHUNKS_PER_SEGMENT`] chunks, rounded
    /// up to whole pages, with every chunk that fits linked in.
    ///
    /// # Panics
    ///
    /// Panics if the payload is zero-sized or requires more than 16-byte alignment, or if the
    /// page size is not a power of two.
    #[must_use]
    pub(crate) fn calculate(
        payload: Layout,
        page_size: usize,
        chunks_per_segment: Option<NonZero<usize>>,
    ) -> Self {
        assert!(payload.size() > 0, "pool items must have a non-zero size");
        assert!(
            payload.align() <= CHUNK_ALIGNMENT,
            "pool items can require at most {CHUNK_ALIGNMENT}-byte alignment, got {}",
            payload.align()
        );
        assert!(
            page_size.is_power_of_two(),
            "page size {page_size} is not a power of two"
        );

        let chunk_size = chunk_size(payload);

        if let Some(chunks_per_segment) = chunks_per_segment {
            let segment_size = align_up(
                chunk_size
                    .checked_mul(chunks_per_segment.get())
                    .expect("segment size exceeds the size of virtual memory"),
                page_size,
            );

            return Self {
                chunk_size,
                segment_size,
                chunks_per_segment,
            };
        }

        let segment_size = if is_large_payload(payload, page_size) {
            align_up(
                chunk_size
                    .checked_mul(LARGE_PAYLOAD_CHUNKS_PER_SEGMENT.get())
                    .expect("segment size exceeds the size of virtual memory"),
                page_size,
            )
        } else {
            page_size
                .checked_mul(SMALL_PAYLOAD_SEGMENT_PAGES.get())
                .expect("segment size exceeds the size of virtual memory")
        };

        // A small payload is under page_size / 8 so its chunk is well under two pages, and a
        // large payload segment is sized for 24 chunks, so at least one chunk always fits.
        #[expect(
            clippy::integer_division,
            reason = "we want to know how many whole chunks fit"
        )]
        let chunks_per_segment = NonZero::new(segment_size / chunk_size)
            .expect("a segment always has room for at least one chunk");

        Self {
            chunk_size,
            segment_size,
            chunks_per_segment,
        }
    }

    #[must_use]
    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub(crate) fn segment_size(&self) -> usize {
        self.segment_size
    }

    #[must_use]
    pub(crate) fn chunks_per_segment(&self) -> NonZero<usize> {
        self.chunks_per_segment
    }

    /// Byte offset of the chunk header for `slot`, relative to the start of the segment.
    #[must_use]
    pub(crate) fn offset_of(&self, slot: usize) -> usize {
        debug_assert!(slot < self.chunks_per_segment.get());

        // Cannot overflow because the offset lies within a segment that we managed to size.
        slot.wrapping_mul(self.chunk_size)
    }
}
