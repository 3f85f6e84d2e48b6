use std::fmt;
use std::ptr::NonNull;

/// Alignment of every chunk and of every payload handed out by the pool.
pub(crate) const CHUNK_ALIGNMENT: usize = 16;

/// Size of the header that precedes every payload. Payload pointers are exactly this many bytes
/// past the start of their chunk.
pub(crate) const CHUNK_HEADER_SIZE: usize = size_of::<ChunkHeader>();

// Chunk strides are multiples of CHUNK_ALIGNMENT, so this keeps every payload aligned.
const _: () = assert!(CHUNK_HEADER_SIZE % CHUNK_ALIGNMENT == 0);

// Canary values for the state tag. Anything else in the tag means the header was overwritten or
// the pointer given to us never came from the pool.
const TAG_FREE: u32 = 0xF4EE_C4C4;
const TAG_ALLOCATED: u32 = 0xA110_CA7E;

/// Position of a segment in the pool's segment table.
///
/// Chunks refer to their owning segment by this index instead of by address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub(crate) struct SegmentIndex(u32);

impl SegmentIndex {
    /// # Panics
    ///
    /// Panics if the pool would need more segments than the header encoding can address.
    #[must_use]
    pub(crate) fn from_usize(index: usize) -> Self {
        let index = u32::try_from(index)
            .ok()
            .filter(|&index| index != u32::MAX)
            .expect("pool cannot address more than u32::MAX - 1 segments");

        Self(index)
    }

    #[must_use]
    pub(crate) fn get(self) -> usize {
        // u32 always fits into usize on the 32/64-bit targets we support.
        self.0 as usize
    }
}

impl fmt::Display for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one chunk: the segment it lives in and its slot within that segment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct ChunkCoordinates {
    segment: SegmentIndex,
    slot: u32,
}

impl ChunkCoordinates {
    #[must_use]
    pub(crate) fn from_parts(segment: SegmentIndex, slot: usize) -> Self {
        Self {
            segment,
            slot: u32::try_from(slot).expect("segments never hold more than u32::MAX chunks"),
        }
    }

    #[must_use]
    pub(crate) fn segment(&self) -> SegmentIndex {
        self.segment
    }

    #[must_use]
    pub(crate) fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// An optional [`ChunkCoordinates`] packed into one word, so that the header stays small.
#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct FreeLink(u64);

impl FreeLink {
    /// Marks the end of the free list. Never a valid coordinate because segment index
    /// `u32::MAX` is never assigned.
    pub(crate) const END: Self = Self(u64::MAX);

    #[must_use]
    pub(crate) fn to(coordinates: ChunkCoordinates) -> Self {
        Self((u64::from(coordinates.segment.0) << 32) | u64::from(coordinates.slot))
    }

    #[must_use]
    pub(crate) fn from_option(coordinates: Option<ChunkCoordinates>) -> Self {
        coordinates.map_or(Self::END, Self::to)
    }

    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "we are unpacking two u32 halves on purpose"
    )]
    pub(crate) fn get(self) -> Option<ChunkCoordinates> {
        if self == Self::END {
            return None;
        }

        Some(ChunkCoordinates {
            segment: SegmentIndex((self.0 >> 32) as u32),
            slot: self.0 as u32,
        })
    }
}

impl fmt::Debug for FreeLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(coordinates) => write!(
                f,
                "FreeLink({}:{})",
                coordinates.segment,
                coordinates.slot()
            ),
            None => f.write_str("FreeLink(END)"),
        }
    }
}

/// The structural prefix of every chunk, stored in the segment's mapping in front of the payload.
///
/// The header is owned by the pool for the whole life of the chunk, including while the payload
/// is on loan to a caller. Callers never see it.
#[derive(Debug)]
#[repr(C, align(16))]
pub(crate) struct ChunkHeader {
    /// Next chunk on the free list. Only meaningful while the chunk is free.
    next: FreeLink,

    /// The segment that owns this chunk. Valid for the entire life of the chunk.
    segment: SegmentIndex,

    /// `TAG_FREE` or `TAG_ALLOCATED`.
    tag: u32,
}

impl ChunkHeader {
    /// A header for a chunk that has just been carved out of a fresh segment.
    #[must_use]
    pub(crate) fn vacant(segment: SegmentIndex, next: FreeLink) -> Self {
        Self {
            next,
            segment,
            tag: TAG_FREE,
        }
    }

    /// Reads the segment index from a header without creating a reference to it.
    ///
    /// # Safety
    ///
    /// `header` must point to a chunk header inside a mapping owned by the caller's pool, and
    /// the caller must hold the lock that guards it.
    #[must_use]
    pub(crate) unsafe fn read_segment(header: NonNull<Self>) -> SegmentIndex {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { (&raw const (*header.as_ptr()).segment).read() }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn segment(&self) -> SegmentIndex {
        self.segment
    }

    #[must_use]
    pub(crate) fn next(&self) -> FreeLink {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: FreeLink) {
        self.next = next;
    }

    #[must_use]
    pub(crate) fn is_free(&self) -> bool {
        self.tag == TAG_FREE
    }

    #[must_use]
    pub(crate) fn is_allocated(&self) -> bool {
        self.tag == TAG_ALLOCATED
    }

    /// Transitions the chunk from free to allocated.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is not free, which means the free list has been corrupted.
    pub(crate) fn mark_allocated(&mut self) {
        assert!(
            self.is_free(),
            "chunk on the free list of segment {} has tag {:#010x} instead of the free tag; \
             the free list has been corrupted",
            self.segment,
            self.tag
        );

        self.tag = TAG_ALLOCATED;
        self.next = FreeLink::END;
    }

    /// Transitions the chunk from allocated to free.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is not allocated, which means the caller freed it twice or freed a
    /// pointer that the pool never handed out.
    pub(crate) fn mark_free(&mut self) {
        assert!(
            self.is_allocated(),
            "freed a chunk of segment {} that is not allocated (tag {:#010x}); \
             this is a double free or a pointer that did not come from this pool",
            self.segment,
            self.tag
        );

        self.tag = TAG_FREE;
    }
}
