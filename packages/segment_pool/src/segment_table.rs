use crate::chunk::{ChunkCoordinates, ChunkHeader, SegmentIndex};
use crate::segment::Segment;

/// The pool's collection of live segments, addressed by [`SegmentIndex`].
///
/// A released segment leaves a vacant entry behind, which the next new segment reuses. Index reuse
/// is safe because a segment is only released once no chunk (free or allocated) refers to it.
#[derive(Debug, Default)]
pub(crate) struct SegmentTable {
    entries: Vec<Option<Segment>>,

    /// Number of occupied entries.
    live: usize,

    /// Total number of chunk slots across the occupied entries.
    capacity: usize,
}

impl SegmentTable {
    /// Number of live segments.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total number of chunks across all live segments.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// The index that the next inserted segment will receive.
    #[must_use]
    pub(crate) fn vacant_index(&self) -> SegmentIndex {
        let index = self
            .entries
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.entries.len());

        SegmentIndex::from_usize(index)
    }

    /// Places a segment at `index`, which must have come from [`vacant_index()`][Self::vacant_index].
    ///
    /// # Panics
    ///
    /// Panics if the entry is occupied.
    pub(crate) fn insert(&mut self, index: SegmentIndex, segment: Segment) {
        let capacity = segment.capacity();

        if index.get() == self.entries.len() {
            self.entries.push(Some(segment));
        } else {
            let entry = self
                .entries
                .get_mut(index.get())
                .expect("inserted segment index must come from vacant_index()");

            assert!(entry.is_none(), "segment table entry {index} is occupied");
            *entry = Some(segment);
        }

        // Cannot overflow because every live segment is a distinct memory mapping.
        self.live = self.live.wrapping_add(1);

        // Cannot overflow because every chunk occupies distinct memory.
        self.capacity = self.capacity.wrapping_add(capacity);
    }

    /// Takes a segment out of the table, leaving its entry vacant.
    ///
    /// # Panics
    ///
    /// Panics if there is no segment at `index`.
    #[must_use]
    pub(crate) fn remove(&mut self, index: SegmentIndex) -> Segment {
        let segment = self
            .entries
            .get_mut(index.get())
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("no segment at index {index} to remove"));

        // Cannot underflow because we just removed a live segment.
        self.live = self.live.wrapping_sub(1);

        // Cannot underflow because the segment's chunks were counted on insert.
        self.capacity = self.capacity.wrapping_sub(segment.capacity());

        // Keep the table compact when the tail empties out.
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }

        segment
    }

    #[must_use]
    pub(crate) fn get(&self, index: SegmentIndex) -> Option<&Segment> {
        self.entries.get(index.get()).and_then(Option::as_ref)
    }

    #[must_use]
    pub(crate) fn get_mut(&mut self, index: SegmentIndex) -> Option<&mut Segment> {
        self.entries.get_mut(index.get()).and_then(Option::as_mut)
    }

    /// Live segments in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SegmentIndex, &Segment)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                entry
                    .as_ref()
                    .map(|segment| (SegmentIndex::from_usize(index), segment))
            })
    }

    /// Shared access to the header of the chunk at `coordinates`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates do not name a chunk of a live segment.
    #[must_use]
    pub(crate) fn header(&self, coordinates: ChunkCoordinates) -> &ChunkHeader {
        self.get(coordinates.segment())
            .unwrap_or_else(|| panic!("chunk refers to missing segment {}", coordinates.segment()))
            .header(coordinates.slot())
    }

    /// Exclusive access to the header of the chunk at `coordinates`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates do not name a chunk of a live segment.
    #[must_use]
    pub(crate) fn header_mut(&mut self, coordinates: ChunkCoordinates) -> &mut ChunkHeader {
        self.get_mut(coordinates.segment())
            .unwrap_or_else(|| panic!("chunk refers to missing segment {}", coordinates.segment()))
            .header_mut(coordinates.slot())
    }

    /// Gives up every mapping without releasing it, for when callers may still be using them.
    pub(crate) fn leak_all(&mut self) {
        for segment in self.entries.iter_mut().flatten() {
            segment.leak();
        }
    }
}
