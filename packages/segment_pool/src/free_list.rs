use crate::chunk::{ChunkCoordinates, FreeLink, SegmentIndex};
use crate::segment::ChunkChain;
use crate::segment_table::SegmentTable;

/// Intrusive singly linked list of free chunks, spanning every segment of a pool.
///
/// The links live in the chunk headers inside the segments, so every operation takes the
/// [`SegmentTable`] that owns them. Links are chunk coordinates rather than addresses.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<ChunkCoordinates>,
    tail: Option<ChunkCoordinates>,
    len: usize,
}

impl FreeList {
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn head(&self) -> Option<ChunkCoordinates> {
        self.head
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn tail(&self) -> Option<ChunkCoordinates> {
        self.tail
    }

    /// Detaches and returns the first chunk.
    pub(crate) fn pop_front(&mut self, segments: &SegmentTable) -> Option<ChunkCoordinates> {
        let head = self.head?;

        self.head = segments.header(head).next().get();

        if self.head.is_none() {
            self.tail = None;
        }

        // Cannot underflow because the list had a head.
        self.len = self.len.wrapping_sub(1);

        Some(head)
    }

    /// Makes `chunk` the first chunk, so it is the next one to be popped.
    pub(crate) fn push_front(&mut self, segments: &mut SegmentTable, chunk: ChunkCoordinates) {
        segments
            .header_mut(chunk)
            .set_next(FreeLink::from_option(self.head));

        self.head = Some(chunk);

        if self.tail.is_none() {
            self.tail = Some(chunk);
        }

        // Cannot overflow because every chunk is a distinct piece of memory.
        self.len = self.len.wrapping_add(1);
    }

    /// Makes `chunk` the last chunk, so every chunk already on the list is popped before it.
    pub(crate) fn push_back(&mut self, segments: &mut SegmentTable, chunk: ChunkCoordinates) {
        segments.header_mut(chunk).set_next(FreeLink::END);

        match self.tail {
            Some(tail) => segments.header_mut(tail).set_next(FreeLink::to(chunk)),
            None => self.head = Some(chunk),
        }

        self.tail = Some(chunk);

        // Cannot overflow because every chunk is a distinct piece of memory.
        self.len = self.len.wrapping_add(1);
    }

    /// Appends an already linked chain of chunks after the current tail.
    pub(crate) fn append(&mut self, segments: &mut SegmentTable, chain: ChunkChain) {
        match self.tail {
            Some(tail) => segments.header_mut(tail).set_next(FreeLink::to(chain.head)),
            None => self.head = Some(chain.head),
        }

        self.tail = Some(chain.tail);

        self.len = self
            .len
            .checked_add(chain.len)
            .expect("free list cannot hold more chunks than fit in virtual memory");
    }

    /// Unlinks every chunk that belongs to a segment matching `predicate`, keeping the relative
    /// order of the rest. Returns the number of chunks removed.
    pub(crate) fn excise(
        &mut self,
        segments: &mut SegmentTable,
        mut predicate: impl FnMut(SegmentIndex) -> bool,
    ) -> usize {
        let mut removed: usize = 0;
        let mut previous: Option<ChunkCoordinates> = None;
        let mut current = self.head;

        while let Some(chunk) = current {
            let next = segments.header(chunk).next();

            if predicate(chunk.segment()) {
                match previous {
                    Some(previous) => segments.header_mut(previous).set_next(next),
                    None => self.head = next.get(),
                }

                // Cannot overflow because we count distinct chunks of the list.
                removed = removed.wrapping_add(1);
            } else {
                previous = Some(chunk);
            }

            current = next.get();
        }

        // The last kept chunk is the new tail.
        self.tail = previous;

        if let Some(tail) = self.tail {
            segments.header_mut(tail).set_next(FreeLink::END);
        }

        // Cannot underflow because we only counted chunks that were on the list.
        self.len = self.len.wrapping_sub(removed);

        removed
    }

    /// Walks the list from head to tail.
    #[cfg(test)]
    pub(crate) fn iter<'a>(&self, segments: &'a SegmentTable) -> FreeListIter<'a> {
        FreeListIter {
            segments,
            current: self.head,
        }
    }
}

/// Iterator over the chunks of a [`FreeList`], from head to tail.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct FreeListIter<'a> {
    segments: &'a SegmentTable,
    current: Option<ChunkCoordinates>,
}

#[cfg(test)]
impl Iterator for FreeListIter<'_> {
    type Item = ChunkCoordinates;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.current?;
        self.current = self.segments.header(chunk).next().get();
        Some(chunk)
    }
}
