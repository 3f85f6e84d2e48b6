use std::io;

use thiserror::Error;

/// The operating system declined to create a memory mapping for a new segment.
#[derive(Debug, Error)]
#[error("failed to map {size} bytes of anonymous memory for a pool segment")]
pub struct MapError {
    size: usize,

    #[source]
    source: io::Error,
}

impl MapError {
    pub(crate) fn new(size: usize, source: io::Error) -> Self {
        Self { size, source }
    }

    /// The size of the mapping that was requested, in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Errors that can occur when allocating a chunk from a [`SegmentPool`][crate::SegmentPool].
///
/// These are recoverable: the caller may free other objects, try again later or abandon the
/// operation that needed the memory. The pool never retries on its own.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocError {
    /// The free list was empty and the pool could not map a new segment to refill it.
    #[error("out of memory: the pool could not grow by another segment")]
    OutOfMemory(#[from] MapError),
}
