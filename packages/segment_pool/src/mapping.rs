use std::mem;
use std::ops::Range;
use std::ptr::NonNull;

use tracing::error;

use crate::MapError;
use crate::pal::{Bindings, BindingsFacade};

/// Unique owner of one anonymous memory mapping. The mapping is released when this is dropped.
#[derive(Debug)]
pub(crate) struct Mapping {
    base: NonNull<u8>,
    len: usize,

    /// The bindings that created the mapping; the same bindings must release it.
    bindings: BindingsFacade,
}

impl Mapping {
    /// Maps `len` bytes of zero-initialized memory.
    ///
    /// `len` must be a non-zero multiple of the page size reported by `bindings`.
    pub(crate) fn new(bindings: &BindingsFacade, len: usize) -> Result<Self, MapError> {
        debug_assert!(len > 0, "mappings must not be empty");

        let base = bindings
            .map_anonymous(len)
            .map_err(|source| MapError::new(len, source))?;

        Ok(Self {
            base,
            len,
            bindings: bindings.clone(),
        })
    }

    #[must_use]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// The range of addresses covered by the mapping.
    #[must_use]
    pub(crate) fn address_range(&self) -> Range<usize> {
        let start = self.base.as_ptr().addr();

        // Cannot overflow because the mapping exists in the address space.
        start..start.wrapping_add(self.len)
    }

    /// Gives up ownership without releasing the memory, for when releasing it would
    /// invalidate memory that callers may still be using.
    pub(crate) fn leak(self) {
        mem::forget(self);
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = self.bindings.unmap(self.base, self.len) {
            // Nothing refers to the region anymore, so the only cost is lost address space.
            error!(
                base = ?self.base,
                len = self.len,
                error = %e,
                "failed to release pool segment mapping"
            );
        }
    }
}

// SAFETY: The mapping is plain memory with no thread affinity. Mapping only hands out the base
// address; synchronizing access to the memory is the responsibility of whoever owns the Mapping.
unsafe impl Send for Mapping {}
