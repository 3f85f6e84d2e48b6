use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::io;
use std::ptr::NonNull;

use crate::pal::Bindings;

/// The page size we pretend to have when there is no operating system to ask.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Fallback bindings for targets without `mmap()` and for Miri, which cannot execute it.
///
/// "Mappings" are page-aligned zeroed blocks from the global allocator. This keeps the pool
/// usable everywhere, though memory returned via [`Bindings::unmap()`] goes back to the
/// allocator rather than directly to the operating system.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

/// Singleton instance of `BuildTargetBindings`, used by the pool to hook up to the correct
/// PAL implementation.
pub(crate) static BUILD_TARGET_BINDINGS: BuildTargetBindings = BuildTargetBindings;

fn mapping_layout(len: usize) -> Result<Layout, io::Error> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot map a zero-sized region",
        ));
    }

    Layout::from_size_align(len, FALLBACK_PAGE_SIZE).map_err(io::Error::other)
}

impl Bindings for BuildTargetBindings {
    fn page_size(&self) -> usize {
        FALLBACK_PAGE_SIZE
    }

    fn map_anonymous(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        let layout = mapping_layout(len)?;

        // SAFETY: The layout has a non-zero size, as checked by mapping_layout().
        let ptr = unsafe { alloc_zeroed(layout) };

        NonNull::new(ptr).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
    }

    fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        let layout = mapping_layout(len)?;

        // SAFETY: The trait contract requires the region to come from map_anonymous() with the
        // same length, so it was allocated with this exact layout and is not yet deallocated.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_zeroed_and_page_aligned() {
        let bindings = BuildTargetBindings;
        let len = bindings.page_size() * 2;

        let ptr = bindings.map_anonymous(len).unwrap();
        assert_eq!(ptr.as_ptr().addr() % bindings.page_size(), 0);

        // SAFETY: We just mapped `len` bytes at this address and nothing else refers to them.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
        assert!(bytes.iter().all(|&b| b == 0));

        bindings.unmap(ptr, len).unwrap();
    }

    #[test]
    fn zero_length_mapping_is_error() {
        let bindings = BuildTargetBindings;

        let error = bindings.map_anonymous(0).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }
}
