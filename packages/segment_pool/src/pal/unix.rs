use std::io;
use std::ptr::{self, NonNull};

use crate::pal::Bindings;

/// Bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in unit tests that need to simulate mapping failures.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

/// Singleton instance of `BuildTargetBindings`, used by the pool to hook up to the correct
/// PAL implementation.
pub(crate) static BUILD_TARGET_BINDINGS: BuildTargetBindings = BuildTargetBindings;

// Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Bindings for BuildTargetBindings {
    fn page_size(&self) -> usize {
        // SAFETY: No safety requirements.
        let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        usize::try_from(result).expect("the operating system must report a positive page size")
    }

    fn map_anonymous(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        // SAFETY: We ask for a fresh mapping at an address of the kernel's choosing, so no memory
        // that is already in use can be affected by this call.
        let result = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };

        if result == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        NonNull::new(result.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap() returned a null pointer"))
    }

    fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        // SAFETY: The trait contract requires the region to be exactly one mapping obtained from
        // map_anonymous() that nobody will access again.
        let result = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
