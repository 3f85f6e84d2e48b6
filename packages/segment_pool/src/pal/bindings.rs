#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

/// Bindings for the virtual memory calls the pool makes into the operating system.
///
/// All PAL calls must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    /// Size of a virtual memory page, in bytes. Always a power of two.
    fn page_size(&self) -> usize;

    /// Maps `len` bytes of private, anonymous, zero-initialized read/write memory.
    ///
    /// `len` must be a non-zero multiple of [`page_size()`][Self::page_size].
    fn map_anonymous(&self, len: usize) -> Result<NonNull<u8>, io::Error>;

    /// Releases a mapping previously returned by [`map_anonymous()`][Self::map_anonymous].
    ///
    /// `ptr` and `len` must describe exactly one such mapping, which must not be accessed again.
    fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), io::Error>;
}
