//! Platform Abstraction Layer (PAL). Every request for memory from the operating system goes
//! through here so that the rest of the crate can be tested against mock bindings.

mod bindings;
pub(crate) use bindings::*;

mod facade;
pub(crate) use facade::*;

#[cfg(all(unix, not(miri)))]
mod unix;
#[cfg(all(unix, not(miri)))]
pub(crate) use unix::*;

// The fallback module is compiled in test mode on all platforms, under Miri, and as the primary
// implementation on platforms without `mmap()`. On Unix in test mode it is only reachable via the
// explicit `fallback::` path, to avoid ambiguity with the Unix implementation.
#[cfg(any(test, miri, not(unix)))]
pub(crate) mod fallback;

#[cfg(any(miri, not(unix)))]
pub(crate) use fallback::*;
