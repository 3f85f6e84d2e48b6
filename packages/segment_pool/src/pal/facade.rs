use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockBindings;
#[cfg(test)]
use crate::pal::fallback::{
    BUILD_TARGET_BINDINGS as FALLBACK_BINDINGS, BuildTargetBindings as FallbackBindings,
};
use crate::pal::{BUILD_TARGET_BINDINGS, Bindings, BuildTargetBindings};

/// Enum to hide the real/fallback/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(test)]
    Fallback(&'static FallbackBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_BINDINGS)
    }

    #[cfg(test)]
    pub(crate) const fn fallback() -> Self {
        Self::Fallback(&FALLBACK_BINDINGS)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    fn page_size(&self) -> usize {
        match self {
            Self::Target(bindings) => bindings.page_size(),
            #[cfg(test)]
            Self::Fallback(bindings) => bindings.page_size(),
            #[cfg(test)]
            Self::Mock(mock) => mock.page_size(),
        }
    }

    fn map_anonymous(&self, len: usize) -> Result<NonNull<u8>, io::Error> {
        match self {
            Self::Target(bindings) => bindings.map_anonymous(len),
            #[cfg(test)]
            Self::Fallback(bindings) => bindings.map_anonymous(len),
            #[cfg(test)]
            Self::Mock(mock) => mock.map_anonymous(len),
        }
    }

    fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), io::Error> {
        match self {
            Self::Target(bindings) => bindings.unmap(ptr, len),
            #[cfg(test)]
            Self::Fallback(bindings) => bindings.unmap(ptr, len),
            #[cfg(test)]
            Self::Mock(mock) => mock.unmap(ptr, len),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Fallback(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
