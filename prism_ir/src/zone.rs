//! Compilation-unit memory zone.
//!
//! Every graph of a compilation unit draws its operation storage from one
//! [`Zone`]. Allocations are bump-pointer cheap and are never freed
//! individually: storage abandoned by arena growth stays in the zone until
//! the zone itself is dropped at the end of the compilation unit.

use bumpalo::Bump;

/// Bump allocator shared by a graph and its companion.
#[derive(Debug, Default)]
pub struct Zone {
    bump: Bump,
}

impl Zone {
    /// Create an empty zone.
    pub fn new() -> Self {
        Zone { bump: Bump::new() }
    }

    /// Create a zone with `bytes` of memory reserved up front.
    pub fn with_capacity(bytes: usize) -> Self {
        Zone {
            bump: Bump::with_capacity(bytes),
        }
    }

    /// Allocate a slice of `len` copies of `value`.
    #[inline]
    pub fn alloc_slice<T: Copy>(&self, len: usize, value: T) -> &mut [T] {
        self.bump.alloc_slice_fill_copy(len, value)
    }

    /// Total bytes held by the zone, including memory abandoned by growth.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}
