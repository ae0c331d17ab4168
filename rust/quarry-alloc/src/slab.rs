use std::ptr::NonNull;

use quarry_common::sizes::aligned_offset;
use quarry_common::{Error, Result};

use crate::region::Region;

/// A bump allocator over a fixed region of `S` bytes.
///
/// Requests are rounded up to a multiple of `CA` and handed out in order.
/// Individual deallocations are ignored; [`reset`](SlabStorage::reset)
/// reclaims the whole region at once.
pub struct SlabStorage<const S: usize = 16384, const CA: usize = 16> {
    region: Region,
    allocated_bytes: usize,
}

impl<const S: usize, const CA: usize> SlabStorage<S, CA> {
    pub const STORAGE_BYTES: usize = S;
    pub const ALIGNMENT_SIZE: usize = CA;

    pub fn new() -> SlabStorage<S, CA> {
        const {
            assert!(CA.is_power_of_two(), "alignment must be a power of two");
        }
        SlabStorage {
            region: Region::new(S, CA),
            allocated_bytes: 0,
        }
    }

    /// Returns the next `bytes` bytes of the region, rounded up to `CA`.
    ///
    /// # Errors
    ///
    /// `MemoryExhausted` if fewer than the rounded request bytes remain.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        let rounded = bytes
            .checked_next_multiple_of(CA)
            .ok_or_else(|| Error::memory_exhausted(bytes, self.free()))?;
        if self.free() < rounded {
            return Err(Error::memory_exhausted(rounded, self.free()));
        }
        let ptr = self.region.at(self.allocated_bytes);
        self.allocated_bytes += rounded;
        debug_assert_eq!(self.allocated_bytes, aligned_offset(self.allocated_bytes, CA));
        Ok(ptr)
    }

    /// Does nothing: slab memory is only reclaimed by [`reset`](Self::reset).
    #[inline]
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.region.contains(ptr) || self.region.is_empty());
    }

    /// Forgets every allocation. Pointers handed out earlier must no longer be
    /// used.
    pub fn reset(&mut self) {
        log::trace!("slab reset after {} bytes", self.allocated_bytes);
        self.allocated_bytes = 0;
    }

    /// Returns the number of bytes not yet handed out.
    #[inline]
    pub fn free(&self) -> usize {
        S - self.allocated_bytes
    }

    /// Returns `true` if `ptr` points into the backing region.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.region.contains(ptr)
    }
}

impl<const S: usize, const CA: usize> Default for SlabStorage<S, CA> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const S: usize, const CA: usize> std::fmt::Debug for SlabStorage<S, CA> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabStorage")
            .field("region", &self.region)
            .field("allocated_bytes", &self.allocated_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use quarry_common::ErrorKind;

    use super::*;

    #[test]
    fn test_slab_allocation() {
        let mut slab = SlabStorage::<1024, 8>::new();
        assert_eq!(slab.free(), 1024);

        let a = slab.allocate(1).unwrap();
        assert_eq!(slab.free(), 1016);
        let b = slab.allocate(8).unwrap();
        assert_eq!(slab.free(), 1008);
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 8);

        slab.deallocate(a);
        assert_eq!(slab.free(), 1008);

        let e = slab.allocate(1009).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::MemoryExhausted { .. }));
        assert!(slab.allocate(1008).is_ok());
        assert_eq!(slab.free(), 0);
        assert!(slab.allocate(1).is_err());
    }

    #[test]
    fn test_reset_reuses_region() {
        let mut slab = SlabStorage::<256, 16>::new();
        let first = slab.allocate(100).unwrap();
        slab.allocate(100).unwrap();
        assert_eq!(slab.free(), 256 - 224);
        slab.reset();
        assert_eq!(slab.free(), 256);
        assert_eq!(slab.allocate(10).unwrap(), first);
    }

    #[test]
    fn test_rounding_overflow() {
        let mut slab = SlabStorage::<64, 16>::new();
        assert!(slab.allocate(usize::MAX).is_err());
        assert_eq!(slab.free(), 64);
    }
}
