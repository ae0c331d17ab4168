//! Fixed-block allocation tracked by the bits of an unsigned integer.
//!
//! Bit `i` of the mask is set while block `i` is handed out. The free functions
//! implement the strategy over any mask and caller-provided memory;
//! [`BitmapStorage`] pairs a mask with a region of its own.

use std::ptr::NonNull;

use quarry_common::sizes::MAX_ALIGNMENT;
use quarry_common::{Error, Result};

use crate::region::Region;

/// An unsigned integer used as an allocation bitmap.
pub trait BitMask: Copy + Default + Eq + std::fmt::Debug {
    /// Number of blocks the mask tracks.
    const BITS: usize;

    fn is_set(self, bit: usize) -> bool;
    fn set(&mut self, bit: usize);
    fn clear(&mut self, bit: usize);
    /// Number of consecutive set bits starting at bit 0.
    fn trailing_ones(self) -> usize;
    fn count_ones(self) -> usize;
}

macro_rules! impl_bit_mask {
    ($($ty:ty),*) => {
        $(
            impl BitMask for $ty {
                const BITS: usize = <$ty>::BITS as usize;

                #[inline]
                fn is_set(self, bit: usize) -> bool {
                    self & (1 << bit) != 0
                }

                #[inline]
                fn set(&mut self, bit: usize) {
                    *self |= 1 << bit;
                }

                #[inline]
                fn clear(&mut self, bit: usize) {
                    *self &= !(1 << bit);
                }

                #[inline]
                fn trailing_ones(self) -> usize {
                    <$ty>::trailing_ones(self) as usize
                }

                #[inline]
                fn count_ones(self) -> usize {
                    <$ty>::count_ones(self) as usize
                }
            }
        )*
    };
}

impl_bit_mask!(u8, u16, u32, u64, u128, usize);

/// Returns the number of blocks a mask of type `M` tracks.
#[inline]
pub const fn bit_count<M: BitMask>() -> usize {
    M::BITS
}

/// Returns the index of the lowest clear bit, or `bit_count::<M>()` if every
/// bit is set.
#[inline]
pub fn next_bit<M: BitMask>(allocations: M) -> usize {
    allocations.trailing_ones()
}

/// Claims the lowest free block and returns its address, `base` plus
/// `index * block_size`. Returns `None` when every block is taken.
pub fn allocate<M: BitMask>(
    allocations: &mut M,
    base: NonNull<u8>,
    block_size: usize,
) -> Option<NonNull<u8>> {
    let bit = next_bit(*allocations);
    if bit >= M::BITS {
        return None;
    }
    let ptr = NonNull::new(base.as_ptr().wrapping_add(bit * block_size))?;
    allocations.set(bit);
    Some(ptr)
}

/// Releases the block containing `ptr`. Returns `false` if `ptr` lies outside
/// the blocks the mask tracks.
pub fn deallocate<M: BitMask>(
    ptr: NonNull<u8>,
    allocations: &mut M,
    base: NonNull<u8>,
    block_size: usize,
) -> bool {
    let offset = (ptr.as_ptr() as usize).wrapping_sub(base.as_ptr() as usize);
    let bit = offset / block_size;
    if bit < M::BITS {
        allocations.clear(bit);
        true
    } else {
        false
    }
}

/// A region of `bit_count::<M>()` blocks of `BLOCK` bytes each.
pub struct BitmapStorage<M: BitMask = u64, const BLOCK: usize = 64> {
    region: Region,
    allocations: M,
}

impl<M: BitMask, const BLOCK: usize> BitmapStorage<M, BLOCK> {
    pub const BLOCK_SIZE: usize = BLOCK;

    pub fn new() -> BitmapStorage<M, BLOCK> {
        const {
            assert!(BLOCK > 0, "blocks must not be empty");
        }
        BitmapStorage {
            region: Region::new(M::BITS * BLOCK, MAX_ALIGNMENT),
            allocations: M::default(),
        }
    }

    /// Hands out one block for a request of up to `BLOCK` bytes.
    ///
    /// # Errors
    ///
    /// - `BlockTooLarge` if `bytes` exceeds the block size.
    /// - `MemoryExhausted` if every block is in use.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        if bytes > BLOCK {
            return Err(Error::block_too_large(bytes, BLOCK));
        }
        allocate(&mut self.allocations, self.region.base(), BLOCK).ok_or_else(|| {
            log::trace!("bitmap storage full: {:?}", self.allocations);
            Error::memory_exhausted(bytes, 0)
        })
    }

    /// Returns a block.
    ///
    /// # Errors
    ///
    /// `InvalidFree` if `ptr` is not the start of a block currently in use.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let bit = self
            .region
            .offset_of(ptr)
            .filter(|offset| offset % BLOCK == 0)
            .map(|offset| offset / BLOCK)
            .filter(|&bit| self.allocations.is_set(bit))
            .ok_or_else(|| Error::invalid_free(ptr.as_ptr()))?;
        let released = deallocate(ptr, &mut self.allocations, self.region.base(), BLOCK);
        debug_assert!(released && !self.allocations.is_set(bit));
        Ok(())
    }

    /// Returns the number of free bytes.
    pub fn free(&self) -> usize {
        (M::BITS - self.allocations.count_ones()) * BLOCK
    }

    /// Returns the number of blocks in use.
    pub fn allocated_blocks(&self) -> usize {
        self.allocations.count_ones()
    }

    /// Returns the current allocation mask.
    pub fn mask(&self) -> M {
        self.allocations
    }
}

impl<M: BitMask, const BLOCK: usize> Default for BitmapStorage<M, BLOCK> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: BitMask, const BLOCK: usize> Drop for BitmapStorage<M, BLOCK> {
    fn drop(&mut self) {
        let live = self.allocated_blocks();
        if live > 0 {
            log::warn!("bitmap storage dropped with {live} blocks in use");
        }
    }
}

impl<M: BitMask, const BLOCK: usize> std::fmt::Debug for BitmapStorage<M, BLOCK> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapStorage")
            .field("region", &self.region)
            .field("allocations", &self.allocations)
            .finish()
    }
}
