//! A recycling allocator for blocks of one fixed size.

use std::ptr::NonNull;

use quarry_common::sizes::MAX_ALIGNMENT;
use quarry_common::{Error, Result};

use crate::resource::{GlobalResource, MemoryResource};

/// Free-list operations over a bounded list of cached blocks.
pub mod strategy {
    /// Takes the most recently returned block, if any.
    #[inline]
    pub fn allocate<P>(pool: &mut Vec<P>) -> Option<P> {
        pool.pop()
    }

    /// Caches `block` unless the list already holds `max_len` blocks, in which
    /// case the block is handed back.
    #[inline]
    pub fn deallocate<P>(pool: &mut Vec<P>, max_len: usize, block: P) -> Result<(), P> {
        if pool.len() < max_len {
            pool.push(block);
            Ok(())
        } else {
            Err(block)
        }
    }
}

/// Caches blocks of `fixed_size` bytes obtained from a delegate resource.
///
/// Any request of up to `fixed_size` bytes is served by a cached block when one
/// is available, and otherwise by a fresh `fixed_size` block from the delegate.
/// Larger requests go straight to the delegate. Every block is aligned to
/// [`MAX_ALIGNMENT`]; higher alignments are rejected.
pub struct FixedPool<R: MemoryResource = GlobalResource> {
    fixed_size: usize,
    max_pooled: usize,
    pool: Vec<NonNull<u8>>,
    delegate: R,
}

impl FixedPool<GlobalResource> {
    /// Creates a pool over the global allocator.
    pub fn with_global(fixed_size: usize) -> FixedPool<GlobalResource> {
        FixedPool::new(fixed_size, GlobalResource)
    }
}

impl<R: MemoryResource> FixedPool<R> {
    pub fn new(fixed_size: usize, delegate: R) -> FixedPool<R> {
        FixedPool {
            fixed_size,
            max_pooled: usize::MAX,
            pool: Vec::new(),
            delegate,
        }
    }

    /// Limits how many returned blocks are kept. Blocks returned beyond the
    /// limit go back to the delegate.
    pub fn with_max_pooled(mut self, max_pooled: usize) -> FixedPool<R> {
        self.max_pooled = max_pooled;
        self
    }

    #[inline]
    pub fn fixed_size(&self) -> usize {
        self.fixed_size
    }

    /// Returns the number of cached blocks.
    #[inline]
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    pub fn delegate(&self) -> &R {
        &self.delegate
    }

    /// Allocates `bytes` bytes aligned to `alignment`.
    ///
    /// # Errors
    ///
    /// - `Overaligned` if `alignment` is above [`MAX_ALIGNMENT`].
    /// - Whatever the delegate reports when a fresh block is needed.
    pub fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        if alignment > MAX_ALIGNMENT {
            return Err(Error::overaligned(alignment, MAX_ALIGNMENT));
        }
        if bytes <= self.fixed_size
            && let Some(block) = strategy::allocate(&mut self.pool)
        {
            return Ok(block);
        }
        let size = self.fixed_size.max(bytes);
        log::debug!("pool of {} byte blocks delegating {size} bytes", self.fixed_size);
        self.delegate.allocate(size, MAX_ALIGNMENT)
    }

    /// Returns a block of `bytes` bytes to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on this pool with the
    /// same `bytes`, and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize) {
        if bytes <= self.fixed_size {
            if let Err(ptr) = strategy::deallocate(&mut self.pool, self.max_pooled, ptr) {
                unsafe {
                    self.delegate
                        .deallocate(ptr, self.fixed_size, MAX_ALIGNMENT)
                };
            }
        } else {
            unsafe { self.delegate.deallocate(ptr, bytes, MAX_ALIGNMENT) };
        }
    }
}

impl<R: MemoryResource> Drop for FixedPool<R> {
    fn drop(&mut self) {
        for block in self.pool.drain(..) {
            // SAFETY: pooled blocks were obtained from the delegate with this
            // size and alignment.
            unsafe {
                self.delegate
                    .deallocate(block, self.fixed_size, MAX_ALIGNMENT)
            };
        }
    }
}

impl<R: MemoryResource> MemoryResource for FixedPool<R> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        FixedPool::allocate(self, bytes, alignment)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, _alignment: usize) {
        unsafe { FixedPool::deallocate(self, ptr, bytes) }
    }
}

impl<R: MemoryResource + std::fmt::Debug> std::fmt::Debug for FixedPool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedPool")
            .field("fixed_size", &self.fixed_size)
            .field("max_pooled", &self.max_pooled)
            .field("pooled", &self.pool.len())
            .field("delegate", &self.delegate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use quarry_common::ErrorKind;

    use super::*;

    /// Forwards to the global allocator and checks every free against what it
    /// handed out.
    #[derive(Default)]
    struct CountingResource {
        outstanding: HashMap<usize, usize>,
        allocations: usize,
        deallocations: usize,
    }

    impl MemoryResource for CountingResource {
        fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
            let ptr = GlobalResource.allocate(bytes, alignment)?;
            self.outstanding.insert(ptr.as_ptr() as usize, bytes);
            self.allocations += 1;
            Ok(ptr)
        }

        unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
            assert_eq!(self.outstanding.remove(&(ptr.as_ptr() as usize)), Some(bytes));
            self.deallocations += 1;
            unsafe { GlobalResource.deallocate(ptr, bytes, alignment) };
        }
    }

    #[test]
    fn test_small_blocks_are_recycled() {
        let mut pool = FixedPool::with_global(512);
        let a1 = pool.allocate(100, 8).unwrap();
        let a2 = pool.allocate(100, 8).unwrap();
        assert_ne!(a1, a2);
        unsafe {
            pool.deallocate(a1, 100);
            pool.deallocate(a2, 100);
        }
        assert_eq!(pool.pooled(), 2);
        let a3 = pool.allocate(200, 8).unwrap();
        assert_eq!(a3, a2);
        unsafe { pool.deallocate(a3, 200) };
    }

    #[test]
    fn test_large_blocks_bypass_pool() {
        let mut counting = CountingResource::default();
        {
            let mut pool = FixedPool::new(1000, &mut counting);
            let a1 = pool.allocate(2000, 16).unwrap();
            unsafe { pool.deallocate(a1, 2000) };
            assert_eq!(pool.pooled(), 0);
            let a2 = pool.allocate(2000, 16).unwrap();
            assert_eq!(pool.delegate().allocations, 2);
            unsafe { pool.deallocate(a2, 2000) };
        }
        assert_eq!(counting.deallocations, 2);
        assert!(counting.outstanding.is_empty());
    }

    #[test]
    fn test_drop_returns_pooled_blocks() {
        let mut counting = CountingResource::default();
        {
            let mut pool = FixedPool::new(64, &mut counting);
            let blocks: Vec<_> = (0..5).map(|i| pool.allocate(i * 10, 16).unwrap()).collect();
            for (i, block) in blocks.into_iter().enumerate() {
                unsafe { pool.deallocate(block, i * 10) };
            }
            assert_eq!(pool.pooled(), 5);
        }
        assert_eq!(counting.allocations, 5);
        assert_eq!(counting.deallocations, 5);
        assert!(counting.outstanding.is_empty());
    }

    #[test]
    fn test_max_pooled() {
        let mut counting = CountingResource::default();
        {
            let mut pool = FixedPool::new(32, &mut counting).with_max_pooled(2);
            let blocks: Vec<_> = (0..4).map(|_| pool.allocate(32, 16).unwrap()).collect();
            for block in blocks {
                unsafe { pool.deallocate(block, 32) };
            }
            assert_eq!(pool.pooled(), 2);
            assert_eq!(pool.delegate().deallocations, 2);
        }
        assert!(counting.outstanding.is_empty());
    }

    #[test]
    fn test_overaligned() {
        let mut pool = FixedPool::with_global(64);
        let e = pool.allocate(8, 32).unwrap_err();
        assert!(matches!(
            e.kind(),
            ErrorKind::Overaligned {
                alignment: 32,
                max: 16
            }
        ));
        assert!(e.to_string().contains("over-aligned"));
    }

    #[test]
    fn test_stacked_pools() {
        let mut inner = FixedPool::with_global(256);
        let block = {
            let mut outer = FixedPool::new(64, &mut inner);
            let block = outer.allocate(64, 16).unwrap();
            assert!(!outer.is_equal(&GlobalResource));
            block
        };
        // The outer pool asked the inner one for a 64 byte block, which the inner
        // pool served as one of its own fixed-size blocks.
        unsafe { inner.deallocate(block, 64) };
        assert_eq!(inner.pooled(), 1);
        assert!(inner.is_equal(&inner));
    }
}
