//! A best-fit allocator over a fixed region with bounded bookkeeping.
//!
//! The region is tracked as two lists of [`Span`]s: live allocations and free
//! ranges. Together they always cover the whole region without overlap, and
//! since freed spans are merged with both neighbours, no two free spans are ever
//! adjacent.

use std::ptr::NonNull;

use quarry_common::{Error, Result};
use tinyvec::ArrayVec;

use crate::region::Region;

/// A contiguous byte range of the region, as an offset from its start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// A fixed region of `S` bytes that serves at most `A` live allocations, each
/// rounded up to a multiple of `CA` bytes and aligned to `CA`.
///
/// Allocation picks the smallest free span that fits (the first one on ties)
/// and carves the request from its front. Deallocation returns the span to the
/// free list, merging it with the free spans on either side.
pub struct StackStorage<const S: usize = 2048, const A: usize = 16, const CA: usize = 16> {
    region: Region,
    allocations: ArrayVec<[Span; A]>,
    available: ArrayVec<[Span; A]>,
}

impl<const S: usize, const A: usize, const CA: usize> StackStorage<S, A, CA> {
    pub const STORAGE_BYTES: usize = S;
    pub const ALLOCATION_COUNT: usize = A;
    pub const ALIGNMENT_SIZE: usize = CA;

    pub fn new() -> StackStorage<S, A, CA> {
        const {
            assert!(A > 0, "at least one allocation slot is required");
            assert!(CA.is_power_of_two(), "alignment must be a power of two");
        }
        let mut available = ArrayVec::new();
        if S > 0 {
            available.push(Span { offset: 0, len: S });
        }
        StackStorage {
            region: Region::new(S, CA),
            allocations: ArrayVec::new(),
            available,
        }
    }

    /// Allocates `bytes` bytes, rounded up to a multiple of `CA`. Zero-sized
    /// requests take one `CA` granule so that every allocation has its own
    /// address.
    ///
    /// # Errors
    ///
    /// - `MemoryExhausted` if fewer than the rounded request bytes are free, or
    ///   the request cannot be rounded without overflowing.
    /// - `MemoryFragmented` if enough bytes are free but no single span fits.
    /// - `BookkeepingExhausted` if a span fits but all `A` slots are in use.
    pub fn allocate(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        let Some(bytes) = bytes.max(1).checked_next_multiple_of(CA) else {
            return Err(Error::memory_exhausted(bytes, self.free()));
        };

        let mut best: Option<usize> = None;
        for (index, span) in self.available.iter().enumerate() {
            if span.len >= bytes && best.is_none_or(|b| span.len < self.available[b].len) {
                best = Some(index);
            }
        }

        let Some(index) = best else {
            let free = self.free();
            log::trace!("stack allocation of {bytes} bytes failed with {free} bytes free");
            return if bytes > free {
                Err(Error::memory_exhausted(bytes, free))
            } else {
                Err(Error::memory_fragmented(bytes, free))
            };
        };

        if self.allocations.len() == self.allocations.capacity() {
            return Err(Error::bookkeeping_exhausted(A));
        }

        let chosen = self.available[index];
        let live = if chosen.len - bytes >= CA {
            self.available[index] = Span {
                offset: chosen.offset + bytes,
                len: chosen.len - bytes,
            };
            Span {
                offset: chosen.offset,
                len: bytes,
            }
        } else {
            self.available.remove(index);
            chosen
        };
        log::trace!(
            "stack carved {} bytes at offset {} from a {} byte span",
            live.len,
            live.offset,
            chosen.len
        );
        self.allocations.push(live);
        Ok(self.region.at(live.offset))
    }

    /// Returns an allocation to the free list.
    ///
    /// # Errors
    ///
    /// - `InvalidFree` if `ptr` is not the start of a live allocation.
    /// - `BookkeepingExhausted` if the free list has no room for the span.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let position = self
            .region
            .offset_of(ptr)
            .and_then(|offset| self.allocations.iter().position(|s| s.offset == offset))
            .ok_or_else(|| Error::invalid_free(ptr.as_ptr()))?;
        let span = self.allocations[position];

        let before = self.available.iter().position(|f| f.end() == span.offset);
        let after = self.available.iter().position(|f| f.offset == span.end());
        match (before, after) {
            (Some(b), Some(a)) => {
                self.available[b].len += span.len + self.available[a].len;
                self.available.remove(a);
            }
            (Some(b), None) => self.available[b].len += span.len,
            (None, Some(a)) => {
                self.available[a].offset = span.offset;
                self.available[a].len += span.len;
            }
            (None, None) => {
                if self.available.try_push(span).is_some() {
                    return Err(Error::bookkeeping_exhausted(A));
                }
            }
        }
        log::trace!(
            "stack released {} bytes at offset {}, {} free spans",
            span.len,
            span.offset,
            self.available.len()
        );
        self.allocations.swap_remove(position);
        Ok(())
    }

    /// Returns the total number of free bytes.
    pub fn free(&self) -> usize {
        self.available.iter().map(|s| s.len).sum()
    }

    /// Returns the current free spans.
    pub fn free_spans(&self) -> &[Span] {
        &self.available
    }

    /// Returns the current live allocations.
    pub fn live_allocations(&self) -> &[Span] {
        &self.allocations
    }

    /// Returns `true` if `ptr` points into the backing region.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.region.contains(ptr)
    }

    /// Returns the start of the backing region.
    pub fn base(&self) -> NonNull<u8> {
        self.region.base()
    }
}

impl<const S: usize, const A: usize, const CA: usize> Default for StackStorage<S, A, CA> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const S: usize, const A: usize, const CA: usize> Drop for StackStorage<S, A, CA> {
    fn drop(&mut self) {
        if !self.allocations.is_empty() {
            log::warn!(
                "stack storage dropped with {} live allocations",
                self.allocations.len()
            );
        }
    }
}

impl<const S: usize, const A: usize, const CA: usize> std::fmt::Debug
    for StackStorage<S, A, CA>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackStorage")
            .field("region", &self.region)
            .field("allocations", &self.live_allocations())
            .field("available", &self.free_spans())
            .finish()
    }
}
