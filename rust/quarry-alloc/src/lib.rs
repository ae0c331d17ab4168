//! Allocation strategies over fixed regions and a pluggable backing resource.
//!
//! - [`StackStorage`]: best-fit with coalescing and bounded bookkeeping.
//! - [`SlabStorage`]: a bump allocator reclaimed all at once.
//! - [`BitmapStorage`]: fixed-size blocks tracked by an integer bitmask.
//! - [`FixedPool`]: recycles fixed-size blocks from a [`MemoryResource`].
//!
//! None of these lock: they are single-threaded objects driven through
//! `&mut self`.

pub mod bitmap;
pub mod pool;
pub mod region;
pub mod resource;
pub mod slab;
pub mod stack;

pub use bitmap::{BitMask, BitmapStorage};
pub use pool::FixedPool;
pub use region::Region;
pub use resource::{GlobalResource, MemoryResource};
pub use slab::SlabStorage;
pub use stack::{Span, StackStorage};

#[cfg(test)]
mod tests;
