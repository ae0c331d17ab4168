//! Shared-ownership buffers for the quarry infrastructure.
//!
//! Everything here is built on [`control::Control`], an atomically
//! reference-counted, type-erased owner of a payload:
//!
//! - [`SharedBuffer`] is a range of elements plus one ownership of the control
//!   block that keeps them alive; cloning and splitting never copy elements.
//! - [`SharedBufferView`] is a borrowed, read-only alias of a `SharedBuffer`.
//! - [`AccumulationBuffer`] grows at the tail and hands off leading records as
//!   `SharedBuffer`s without copying.
//! - [`SharedBytes`] is a `SharedBuffer<u8>` whose data lives in the same
//!   allocation as its control block.
//! - [`HoldingPen`] and [`AtomicPen`] optionally hold a value in uninitialised
//!   storage.
//! - [`StableVector`] grows in fixed-size sections, so its elements never move
//!   when it is appended to.

pub mod accumulation;
pub mod control;
pub mod holding_pen;
pub mod shared_buffer;
pub mod shared_bytes;
pub mod stable_vector;

pub use accumulation::AccumulationBuffer;
pub use control::{Control, ControlBlock};
pub use holding_pen::{AtomicPen, HoldingPen, RawCell};
pub use shared_buffer::{SharedBuffer, SharedBufferView};
pub use shared_bytes::SharedBytes;
pub use stable_vector::StableVector;

#[cfg(test)]
mod tests;
