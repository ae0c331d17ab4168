//! Reference-counted, type-erased control blocks.
//!
//! A control block owns a payload (either a value moved into it, or a raw byte
//! region allocated together with the block) and an atomic ownership count that
//! starts at one. When the count drops from one to zero the payload is released
//! through a function pointer that was monomorphised for the payload's concrete
//! type when the block was created, and the block's own storage is freed.
//!
//! The count is the only field ever touched concurrently. Increments and
//! decrements may race freely across threads; everything else in the block is
//! only accessed by the thread that performs the final decrement, after the
//! acquire-release ordering of that decrement has made all prior writes
//! visible.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use quarry_common::sizes::block_size;

use crate::holding_pen::RawCell;

/// Counts above this value are treated as a leak of handles and abort the
/// process rather than risk wrapping around to zero.
const MAX_OWNERSHIP_COUNT: usize = isize::MAX as usize;

/// The header that starts every control block.
///
/// The header is always the first field of a `#[repr(C)]` block structure, so a
/// pointer to the header is also a pointer to the full block, which is what the
/// `release` function receives.
#[repr(C)]
pub struct ControlBlock {
    ownership_count: AtomicUsize,
    release: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock {
    fn new(release: unsafe fn(NonNull<ControlBlock>)) -> ControlBlock {
        ControlBlock {
            ownership_count: AtomicUsize::new(1),
            release,
        }
    }

    /// Returns the current ownership count.
    ///
    /// **Note**: This method is primarily intended for diagnostic purposes. The
    /// returned value may be outdated in a concurrent environment.
    pub fn ownership_count(&self) -> usize {
        self.ownership_count.load(Ordering::Acquire)
    }
}

/// Block holding a value of type `T` moved in at creation.
#[repr(C)]
struct ValueBlock<T> {
    header: ControlBlock,
    item: RawCell<T>,
}

/// Block followed, in the same heap allocation, by a raw data region.
#[repr(C)]
struct RawBlock {
    header: ControlBlock,
    layout: Layout,
}

unsafe fn release_value<T>(block: NonNull<ControlBlock>) {
    // SAFETY: the block was created by `Control::wrap::<T>` from a `Box`, and
    // this is the single release for it.
    unsafe {
        let mut block = Box::from_raw(block.cast::<ValueBlock<T>>().as_ptr());
        block.item.destroy_if(true);
    }
}

unsafe fn release_raw(block: NonNull<ControlBlock>) {
    // SAFETY: the block was created by `Control::allocate`, whose layout was
    // stored in the block header.
    unsafe {
        let raw = block.cast::<RawBlock>().as_ptr();
        let layout = (*raw).layout;
        std::ptr::drop_in_place(raw);
        std::alloc::dealloc(raw as *mut u8, layout);
    }
}

/// Atomically adds one to the ownership count of `block`, returning the same
/// pointer for convenience. A `None` block is passed through untouched.
///
/// # Safety
///
/// `block`, if present, must point to a live control block on which the caller
/// holds (directly or through a handle it is copying) at least one ownership.
#[inline]
pub unsafe fn increment(block: Option<NonNull<ControlBlock>>) -> Option<NonNull<ControlBlock>> {
    if let Some(b) = block {
        // Relaxed is enough: a new ownership can only be created from an
        // existing one, which already keeps the block alive.
        let previous = unsafe { b.as_ref() }
            .ownership_count
            .fetch_add(1, Ordering::Relaxed);
        if previous > MAX_OWNERSHIP_COUNT {
            std::process::abort();
        }
    }
    block
}

/// Atomically subtracts one from the ownership count of the block and clears
/// the caller's pointer. When the count was exactly one before the subtraction
/// the payload is released and the block freed.
///
/// # Safety
///
/// `block`, if present, must point to a live control block and must represent
/// exactly one ownership held by the caller, which is given up by this call.
#[inline]
pub unsafe fn decrement(block: &mut Option<NonNull<ControlBlock>>) {
    let Some(b) = block.take() else {
        return;
    };
    // `fetch_sub` returns the value before the subtraction, so the release is
    // due when it was one.
    if unsafe { b.as_ref() }
        .ownership_count
        .fetch_sub(1, Ordering::AcqRel)
        == 1
    {
        let release = unsafe { b.as_ref() }.release;
        unsafe { release(b) };
    }
}

/// An owning handle to a control block.
///
/// Cloning the handle increments the ownership count and dropping it decrements
/// the count, releasing the payload when the last handle goes away.
///
/// `Control` is type-erased, so it is neither `Send` nor `Sync` by itself; the
/// typed wrappers built on top of it (such as `SharedBuffer<T>`) decide that
/// based on the payload type.
pub struct Control(NonNull<ControlBlock>);

impl Control {
    /// Creates a new control block with an ownership count of one that owns
    /// `value`, returning the handle together with a pointer to the value at
    /// its new location. The pointer stays valid for as long as the block is
    /// alive.
    pub fn wrap<T>(value: T) -> (Control, NonNull<T>) {
        let block = Box::new(ValueBlock {
            header: ControlBlock::new(release_value::<T>),
            item: RawCell::new(),
        });
        let block = NonNull::from(Box::leak(block));
        // SAFETY: the block was just allocated and its cell is empty.
        let item = unsafe { NonNull::from((*block.as_ptr()).item.emplace(value)) };
        (Control(block.cast()), item)
    }

    /// Allocates `bytes` of zeroed memory whose start is aligned to `alignment`,
    /// together with the control block that owns it. The block header and the
    /// data share one heap allocation; the data follows the header at an offset
    /// rounded up to `alignment`.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two or the total size overflows.
    pub fn allocate(bytes: usize, alignment: usize) -> (Control, NonNull<[u8]>) {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        let alignment = alignment.max(std::mem::align_of::<RawBlock>());
        let data_offset = block_size(std::mem::size_of::<RawBlock>(), alignment);
        let layout = Layout::from_size_align(
            data_offset
                .checked_add(bytes)
                .expect("control block size overflows"),
            alignment,
        )
        .expect("control block layout");

        // SAFETY: the layout is never zero sized because it includes the header.
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(base) else {
            std::alloc::handle_alloc_error(layout);
        };
        let block = base.cast::<RawBlock>();
        // SAFETY: `base` is suitably aligned for `RawBlock` and large enough.
        unsafe {
            block.as_ptr().write(RawBlock {
                header: ControlBlock::new(release_raw),
                layout,
            });
        }
        // SAFETY: `data_offset + bytes` is inside the allocation.
        let data = unsafe { base.add(data_offset) };
        (
            Control(block.cast()),
            NonNull::slice_from_raw_parts(data, bytes),
        )
    }

    /// Returns the address of the control block, which identifies it.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<ControlBlock> {
        self.0
    }

    /// Returns the current ownership count of the block.
    ///
    /// **Note**: This method is primarily intended for diagnostic purposes. The
    /// returned value may be outdated in a concurrent environment.
    #[inline]
    pub fn ownership_count(&self) -> usize {
        // SAFETY: the handle keeps the block alive.
        unsafe { self.0.as_ref() }.ownership_count()
    }

    /// Returns `true` if both handles refer to the same control block.
    #[inline]
    pub fn ptr_eq(&self, other: &Control) -> bool {
        self.0 == other.0
    }

    /// Consumes the handle without decrementing, returning the raw block
    /// pointer. The ownership must eventually be given back through
    /// [`Control::from_raw`] or [`decrement`].
    pub fn into_raw(self) -> NonNull<ControlBlock> {
        let block = self.0;
        std::mem::forget(self);
        block
    }

    /// Re-creates a handle from a pointer obtained from [`Control::into_raw`].
    ///
    /// # Safety
    ///
    /// `block` must carry one ownership that is transferred to the new handle.
    pub unsafe fn from_raw(block: NonNull<ControlBlock>) -> Control {
        Control(block)
    }
}

impl Clone for Control {
    fn clone(&self) -> Control {
        // SAFETY: `self` holds one ownership of a live block.
        unsafe { increment(Some(self.0)) };
        Control(self.0)
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        let mut block = Some(self.0);
        // SAFETY: the handle owns exactly one count, given up here.
        unsafe { decrement(&mut block) };
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("block", &self.0)
            .field("ownership_count", &self.ownership_count())
            .finish()
    }
}
