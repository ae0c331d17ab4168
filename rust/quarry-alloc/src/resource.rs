//! The backing allocator capability consumed by the pool allocators.

use std::alloc::Layout;
use std::ptr::NonNull;

use quarry_common::{Error, Result, verify_arg};

/// An abstract source of raw memory.
///
/// Implementations hand out blocks of at least `bytes` bytes aligned to
/// `alignment`, and take them back with the same size and alignment.
pub trait MemoryResource {
    /// Allocates `bytes` bytes aligned to `alignment`.
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// Returns a block to the resource.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this resource (or one that
    /// [`is_equal`](MemoryResource::is_equal) to it) with the same `bytes` and
    /// `alignment`, and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize);

    /// An address identifying the resource. Two resources with the same
    /// identity can free each other's memory.
    fn identity(&self) -> *const () {
        self as *const Self as *const ()
    }

    /// Returns `true` if memory allocated from `self` can be deallocated
    /// through `other` and vice versa.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        self.identity() == other.identity()
    }
}

impl<R: MemoryResource + ?Sized> MemoryResource for &mut R {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        (**self).allocate(bytes, alignment)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        unsafe { (**self).deallocate(ptr, bytes, alignment) }
    }

    fn identity(&self) -> *const () {
        (**self).identity()
    }
}

/// The process-wide global allocator as a [`MemoryResource`].
///
/// All `GlobalResource` values are interchangeable. Zero-sized requests are
/// served as one byte so that every allocation has a distinct address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalResource;

static GLOBAL_IDENTITY: u8 = 0;

impl GlobalResource {
    fn layout(bytes: usize, alignment: usize) -> Result<Layout> {
        Layout::from_size_align(bytes.max(1), alignment).map_err(|e| {
            Error::invalid_arg("alignment", format!("{alignment} for {bytes} bytes: {e}"))
        })
    }
}

impl MemoryResource for GlobalResource {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        verify_arg!(alignment, alignment.is_power_of_two());
        let layout = Self::layout(bytes, alignment)?;
        // SAFETY: the layout is never zero sized.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| Error::out_of_memory(bytes, alignment))
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        let layout = Layout::from_size_align(bytes.max(1), alignment)
            .expect("layout accepted by allocate");
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }

    fn identity(&self) -> *const () {
        &GLOBAL_IDENTITY as *const u8 as *const ()
    }
}
