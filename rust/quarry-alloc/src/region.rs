use std::alloc::Layout;
use std::ptr::NonNull;

/// A fixed-size, aligned and zero-initialised backing region, allocated once and
/// released on drop.
///
/// Storage types carve their allocations out of a region. Since the region lives
/// on the heap, addresses handed out from it stay valid when the storage object
/// itself is moved.
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

unsafe impl Send for Region {}

impl Region {
    /// Allocates a region of `len` bytes aligned to `alignment`.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two or the size overflows.
    pub fn new(len: usize, alignment: usize) -> Region {
        let layout = Layout::from_size_align(len.max(1), alignment).expect("region layout");
        // SAFETY: the layout is never zero sized.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            std::alloc::handle_alloc_error(layout);
        };
        Region { ptr, len, layout }
    }

    /// Returns the first byte of the region.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the usable size of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the byte offset of `ptr` from the start of the region, or `None`
    /// if it lies outside.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.ptr.as_ptr() as usize);
        (offset < self.len).then_some(offset)
    }

    /// Returns `true` if `ptr` points into the region.
    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr).is_some()
    }

    /// Returns the address at `offset` bytes into the region.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is beyond the end of the region.
    #[inline]
    pub fn at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len, "offset {offset} beyond region of {}", self.len);
        // SAFETY: within (or one past the end of) the allocation.
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.ptr)
            .field("len", &self.len)
            .field("alignment", &self.layout.align())
            .finish()
    }
}
