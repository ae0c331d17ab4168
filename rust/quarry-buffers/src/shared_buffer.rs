use std::marker::PhantomData;
use std::ops::{Range, RangeBounds};
use std::ptr::NonNull;

use quarry_common::{Error, Result};

use crate::control::{Control, ControlBlock};

/// `SharedBuffer` is a contiguous range of elements with shared ownership of the
/// memory backing it.
///
/// Cloning and slicing never copy elements: every clone and every sub-range
/// produced by [`SharedBuffer::first`] or [`SharedBuffer::slice`] refers to the
/// same storage and holds one ownership on the same control block. The storage
/// is released when the last of them is dropped.
///
/// Writes made through one handle are visible through all the others, since they
/// alias the same elements. The element data itself is not synchronised: only
/// the ownership count is safe to manipulate concurrently. Safe mutable access is
/// therefore limited to [`SharedBuffer::get_mut`], which requires the handle to
/// be the only owner of its control block.
pub struct SharedBuffer<T> {
    ptr: NonNull<T>,
    len: usize,
    owner: Option<Control>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for SharedBuffer<T> {}

unsafe impl<T: Send + Sync> Sync for SharedBuffer<T> {}

impl<T> SharedBuffer<T> {
    /// Creates a new empty buffer without any control block.
    pub const fn new() -> SharedBuffer<T> {
        SharedBuffer {
            ptr: NonNull::dangling(),
            len: 0,
            owner: None,
            _marker: PhantomData,
        }
    }

    /// Creates a buffer of `count` copies of `fill`.
    pub fn allocate(count: usize, fill: T) -> SharedBuffer<T>
    where
        T: Clone,
    {
        Self::wrap(vec![fill; count])
    }

    /// Creates a buffer of `count` default values.
    pub fn allocate_default(count: usize) -> SharedBuffer<T>
    where
        T: Default,
    {
        Self::wrap(std::iter::repeat_with(T::default).take(count).collect())
    }

    /// Adopts the vector's elements without copying them.
    pub fn wrap(vec: Vec<T>) -> SharedBuffer<T> {
        Self::wrap_vec(vec).0
    }

    /// Creates a new buffer containing a copy of the provided slice.
    pub fn copy_from_slice(data: &[T]) -> SharedBuffer<T>
    where
        T: Clone,
    {
        Self::wrap(data.to_vec())
    }

    /// Returns the number of elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the control block that keeps the buffer's memory alive, if any.
    #[inline]
    pub fn control_block(&self) -> Option<NonNull<ControlBlock>> {
        self.owner.as_ref().map(Control::as_ptr)
    }

    /// Returns a reference to the buffer contents as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Returns a raw pointer to the first element.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Bounds-checked element access.
    pub fn at(&self, index: usize) -> Result<&T> {
        self.as_slice()
            .get(index)
            .ok_or_else(|| Error::buffer_overrun(index, self.len))
    }

    /// Returns a mutable slice over the buffer when this handle is the only owner
    /// of the control block, or `None` while the storage is shared.
    pub fn get_mut(&mut self) -> Option<&mut [T]> {
        match &self.owner {
            Some(owner) if owner.ownership_count() != 1 => None,
            _ => Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }),
        }
    }

    /// Returns a mutable slice over the shared storage, regardless of how many
    /// handles share it.
    ///
    /// # Safety
    ///
    /// For as long as the returned slice is alive, no other reference to any of
    /// its elements may be used, through this or any other handle sharing the
    /// same control block (including handles on other threads).
    #[inline]
    pub unsafe fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Returns a buffer over the first `count` elements that shares this
    /// buffer's control block. `self` is not modified.
    ///
    /// # Panics
    ///
    /// Panics if `count` is greater than the buffer's length.
    pub fn first(&self, count: usize) -> SharedBuffer<T> {
        self.slice(..count)
    }

    /// Creates a new buffer representing a subrange of this buffer.
    ///
    /// The returned buffer shares ownership of the underlying memory with the
    /// original buffer.
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - The start index is greater than the end index
    /// - The end index is greater than the buffer's length
    /// - Either index arithmetic overflows
    pub fn slice(&self, range: impl RangeBounds<usize>) -> SharedBuffer<T> {
        let range = self.verify_range(range);
        self.make_slice(range)
    }

    /// Splits off the first `count` elements into a new buffer sharing the same
    /// control block, and advances `self` past them.
    ///
    /// # Panics
    ///
    /// Panics if `count` is greater than the buffer's length.
    pub fn consume_first(&mut self, count: usize) -> SharedBuffer<T> {
        let consumed = self.first(count);
        // SAFETY: `count <= len` was verified by `first`.
        self.ptr = unsafe { self.ptr.add(count) };
        self.len -= count;
        consumed
    }

    /// Leaves an empty buffer in place of `self` and returns the previous
    /// contents, without touching the ownership count.
    pub fn take(&mut self) -> SharedBuffer<T> {
        std::mem::take(self)
    }

    /// Returns a read-only view of the buffer that is bounded by this buffer's
    /// lifetime.
    pub fn view(&self) -> SharedBufferView<'_, T> {
        SharedBufferView::from(self)
    }

    /// Returns an iterator over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }
}

impl<T> SharedBuffer<T> {
    /// Wraps the vector and also returns the location of the vector inside its
    /// control block. The pointer stays valid while the block is alive.
    pub(crate) fn wrap_vec(vec: Vec<T>) -> (SharedBuffer<T>, NonNull<Vec<T>>) {
        let (owner, mut pvec) = Control::wrap(vec);
        // SAFETY: the vector is alive in the block we just created.
        let vec = unsafe { pvec.as_mut() };
        let buffer = SharedBuffer {
            ptr: NonNull::from(vec.as_mut_slice()).cast(),
            len: vec.len(),
            owner: Some(owner),
            _marker: PhantomData,
        };
        (buffer, pvec)
    }

    /// Assembles a buffer from its parts.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + len` must be initialised elements kept alive by `owner`.
    pub(crate) unsafe fn from_parts(
        owner: Option<Control>,
        ptr: NonNull<T>,
        len: usize,
    ) -> SharedBuffer<T> {
        SharedBuffer {
            ptr,
            len,
            owner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    pub(crate) fn owner(&self) -> Option<&Control> {
        self.owner.as_ref()
    }

    /// Verifies that the given range is valid for this buffer.
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - The start index is greater than the end index
    /// - The end index is greater than the buffer's length
    /// - Index calculation results in arithmetic overflow
    fn verify_range(&self, range: impl RangeBounds<usize>) -> Range<usize> {
        use core::ops::Bound;

        let len = self.len();

        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n.checked_add(1).expect("out of range"),
            Bound::Unbounded => 0,
        };

        let end = match range.end_bound() {
            Bound::Included(&n) => n.checked_add(1).expect("out of range"),
            Bound::Excluded(&n) => n,
            Bound::Unbounded => len,
        };

        assert!(
            start <= end,
            "range start must not be greater than end: {start:?} <= {end:?}",
        );
        assert!(end <= len, "range end out of bounds: {end:?} <= {len:?}");

        start..end
    }

    fn make_slice(&self, range: Range<usize>) -> SharedBuffer<T> {
        SharedBuffer {
            ptr: unsafe { self.ptr.add(range.start) },
            len: range.end - range.start,
            owner: self.owner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        SharedBuffer {
            ptr: self.ptr,
            len: self.len,
            owner: self.owner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SharedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Deref for SharedBuffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T> AsRef<[T]> for SharedBuffer<T> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> From<Vec<T>> for SharedBuffer<T> {
    fn from(vec: Vec<T>) -> Self {
        SharedBuffer::wrap(vec)
    }
}

impl<'a, T> IntoIterator for &'a SharedBuffer<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: PartialEq> PartialEq for SharedBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: PartialEq> PartialEq<[T]> for SharedBuffer<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.as_slice() == other
    }
}

impl<T: Eq> Eq for SharedBuffer<T> {}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_slice().fmt(f)
    }
}

/// A read-only view onto a [`SharedBuffer`].
///
/// The view does not hold an ownership on the control block. It borrows the
/// buffer it was created from, so it can never outlive that buffer. Use
/// [`SharedBufferView::to_shared`] to turn it back into an owning buffer.
pub struct SharedBufferView<'a, T> {
    ptr: NonNull<T>,
    len: usize,
    owner: Option<&'a Control>,
    _marker: PhantomData<&'a [T]>,
}

impl<'a, T> SharedBufferView<'a, T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn control_block(&self) -> Option<NonNull<ControlBlock>> {
        self.owner.map(Control::as_ptr)
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Creates an owning buffer over the viewed range, taking a new ownership on
    /// the control block.
    pub fn to_shared(&self) -> SharedBuffer<T> {
        SharedBuffer {
            ptr: self.ptr,
            len: self.len,
            owner: self.owner.cloned(),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for SharedBufferView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SharedBufferView<'_, T> {}

impl<'a, T> From<&'a SharedBuffer<T>> for SharedBufferView<'a, T> {
    fn from(buffer: &'a SharedBuffer<T>) -> Self {
        SharedBufferView {
            ptr: buffer.ptr,
            len: buffer.len,
            owner: buffer.owner.as_ref(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::ops::Deref for SharedBufferView<'_, T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedBufferView<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_slice().fmt(f)
    }
}
