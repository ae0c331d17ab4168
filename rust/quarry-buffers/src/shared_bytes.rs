//! Raw, aligned shared memory allocated together with its control block.
//!
//! Unlike [`SharedBuffer::wrap`], which adopts a `Vec<T>`, these constructors
//! make a single allocation that holds both the control block header and the
//! (zeroed) data. They are limited to plain-old-data element types, since the
//! data is released without running any element destructors.

use std::ptr::NonNull;

use quarry_common::sizes::MAX_ALIGNMENT;

use crate::control::Control;
use crate::shared_buffer::SharedBuffer;

/// A shared byte buffer.
pub type SharedBytes = SharedBuffer<u8>;

impl<T> SharedBuffer<T>
where
    T: bytemuck::Zeroable + Copy,
{
    /// Allocates `count` zeroed elements, aligned for `T`.
    pub fn zeroed(count: usize) -> SharedBuffer<T> {
        Self::zeroed_aligned(count, std::mem::align_of::<T>())
    }

    /// Allocates `count` zeroed elements with the data start aligned to at
    /// least `alignment` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two or the size overflows.
    pub fn zeroed_aligned(count: usize, alignment: usize) -> SharedBuffer<T> {
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .expect("shared buffer size overflows");
        let alignment = alignment.max(std::mem::align_of::<T>());
        let (owner, data) = Control::allocate(bytes, alignment);
        // SAFETY: the region is zeroed, which is a valid `T`, sized for `count`
        // elements and aligned for `T`; the block keeps it alive.
        unsafe { SharedBuffer::from_parts(Some(owner), data.cast::<T>(), count) }
    }
}

impl SharedBuffer<u8> {
    /// Allocates `len` zeroed bytes with the default alignment of 16.
    pub fn zeroed_bytes(len: usize) -> SharedBytes {
        Self::zeroed_aligned(len, MAX_ALIGNMENT)
    }

    /// Creates a byte buffer holding a copy of `data`, in a single allocation
    /// shared with the control block.
    pub fn copy_bytes(data: &[u8]) -> SharedBytes {
        let mut bytes = Self::zeroed_bytes(data.len());
        if let Some(target) = bytes.get_mut() {
            target.copy_from_slice(data);
        }
        bytes
    }

    /// Returns the bytes reinterpreted as a slice of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not aligned for `T` or its length is not a
    /// multiple of `size_of::<T>()`.
    #[inline]
    pub fn typed_data<T>(&self) -> &[T]
    where
        T: bytemuck::AnyBitPattern,
    {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Returns the location of the first byte.
    #[inline]
    pub fn data(&self) -> NonNull<u8> {
        self.as_non_null()
    }
}

#[cfg(test)]
mod tests {
    use quarry_common::sizes::is_aligned_ptr;

    use super::*;

    #[test]
    fn test_zeroed_bytes() {
        let bytes = SharedBytes::zeroed_bytes(100);
        assert_eq!(bytes.len(), 100);
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(is_aligned_ptr(bytes.as_ptr(), MAX_ALIGNMENT));
        assert!(bytes.control_block().is_some());
    }

    #[test]
    fn test_zeroed_typed() {
        let words = SharedBuffer::<u64>::zeroed_aligned(16, 64);
        assert_eq!(words.len(), 16);
        assert!(is_aligned_ptr(words.as_ptr(), 64));
        assert!(words.iter().all(|&w| w == 0));
    }

    #[test]
    #[should_panic(expected = "shared buffer size overflows")]
    fn test_zeroed_size_overflow() {
        let _ = SharedBuffer::<u64>::zeroed(usize::MAX / 4);
    }

    #[test]
    fn test_copy_bytes_and_typed_view() {
        let source: Vec<u8> = 1u32
            .to_ne_bytes()
            .into_iter()
            .chain(2u32.to_ne_bytes())
            .collect();
        let bytes = SharedBytes::copy_bytes(&source);
        assert_eq!(bytes.as_slice(), source.as_slice());
        assert_eq!(bytes.typed_data::<u32>(), &[1, 2]);
        assert_eq!(bytes.data().as_ptr() as *const u8, bytes.as_ptr());
    }

    #[test]
    fn test_consume_first_shares_block() {
        let mut bytes = SharedBytes::copy_bytes(b"headerpayload");
        let header = bytes.consume_first(6);
        assert_eq!(header.as_slice(), b"header");
        assert_eq!(bytes.as_slice(), b"payload");
        assert_eq!(header.control_block(), bytes.control_block());

        let view = bytes.view();
        let again = view.to_shared();
        drop(bytes);
        drop(header);
        assert_eq!(again.as_slice(), b"payload");
    }
}
