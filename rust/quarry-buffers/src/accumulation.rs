use std::ptr::NonNull;

use quarry_common::{Error, Result};

use crate::shared_buffer::SharedBuffer;

/// A buffer into which data is accumulated at the end and consumed from the
/// front.
///
/// The buffer keeps an "occupied" window over a shared backing allocation. New
/// elements are appended with [`AccumulationBuffer::ensure_length`], in place
/// while the backing allocation has spare capacity, and complete leading
/// records are handed off with [`AccumulationBuffer::first`] as independently
/// owned [`SharedBuffer`]s, without copying.
///
/// The occupied window is reachable only through the accumulation buffer, which
/// is why it is not `Clone`: split-off buffers never overlap the window, so the
/// window can be mutated freely through `&mut self`.
pub struct AccumulationBuffer<T> {
    /// Keeps the current backing allocation alive.
    buffer: SharedBuffer<T>,
    /// Start of the occupied window.
    occupied: NonNull<T>,
    /// Length of the occupied window.
    len: usize,
    /// The vector that owns the backing allocation, living inside the control
    /// block. The occupied window always ends at the vector's end.
    backing: Option<NonNull<Vec<T>>>,
    /// Lower bound for the capacity of fresh backing allocations.
    min_buffer: usize,
}

unsafe impl<T: Send + Sync> Send for AccumulationBuffer<T> {}

unsafe impl<T: Send + Sync> Sync for AccumulationBuffer<T> {}

impl<T> AccumulationBuffer<T> {
    pub const DEFAULT_MIN_BUFFER: usize = 128;

    /// Creates an empty buffer with the default `min_buffer` of 128 elements.
    pub fn new() -> AccumulationBuffer<T> {
        Self::with_min_buffer(Self::DEFAULT_MIN_BUFFER)
    }

    /// Creates an empty buffer whose fresh allocations hold at least
    /// `min_buffer` elements beyond the data they copy.
    pub fn with_min_buffer(min_buffer: usize) -> AccumulationBuffer<T> {
        AccumulationBuffer {
            buffer: SharedBuffer::new(),
            occupied: NonNull::dangling(),
            len: 0,
            backing: None,
            min_buffer,
        }
    }

    /// Returns the number of elements in the occupied window.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn min_buffer(&self) -> usize {
        self.min_buffer
    }

    /// Returns how many elements the occupied window can hold before the next
    /// growth needs a fresh backing allocation.
    pub fn capacity(&self) -> usize {
        match self.backing {
            // SAFETY: the backing vector is owned by `self.buffer`'s block.
            Some(backing) => {
                let backing = unsafe { backing.as_ref() };
                backing.capacity() - (backing.len() - self.len)
            }
            None => self.len,
        }
    }

    /// Makes the occupied window at least `count` elements long, appending
    /// copies of `fill` at the end.
    ///
    /// The elements are appended in place when the backing allocation has room
    /// for them; existing elements keep their addresses. Otherwise a new backing
    /// allocation of `max(count, min_buffer) + len()` elements is made, the
    /// occupied elements are copied over and the buffer moves to it. Buffers
    /// already split off keep the old allocation alive.
    pub fn ensure_length(&mut self, count: usize, fill: T)
    where
        T: Clone,
    {
        if self.len >= count {
            return;
        }
        let needed = count - self.len;

        if let Some(mut backing) = self.backing {
            // SAFETY: the vector is alive inside `self.buffer`'s block, and no
            // reference to its spare capacity exists anywhere else.
            let backing = unsafe { backing.as_mut() };
            if backing.capacity() - backing.len() >= needed {
                backing.resize(backing.len() + needed, fill);
                self.len = count;
                return;
            }
        }

        let capacity = count.max(self.min_buffer) + self.len;
        log::debug!(
            "accumulation buffer reallocating: {} occupied, {} requested, capacity {}",
            self.len,
            count,
            capacity
        );
        let mut vec = Vec::with_capacity(capacity);
        vec.extend_from_slice(self.as_slice());
        vec.resize(count, fill);
        let (buffer, backing) = SharedBuffer::wrap_vec(vec);
        self.occupied = buffer.as_non_null();
        self.len = count;
        self.buffer = buffer;
        self.backing = Some(backing);
    }

    /// Splits the first `count` elements off the occupied window as an
    /// independently owned buffer that shares the backing allocation, and
    /// advances the window past them.
    pub fn first(&mut self, count: usize) -> Result<SharedBuffer<T>> {
        if count > self.len {
            return Err(Error::buffer_overrun(count, self.len));
        }
        // SAFETY: the split range lies within the occupied window, which the
        // backing allocation's control block keeps alive.
        let part = unsafe {
            SharedBuffer::from_parts(self.buffer.owner().cloned(), self.occupied, count)
        };
        self.occupied = unsafe { self.occupied.add(count) };
        self.len -= count;
        Ok(part)
    }

    /// Returns the occupied window.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.occupied.as_ptr(), self.len) }
    }

    /// Returns the occupied window for writing.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.occupied.as_ptr(), self.len) }
    }

    /// Bounds-checked access into the occupied window.
    pub fn at(&self, index: usize) -> Result<&T> {
        let len = self.len;
        self.as_slice()
            .get(index)
            .ok_or_else(|| Error::buffer_overrun(index, len))
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.len;
        self.as_mut_slice()
            .get_mut(index)
            .ok_or_else(|| Error::buffer_overrun(index, len))
    }
}

impl<T> Default for AccumulationBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Deref for AccumulationBuffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T> std::ops::DerefMut for AccumulationBuffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AccumulationBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulationBuffer")
            .field("occupied", &self.as_slice())
            .field("capacity", &self.capacity())
            .field("min_buffer", &self.min_buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use quarry_common::ErrorKind;

    use super::*;

    #[test]
    fn test_empty() {
        let acc = AccumulationBuffer::<u8>::new();
        assert!(acc.is_empty());
        assert_eq!(acc.len(), 0);
        assert_eq!(acc.capacity(), 0);
        assert_eq!(acc.min_buffer(), 128);
    }

    #[test]
    fn test_first_allocation_honours_min_buffer() {
        let mut acc = AccumulationBuffer::<u8>::with_min_buffer(64);
        acc.ensure_length(10, 0);
        assert_eq!(acc.len(), 10);
        assert!(acc.capacity() >= 64);
        assert!(acc.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ensure_length_is_noop_when_long_enough() {
        let mut acc = AccumulationBuffer::<u8>::new();
        acc.ensure_length(10, 1);
        acc.ensure_length(5, 2);
        assert_eq!(acc.len(), 10);
        assert!(acc.iter().all(|&b| b == 1));
    }

    #[test]
    fn test_growth_in_place_keeps_addresses() {
        let mut acc = AccumulationBuffer::<u32>::with_min_buffer(100);
        acc.ensure_length(4, 0);
        acc.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        let data = acc.as_ptr();
        acc.ensure_length(50, 9);
        assert_eq!(acc.as_ptr(), data);
        assert_eq!(&acc[..4], &[1, 2, 3, 4]);
        assert!(acc[4..].iter().all(|&v| v == 9));
    }

    #[test]
    fn test_growth_beyond_capacity_copies() {
        let mut acc = AccumulationBuffer::<u32>::with_min_buffer(8);
        acc.ensure_length(8, 0);
        for (i, v) in acc.iter_mut().enumerate() {
            *v = i as u32;
        }
        let before = acc.capacity();
        acc.ensure_length(before + 1, 7);
        assert!(acc.capacity() >= before);
        assert_eq!(&acc[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(acc[8..].iter().all(|&v| v == 7));
    }

    #[test]
    fn test_first_splits_front() {
        let mut acc = AccumulationBuffer::<u8>::new();
        acc.ensure_length(6, 0);
        acc.as_mut_slice().copy_from_slice(b"abcdef");

        let head = acc.first(2).unwrap();
        assert_eq!(head.as_slice(), b"ab");
        assert_eq!(acc.len(), 4);
        assert_eq!(acc.as_slice(), b"cdef");

        let next = acc.first(4).unwrap();
        assert_eq!(next.as_slice(), b"cdef");
        assert!(acc.is_empty());
        assert_eq!(head.control_block(), next.control_block());
    }

    #[test]
    fn test_first_rejects_overrun() {
        let mut acc = AccumulationBuffer::<u8>::new();
        acc.ensure_length(3, 0);
        let e = acc.first(4).unwrap_err();
        assert!(matches!(
            e.kind(),
            ErrorKind::BufferOverrun { index: 4, len: 3 }
        ));
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn test_split_buffers_survive_reallocation() {
        let mut acc = AccumulationBuffer::<u8>::with_min_buffer(4);
        acc.ensure_length(4, 0);
        acc.as_mut_slice().copy_from_slice(b"wxyz");
        let head = acc.first(2).unwrap();
        let old_block = head.control_block();

        acc.ensure_length(1000, b'.');
        assert_ne!(acc.buffer.control_block(), old_block);
        assert_eq!(&acc[..2], b"yz");
        assert_eq!(head.as_slice(), b"wx");
        drop(acc);
        assert_eq!(head.as_slice(), b"wx");
    }

    #[test]
    fn test_accumulate_and_consume_records() {
        // Three-byte records arrive in uneven chunks and are consumed whole.
        let stream: Vec<u8> = (0..60).collect();
        let mut acc = AccumulationBuffer::<u8>::with_min_buffer(16);
        let mut records = Vec::new();
        for chunk in stream.chunks(7) {
            let start = acc.len();
            acc.ensure_length(start + chunk.len(), 0);
            acc[start..].copy_from_slice(chunk);
            while acc.len() >= 3 {
                let before = acc.len();
                records.push(acc.first(3).unwrap());
                assert_eq!(acc.len(), before - 3);
            }
        }
        assert!(acc.is_empty());
        let joined: Vec<u8> = records.iter().flat_map(|r| r.iter().copied()).collect();
        assert_eq!(joined, stream);
    }

    #[test]
    fn test_capacity_never_shrinks_while_growing() {
        let mut acc = AccumulationBuffer::<u16>::with_min_buffer(4);
        let mut capacity = acc.capacity();
        for n in 1..300 {
            acc.ensure_length(n, 0);
            assert!(acc.capacity() >= capacity);
            capacity = acc.capacity();
            if n % 5 == 0 {
                let _ = acc.first(2).unwrap();
                capacity = acc.capacity();
            }
        }
    }

    #[test]
    fn test_at_and_at_mut() {
        let mut acc = AccumulationBuffer::<i32>::new();
        acc.ensure_length(2, 5);
        *acc.at_mut(1).unwrap() = 6;
        assert_eq!(*acc.at(0).unwrap(), 5);
        assert_eq!(*acc.at(1).unwrap(), 6);
        assert!(acc.at(2).is_err());
        assert!(acc.at_mut(2).is_err());
    }
}
