/// The largest alignment guaranteed for memory handed out by the general purpose
/// allocation paths (the equivalent of a platform's "max align" type).
pub const MAX_ALIGNMENT: usize = 16;

/// Calculates how much space an object of `size` bytes occupies in a contiguous
/// memory area so that whatever follows it keeps an `align` byte alignment.
///
/// Unlike [`align_up`], `align` does not need to be a power of two.
///
/// # Examples
///
/// ```
/// use quarry_common::sizes::block_size;
///
/// assert_eq!(block_size(8, 8), 8);
/// assert_eq!(block_size(16, 8), 16);
/// assert_eq!(block_size(2, 8), 8);
/// assert_eq!(block_size(10, 8), 16);
/// assert_eq!(block_size(58, 8), 64);
/// assert_eq!(block_size(7, 3), 9);
/// ```
///
/// # Panics
///
/// This function will panic in debug builds if `align` is 0.
#[inline]
pub const fn block_size(size: usize, align: usize) -> usize {
    debug_assert!(align != 0);
    align * size.div_ceil(align)
}

/// Given a base position, calculates the next position at or above it with the
/// requested alignment.
///
/// # Examples
///
/// ```
/// use quarry_common::sizes::aligned_offset;
///
/// assert_eq!(aligned_offset(0, 16), 0);
/// assert_eq!(aligned_offset(1, 16), 16);
/// assert_eq!(aligned_offset(16, 16), 16);
/// assert_eq!(aligned_offset(17, 16), 32);
/// ```
///
/// # Panics
///
/// This function will panic in debug builds if:
/// - `alignment` is 0
/// - `alignment` is not a power of 2
#[inline]
pub const fn aligned_offset(base: usize, alignment: usize) -> usize {
    debug_assert!(alignment != 0);
    debug_assert!(alignment.is_power_of_two());
    (base + alignment - 1) & !(alignment - 1)
}

/// Aligns a number down to the previous multiple of the specified alignment.
///
/// # Examples
///
/// ```
/// use quarry_common::sizes::align_down;
///
/// assert_eq!(align_down(0, 8), 0);
/// assert_eq!(align_down(7, 8), 0);
/// assert_eq!(align_down(9, 8), 8);
/// assert_eq!(align_down(16, 8), 16);
/// ```
///
/// # Panics
///
/// This function will panic in debug builds if:
/// - `alignment` is 0
/// - `alignment` is not a power of 2
#[inline]
pub const fn align_down(n: usize, alignment: usize) -> usize {
    debug_assert!(alignment != 0);
    debug_assert!(alignment.is_power_of_two());
    n & !(alignment - 1)
}

/// Checks if a number is aligned to the specified alignment boundary.
///
/// # Examples
///
/// ```
/// use quarry_common::sizes::is_aligned;
///
/// assert!(is_aligned(0, 8));
/// assert!(!is_aligned(1, 8));
/// assert!(is_aligned(16, 8));
/// ```
///
/// # Panics
///
/// This function will panic in debug builds if:
/// - `alignment` is 0
/// - `alignment` is not a power of 2
#[inline]
pub const fn is_aligned(n: usize, alignment: usize) -> bool {
    debug_assert!(alignment != 0);
    debug_assert!(alignment.is_power_of_two());
    (n & (alignment - 1)) == 0
}

/// Checks whether the pointer is aligned to `alignment`. Non power-of-two
/// alignments are never satisfied.
#[inline]
pub fn is_aligned_ptr<T>(ptr: *const T, alignment: usize) -> bool {
    alignment.is_power_of_two() && ((ptr as usize) & (alignment - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_whole_multiples() {
        assert_eq!(block_size(8, 8), 8);
        assert_eq!(block_size(16, 8), 16);
        assert_eq!(block_size(0, 8), 0);
    }

    #[test]
    fn test_block_size_over_aligned() {
        assert_eq!(block_size(2, 8), 8);
        assert_eq!(block_size(4, 8), 8);
        assert_eq!(block_size(10, 8), 16);
        assert_eq!(block_size(58, 8), 64);
    }

    #[test]
    fn test_aligned_offset_matches_block_size_for_powers_of_two() {
        for align in [1usize, 2, 4, 8, 16, 64] {
            for base in 0..200 {
                assert_eq!(aligned_offset(base, align), block_size(base, align));
                assert!(is_aligned(aligned_offset(base, align), align));
                assert!(align_down(base, align) <= base);
            }
        }
    }

    #[test]
    fn test_is_aligned_ptr() {
        let value = 0u64;
        assert!(is_aligned_ptr(&value as *const u64, 8));
        assert!(!is_aligned_ptr(&value as *const u64, 3));
    }
}
