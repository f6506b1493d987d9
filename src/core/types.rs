/*!
 * Core Types
 * Common types used across the free-space manager
 */

/// Size in bytes
pub type Size = usize;

/// Heap address, in word granularity
pub type Address = usize;

/// Region index as seen by the host heap
pub type RegionNum = usize;

/// Signed region/bit index used internally by the bitmap and partition table.
///
/// Index arithmetic deliberately uses a signed type: the canonical encoding
/// for an empty partition is `[max_regions, -1]`, reverse scans terminate on
/// `idx < floor` with `floor = -1`, and both would need awkward sentinel
/// juggling with an unsigned type.
pub type Idx = isize;

/// Bytes per heap word
pub const WORD_BYTES: Size = std::mem::size_of::<usize>();

/// Convert a size in words to bytes
#[inline]
pub const fn words_to_bytes(words: Size) -> Size {
    words * WORD_BYTES
}

/// Convert a size in bytes to whole words (truncating)
#[inline]
pub const fn bytes_to_words(bytes: Size) -> Size {
    bytes / WORD_BYTES
}

/// Align `value` down to a multiple of `alignment`
#[inline]
pub const fn align_down(value: Size, alignment: Size) -> Size {
    value - (value % alignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_conversions() {
        assert_eq!(words_to_bytes(8), 8 * WORD_BYTES);
        assert_eq!(bytes_to_words(64), 64 / WORD_BYTES);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(17, 8), 16);
        assert_eq!(align_down(16, 8), 16);
        assert_eq!(align_down(7, 8), 0);
    }
}
