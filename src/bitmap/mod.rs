/*!
 * Compact Bitmap
 *
 * Packed bit array over region indices with bidirectional search for the
 * next/previous set bit and for runs of consecutive set bits. The run search
 * is what makes humongous placement affordable: candidate windows are
 * rejected word-at-a-time, and a rejected window is skipped past the zero
 * that killed it rather than re-probed one bit over.
 */

use crate::core::types::Idx;

/// Bits per bitmap word
const BITS_PER_WORD: usize = usize::BITS as usize;

/// Packed bit array with word-at-a-time search primitives.
///
/// Indices are signed (`Idx`): `-1` doubles as the "not found" floor for
/// reverse searches, and the bit count as the "not found" boundary for
/// forward searches.
pub struct CompactBitmap {
    num_bits: Idx,
    words: Box<[usize]>,
}

impl CompactBitmap {
    pub fn new(num_bits: usize) -> Self {
        let num_words = num_bits.div_ceil(BITS_PER_WORD);
        Self {
            num_bits: num_bits as Idx,
            words: vec![0usize; num_words].into_boxed_slice(),
        }
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Number of tracked bits
    #[inline]
    pub fn size(&self) -> Idx {
        self.num_bits
    }

    /// Word width of the backing array; row granularity for aligned dumps
    #[inline]
    pub fn alignment(&self) -> Idx {
        BITS_PER_WORD as Idx
    }

    /// Round `idx` down to its word boundary
    #[inline]
    pub fn aligned_index(&self, idx: Idx) -> Idx {
        assert!((0..self.num_bits).contains(&idx), "index {idx} out of range");
        idx & !(BITS_PER_WORD as Idx - 1)
    }

    /// Aggregate read of the word holding `idx`, for row-at-a-time dumps
    #[inline]
    pub fn bits_at(&self, idx: Idx) -> usize {
        assert!((0..self.num_bits).contains(&idx), "index {idx} out of range");
        self.words[idx as usize / BITS_PER_WORD]
    }

    #[inline]
    pub fn set(&mut self, idx: Idx) {
        assert!((0..self.num_bits).contains(&idx), "index {idx} out of range");
        self.words[idx as usize / BITS_PER_WORD] |= 1usize << (idx as usize % BITS_PER_WORD);
    }

    #[inline]
    pub fn clear(&mut self, idx: Idx) {
        assert!((0..self.num_bits).contains(&idx), "index {idx} out of range");
        self.words[idx as usize / BITS_PER_WORD] &= !(1usize << (idx as usize % BITS_PER_WORD));
    }

    #[inline]
    pub fn is_set(&self, idx: Idx) -> bool {
        assert!((0..self.num_bits).contains(&idx), "index {idx} out of range");
        self.words[idx as usize / BITS_PER_WORD] & (1usize << (idx as usize % BITS_PER_WORD)) != 0
    }

    /// Smallest set index in `[start, end)`, or `end` if there is none.
    pub fn find_next_set(&self, mut start: Idx, end: Idx) -> Idx {
        debug_assert!(start >= 0 && end <= self.num_bits);
        while start < end {
            let word_idx = start as usize / BITS_PER_WORD;
            let bit = start as usize % BITS_PER_WORD;
            // Mask away bits below the probe position
            let masked = self.words[word_idx] & (usize::MAX << bit);
            if masked != 0 {
                let found = (word_idx * BITS_PER_WORD + masked.trailing_zeros() as usize) as Idx;
                return found.min(end);
            }
            start += (BITS_PER_WORD - bit) as Idx;
        }
        end
    }

    /// Greatest set index in `(floor, last]`, or `floor` if there is none.
    pub fn find_prev_set(&self, mut last: Idx, floor: Idx) -> Idx {
        debug_assert!(last < self.num_bits && floor >= -1);
        while last > floor {
            let word_idx = last as usize / BITS_PER_WORD;
            let bit = last as usize % BITS_PER_WORD;
            // Mask away bits above the probe position
            let masked = self.words[word_idx] & (usize::MAX >> (BITS_PER_WORD - 1 - bit));
            if masked != 0 {
                let top = BITS_PER_WORD - 1 - masked.leading_zeros() as usize;
                let found = (word_idx * BITS_PER_WORD + top) as Idx;
                return found.max(floor);
            }
            last -= (bit + 1) as Idx;
        }
        floor
    }

    /// Smallest `i` in `[start, end - k]` such that bits `[i, i + k)` are all
    /// set, or `end` if there is no such run. `k == 0` always fails.
    pub fn find_next_run(&self, k: usize, mut start: Idx, end: Idx) -> Idx {
        debug_assert!(start >= 0 && end <= self.num_bits);
        if k == 0 {
            return end;
        }
        let last_start = end - k as Idx;
        while start <= last_start {
            let word_idx = start as usize / BITS_PER_WORD;
            let bit = start as usize % BITS_PER_WORD;
            let masked = self.words[word_idx] & (usize::MAX << bit);
            if masked == 0 {
                start += (BITS_PER_WORD - bit) as Idx;
            } else if self.is_forward_consecutive_ones(start, k) {
                return start;
            } else {
                // The window holds at least one zero. Two lower bounds on the
                // next viable start: the next set bit at all, and the start of
                // the trailing ones of the rejected window (any smaller shift
                // keeps the rejecting zero inside the window).
                let next_set = (word_idx * BITS_PER_WORD) as Idx + masked.trailing_zeros() as Idx;
                let tail = self.count_trailing_ones(start + k as Idx - 1) as Idx;
                start = next_set.max(start + k as Idx - tail);
            }
        }
        end
    }

    /// Greatest `i` in `(floor, last - k + 1]` such that bits `[i, i + k)`
    /// are all set, or `floor` if there is no such run. `k == 0` always fails.
    pub fn find_prev_run(&self, k: usize, last: Idx, floor: Idx) -> Idx {
        debug_assert!(last < self.num_bits && floor >= -1);
        if k == 0 {
            return floor;
        }
        // `end` tracks the candidate run's last bit, which must stay above
        // the floor by at least the run length.
        let mut end = last;
        let lowest_end = floor + k as Idx;
        while end >= lowest_end {
            let word_idx = end as usize / BITS_PER_WORD;
            let bit = end as usize % BITS_PER_WORD;
            let masked = self.words[word_idx] & (usize::MAX >> (BITS_PER_WORD - 1 - bit));
            if masked == 0 {
                end -= (bit + 1) as Idx;
            } else if self.is_backward_consecutive_ones(end, k) {
                return end + 1 - k as Idx;
            } else {
                let top = BITS_PER_WORD - 1 - masked.leading_zeros() as usize;
                let prev_set = (word_idx * BITS_PER_WORD + top) as Idx;
                let head = self.count_leading_ones(end - (k as Idx - 1)) as Idx;
                end = prev_set.min(end - (k as Idx - head));
            }
        }
        floor
    }

    /// Count consecutive set bits at `start`, `start + 1`, ...
    fn count_leading_ones(&self, mut start: Idx) -> usize {
        debug_assert!((0..self.num_bits).contains(&start));
        let mut total = 0;
        while start < self.num_bits {
            let word_idx = start as usize / BITS_PER_WORD;
            let bit = start as usize % BITS_PER_WORD;
            let span = BITS_PER_WORD - bit;
            let ones = (self.words[word_idx] >> bit).trailing_ones() as usize;
            if ones < span {
                return total + ones;
            }
            total += span;
            start += span as Idx;
        }
        total
    }

    /// Count consecutive set bits at `last`, `last - 1`, ...
    fn count_trailing_ones(&self, mut last: Idx) -> usize {
        debug_assert!((0..self.num_bits).contains(&last));
        let mut total = 0;
        while last >= 0 {
            let word_idx = last as usize / BITS_PER_WORD;
            let bit = last as usize % BITS_PER_WORD;
            let span = bit + 1;
            let ones = (self.words[word_idx] << (BITS_PER_WORD - 1 - bit)).leading_ones() as usize;
            if ones < span {
                return total + ones;
            }
            total += span;
            last -= span as Idx;
        }
        total
    }

    /// Are bits `[start, start + count)` all set?
    fn is_forward_consecutive_ones(&self, mut start: Idx, mut count: usize) -> bool {
        debug_assert!(start >= 0 && start + count as Idx <= self.num_bits);
        while count > 0 {
            let word_idx = start as usize / BITS_PER_WORD;
            let bit = start as usize % BITS_PER_WORD;
            let span = BITS_PER_WORD - bit;
            let ones = (self.words[word_idx] >> bit).trailing_ones() as usize;
            if ones >= count {
                return true;
            }
            if ones < span {
                return false;
            }
            start += span as Idx;
            count -= span;
        }
        true
    }

    /// Are bits `(last - count, last]` all set?
    fn is_backward_consecutive_ones(&self, mut last: Idx, mut count: usize) -> bool {
        debug_assert!(last < self.num_bits && last - count as Idx >= -1);
        while count > 0 {
            let word_idx = last as usize / BITS_PER_WORD;
            let bit = last as usize % BITS_PER_WORD;
            let span = bit + 1;
            let ones = (self.words[word_idx] << (BITS_PER_WORD - 1 - bit)).leading_ones() as usize;
            if ones >= count {
                return true;
            }
            if ones < span {
                return false;
            }
            last -= span as Idx;
            count -= span;
        }
        true
    }
}
