/*!
 * Region Partitions
 *
 * Tracks which regions belong to the Mutator and Collector partitions, with
 * cached interval bounds and per-partition byte accounting. The bitmaps are
 * authoritative; the `[leftmost, rightmost]` and empty-interval bounds are
 * hints that may be looser than reality but never tighter. Membership changes
 * and capacity/used changes always travel together: there is no primitive
 * that updates one without the other.
 */

use super::types::{PartitionId, NUM_PARTITIONS};
use crate::bitmap::CompactBitmap;
use crate::core::types::{Idx, RegionNum, Size};

/// Two disjoint region partitions with interval hints and byte totals.
///
/// `capacity` and `used` reflect the most recent rebuild plus every
/// allocation since. Retired regions keep contributing to their origin
/// partition's totals until the next rebuild; only their membership bit and
/// region count are dropped.
pub struct RegionPartitions {
    max: Idx,
    region_size_bytes: Size,
    membership: [CompactBitmap; NUM_PARTITIONS],
    leftmosts: [Idx; NUM_PARTITIONS],
    rightmosts: [Idx; NUM_PARTITIONS],
    leftmosts_empty: [Idx; NUM_PARTITIONS],
    rightmosts_empty: [Idx; NUM_PARTITIONS],
    capacity: [Size; NUM_PARTITIONS],
    used: [Size; NUM_PARTITIONS],
    counts: [usize; NUM_PARTITIONS],
}

impl RegionPartitions {
    pub fn new(max_regions: usize, region_size_bytes: Size) -> Self {
        let mut partitions = Self {
            max: max_regions as Idx,
            region_size_bytes,
            membership: [
                CompactBitmap::new(max_regions),
                CompactBitmap::new(max_regions),
            ],
            leftmosts: [0; NUM_PARTITIONS],
            rightmosts: [0; NUM_PARTITIONS],
            leftmosts_empty: [0; NUM_PARTITIONS],
            rightmosts_empty: [0; NUM_PARTITIONS],
            capacity: [0; NUM_PARTITIONS],
            used: [0; NUM_PARTITIONS],
            counts: [0; NUM_PARTITIONS],
        };
        partitions.make_all_regions_unavailable();
        partitions
    }

    /// Remove every region from both partitions and reset all hints and
    /// totals to canonical empty.
    pub fn make_all_regions_unavailable(&mut self) {
        for p in 0..NUM_PARTITIONS {
            self.membership[p].clear_all();
            self.leftmosts[p] = self.max;
            self.rightmosts[p] = -1;
            self.leftmosts_empty[p] = self.max;
            self.rightmosts_empty[p] = -1;
            self.capacity[p] = 0;
            self.used[p] = 0;
            self.counts[p] = 0;
        }
    }

    /// Commit the Mutator totals accumulated during a rebuild scan. The
    /// Collector partition is reset to empty; the reserve is carved out
    /// afterwards by partition-to-partition moves.
    #[allow(clippy::too_many_arguments)]
    pub fn establish_intervals(
        &mut self,
        mutator_leftmost: Idx,
        mutator_rightmost: Idx,
        mutator_leftmost_empty: Idx,
        mutator_rightmost_empty: Idx,
        mutator_count: usize,
        mutator_used: Size,
    ) {
        let m = PartitionId::Mutator.index();
        self.leftmosts[m] = mutator_leftmost;
        self.rightmosts[m] = mutator_rightmost;
        self.leftmosts_empty[m] = mutator_leftmost_empty;
        self.rightmosts_empty[m] = mutator_rightmost_empty;
        self.counts[m] = mutator_count;
        self.used[m] = mutator_used;
        self.capacity[m] = mutator_count * self.region_size_bytes;

        let c = PartitionId::Collector.index();
        self.leftmosts[c] = self.max;
        self.rightmosts[c] = -1;
        self.leftmosts_empty[c] = self.max;
        self.rightmosts_empty[c] = -1;
        self.counts[c] = 0;
        self.used[c] = 0;
        self.capacity[c] = 0;
    }

    /// Set the membership bit alone, without touching intervals or totals.
    /// Only valid during a rebuild scan, before `establish_intervals`
    /// commits the accumulated state.
    pub fn raw_set_membership(&mut self, idx: Idx, which: PartitionId) {
        debug_assert!(
            self.membership(idx).is_none(),
            "region {idx} is already in a partition"
        );
        self.membership[which.index()].set(idx);
    }

    /// Place a currently unaffiliated region into `which`, with `available`
    /// bytes of allocatable space.
    pub fn make_free(&mut self, idx: Idx, which: PartitionId, available: Size) {
        assert!(
            self.membership(idx).is_none(),
            "cannot make region {idx} free twice"
        );
        assert!(
            available <= self.region_size_bytes,
            "available exceeds region size"
        );
        let p = which.index();
        self.membership[p].set(idx);
        self.capacity[p] += self.region_size_bytes;
        self.used[p] += self.region_size_bytes - available;
        self.counts[p] += 1;
        self.expand_interval_if_boundary_modified(p, idx, available);
    }

    /// Remove a region from its partition. Any remnant of unallocated space
    /// is credited to the origin partition's used total: a retired region's
    /// wasted tail counts as consumed memory until the next rebuild.
    pub fn retire_from_partition(&mut self, idx: Idx, which: PartitionId, used_bytes: Size) {
        assert!(
            self.in_partition(idx, which),
            "region {idx} is not in the {} partition",
            which.name()
        );
        if used_bytes < self.region_size_bytes {
            self.increase_used(which, self.region_size_bytes - used_bytes);
        }
        let p = which.index();
        self.membership[p].clear(idx);
        self.counts[p] -= 1;
        self.shrink_interval_if_boundary_modified(p, idx);
    }

    /// Remove a contiguous span of regions from `which`. Used when a
    /// humongous allocation consumes the span whole; no padding remnant is
    /// credited here, the caller accounts the full span as used.
    pub fn retire_range_from_partition(&mut self, which: PartitionId, low: Idx, high: Idx) {
        assert!(low <= high, "inverted range [{low}, {high}]");
        let p = which.index();
        for idx in low..=high {
            assert!(
                self.in_partition(idx, which),
                "region {idx} is not in the {} partition",
                which.name()
            );
            self.membership[p].clear(idx);
        }
        self.counts[p] -= (high - low + 1) as usize;
        self.shrink_interval_if_range_modified(p, low, high);
    }

    /// Migrate a region between the two partitions, carrying `available`
    /// bytes of allocatable space with it. Both bitmaps, both interval sets,
    /// and both totals are updated together.
    pub fn move_from_partition_to_partition(
        &mut self,
        idx: Idx,
        from: PartitionId,
        to: PartitionId,
        available: Size,
    ) {
        assert!(from != to, "cannot move region {idx} onto itself");
        assert!(
            self.in_partition(idx, from),
            "region {idx} is not in the {} partition",
            from.name()
        );
        assert!(
            available <= self.region_size_bytes,
            "available exceeds region size"
        );
        let used = self.region_size_bytes - available;
        let (f, t) = (from.index(), to.index());

        self.membership[f].clear(idx);
        self.capacity[f] -= self.region_size_bytes;
        debug_assert!(self.used[f] >= used, "used accounting underflow");
        self.used[f] -= used;
        self.counts[f] -= 1;
        self.shrink_interval_if_boundary_modified(f, idx);

        self.membership[t].set(idx);
        self.capacity[t] += self.region_size_bytes;
        self.used[t] += used;
        self.counts[t] += 1;
        self.expand_interval_if_boundary_modified(t, idx, available);
    }

    /// Which partition holds this region, if any
    #[inline]
    pub fn membership(&self, idx: Idx) -> Option<PartitionId> {
        if self.membership[PartitionId::Mutator.index()].is_set(idx) {
            Some(PartitionId::Mutator)
        } else if self.membership[PartitionId::Collector.index()].is_set(idx) {
            Some(PartitionId::Collector)
        } else {
            None
        }
    }

    #[inline]
    pub fn in_partition(&self, idx: Idx, which: PartitionId) -> bool {
        self.membership[which.index()].is_set(idx)
    }

    /// Least index in the partition; `max_regions` when the partition is
    /// empty
    #[inline]
    pub fn leftmost(&self, which: PartitionId) -> Idx {
        let idx = self.leftmosts[which.index()];
        debug_assert!(idx == self.max || self.in_partition(idx, which));
        idx
    }

    /// Greatest index in the partition; `-1` when the partition is empty
    #[inline]
    pub fn rightmost(&self, which: PartitionId) -> Idx {
        let idx = self.rightmosts[which.index()];
        debug_assert!(idx == -1 || self.in_partition(idx, which));
        idx
    }

    #[inline]
    pub fn is_partition_empty(&self, which: PartitionId) -> bool {
        self.counts[which.index()] == 0
    }

    /// Least index of a fully empty region in the partition, or
    /// `max_regions` if there is none. Walks the bitmap from the cached hint
    /// and memoizes the answer.
    pub fn leftmost_empty(
        &mut self,
        which: PartitionId,
        alloc_capacity: impl Fn(RegionNum) -> Size,
    ) -> Idx {
        let p = which.index();
        let mut idx = self.leftmosts_empty[p];
        while idx < self.max {
            idx = self.membership[p].find_next_set(idx, self.max);
            if idx == self.max {
                break;
            }
            if alloc_capacity(idx as RegionNum) == self.region_size_bytes {
                self.leftmosts_empty[p] = idx;
                return idx;
            }
            idx += 1;
        }
        self.leftmosts_empty[p] = self.max;
        self.rightmosts_empty[p] = -1;
        self.max
    }

    /// Greatest index of a fully empty region in the partition, or `-1` if
    /// there is none. Walks the bitmap from the cached hint and memoizes the
    /// answer.
    pub fn rightmost_empty(
        &mut self,
        which: PartitionId,
        alloc_capacity: impl Fn(RegionNum) -> Size,
    ) -> Idx {
        let p = which.index();
        let mut idx = self.rightmosts_empty[p];
        while idx >= 0 {
            idx = self.membership[p].find_prev_set(idx, -1);
            if idx < 0 {
                break;
            }
            if alloc_capacity(idx as RegionNum) == self.region_size_bytes {
                self.rightmosts_empty[p] = idx;
                return idx;
            }
            idx -= 1;
        }
        self.leftmosts_empty[p] = self.max;
        self.rightmosts_empty[p] = -1;
        -1
    }

    pub fn increase_used(&mut self, which: PartitionId, bytes: Size) {
        let p = which.index();
        self.used[p] += bytes;
        debug_assert!(
            self.used[p] <= self.capacity[p],
            "{} partition used {} exceeds capacity {}",
            which.name(),
            self.used[p],
            self.capacity[p]
        );
    }

    #[inline]
    pub fn capacity_of(&self, which: PartitionId) -> Size {
        self.capacity[which.index()]
    }

    #[inline]
    pub fn used_by(&self, which: PartitionId) -> Size {
        self.used[which.index()]
    }

    #[inline]
    pub fn available_in(&self, which: PartitionId) -> Size {
        let p = which.index();
        debug_assert!(self.used[p] <= self.capacity[p]);
        self.capacity[p] - self.used[p]
    }

    #[inline]
    pub fn count(&self, which: PartitionId) -> usize {
        self.counts[which.index()]
    }

    #[inline]
    pub fn max(&self) -> Idx {
        self.max
    }

    #[inline]
    pub fn region_size_bytes(&self) -> Size {
        self.region_size_bytes
    }

    #[inline]
    pub(crate) fn members(&self, which: PartitionId) -> &CompactBitmap {
        &self.membership[which.index()]
    }

    fn expand_interval_if_boundary_modified(&mut self, p: usize, idx: Idx, available: Size) {
        if available == self.region_size_bytes {
            if self.leftmosts_empty[p] > idx {
                self.leftmosts_empty[p] = idx;
            }
            if self.rightmosts_empty[p] < idx {
                self.rightmosts_empty[p] = idx;
            }
        }
        if self.leftmosts[p] > idx {
            self.leftmosts[p] = idx;
        }
        if self.rightmosts[p] < idx {
            self.rightmosts[p] = idx;
        }
    }

    fn shrink_interval_if_boundary_modified(&mut self, p: usize, idx: Idx) {
        if idx == self.leftmosts[p] {
            self.leftmosts[p] = self.membership[p].find_next_set(idx + 1, self.max);
        }
        if idx == self.rightmosts[p] {
            self.rightmosts[p] = self.membership[p].find_prev_set(idx - 1, -1);
        }
        self.clamp_empty_bounds(p);
    }

    fn shrink_interval_if_range_modified(&mut self, p: usize, low: Idx, high: Idx) {
        if (low..=high).contains(&self.leftmosts[p]) {
            self.leftmosts[p] = self.membership[p].find_next_set(high + 1, self.max);
        }
        if (low..=high).contains(&self.rightmosts[p]) {
            self.rightmosts[p] = self.membership[p].find_prev_set(low - 1, -1);
        }
        self.clamp_empty_bounds(p);
    }

    /// Empty-interval hints are tightened lazily: pull them inside the
    /// non-empty bounds here, and let the exact `leftmost_empty` /
    /// `rightmost_empty` queries finish the job on demand.
    fn clamp_empty_bounds(&mut self, p: usize) {
        if self.leftmosts_empty[p] < self.leftmosts[p] {
            self.leftmosts_empty[p] = self.leftmosts[p];
        }
        if self.rightmosts_empty[p] > self.rightmosts[p] {
            self.rightmosts_empty[p] = self.rightmosts[p];
        }
    }

    /// Full-scan validation of bounds, counts, and disjointness. Debug
    /// builds only; release builds compile this to nothing.
    pub fn assert_bounds(&mut self, alloc_capacity: impl Fn(RegionNum) -> Size) {
        if !cfg!(debug_assertions) {
            return;
        }
        let mut leftmosts = [self.max; NUM_PARTITIONS];
        let mut rightmosts = [-1 as Idx; NUM_PARTITIONS];
        let mut empty_leftmosts = [self.max; NUM_PARTITIONS];
        let mut empty_rightmosts = [-1 as Idx; NUM_PARTITIONS];
        let mut counts = [0usize; NUM_PARTITIONS];

        for idx in 0..self.max {
            let mutator = self.in_partition(idx, PartitionId::Mutator);
            let collector = self.in_partition(idx, PartitionId::Collector);
            assert!(
                !(mutator && collector),
                "region {idx} is in both partitions"
            );
            let p = match (mutator, collector) {
                (true, _) => PartitionId::Mutator.index(),
                (_, true) => PartitionId::Collector.index(),
                _ => continue,
            };
            let capacity = alloc_capacity(idx as RegionNum);
            assert!(capacity > 0, "free region {idx} has no allocation capacity");
            counts[p] += 1;
            leftmosts[p] = leftmosts[p].min(idx);
            rightmosts[p] = rightmosts[p].max(idx);
            if capacity == self.region_size_bytes {
                empty_leftmosts[p] = empty_leftmosts[p].min(idx);
                empty_rightmosts[p] = empty_rightmosts[p].max(idx);
            }
        }

        for which in [PartitionId::Mutator, PartitionId::Collector] {
            let p = which.index();
            assert_eq!(
                counts[p],
                self.counts[p],
                "{} region count does not match the bitmap",
                which.name()
            );
            assert!(
                self.used[p] <= self.capacity[p],
                "{} partition used exceeds capacity",
                which.name()
            );
            // Cached bounds must never be tighter than the bitmap.
            assert!(
                leftmosts[p] >= self.leftmosts[p],
                "{} region below the cached leftmost",
                which.name()
            );
            assert!(
                rightmosts[p] <= self.rightmosts[p],
                "{} region above the cached rightmost",
                which.name()
            );
            if counts[p] > 0 {
                assert!(
                    self.in_partition(self.leftmosts[p], which),
                    "{} leftmost bound is not a member",
                    which.name()
                );
                assert!(
                    self.in_partition(self.rightmosts[p], which),
                    "{} rightmost bound is not a member",
                    which.name()
                );
            } else {
                assert_eq!(self.leftmosts[p], self.max);
                assert_eq!(self.rightmosts[p], -1);
            }
            // The lazy empty hints must not exclude any actually empty region.
            assert!(
                empty_leftmosts[p] >= self.leftmosts_empty[p],
                "{} empty region below the cached empty leftmost",
                which.name()
            );
            assert!(
                empty_rightmosts[p] <= self.rightmosts_empty[p],
                "{} empty region above the cached empty rightmost",
                which.name()
            );
        }
    }
}
