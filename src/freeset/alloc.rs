/*!
 * Allocation Paths
 * Single-region scans, in-region placement, and the contiguous humongous
 * search
 */

use super::types::{AllocRequest, PartitionId};
use super::{FreeSet, RegionHost};
use crate::core::limits;
use crate::core::types::{align_down, bytes_to_words, words_to_bytes, Address, Idx, RegionNum};
use log::{debug, trace};

impl<H: RegionHost> FreeSet<H> {
    /// Allocate within a single region, scanning the partition that matches
    /// the request's origin.
    ///
    /// Mutator requests walk the mutator partition in the current bias
    /// direction and never touch the collector reserve. Collector requests
    /// walk the reserve from high addresses down and may, as a last resort,
    /// steal a fully empty mutator region.
    pub(super) fn allocate_single(&mut self, req: &mut AllocRequest) -> Option<Address> {
        if req.kind().is_mutator() {
            self.update_allocation_bias();
            if self.partitions.is_partition_empty(PartitionId::Mutator) {
                return None;
            }
            if self.right_to_left_bias {
                let leftmost = self.partitions.leftmost(PartitionId::Mutator);
                let mut idx = self.partitions.rightmost(PartitionId::Mutator);
                while idx >= leftmost {
                    if self.mutator_candidate_fits(idx as RegionNum, req) {
                        if let Some(addr) = self.try_allocate_in(idx as RegionNum, req) {
                            return Some(addr);
                        }
                    }
                    idx = self
                        .partitions
                        .members(PartitionId::Mutator)
                        .find_prev_set(idx - 1, leftmost - 1);
                }
            } else {
                let rightmost = self.partitions.rightmost(PartitionId::Mutator);
                let mut idx = self.partitions.leftmost(PartitionId::Mutator);
                while idx <= rightmost {
                    if self.mutator_candidate_fits(idx as RegionNum, req) {
                        if let Some(addr) = self.try_allocate_in(idx as RegionNum, req) {
                            return Some(addr);
                        }
                    }
                    idx = self
                        .partitions
                        .members(PartitionId::Mutator)
                        .find_next_set(idx + 1, rightmost + 1);
                }
            }
            // No recovery: mutator requests never spill into the reserve.
            None
        } else {
            // Prefer high addresses within the collector reserve.
            if !self.partitions.is_partition_empty(PartitionId::Collector) {
                let leftmost = self.partitions.leftmost(PartitionId::Collector);
                let mut idx = self.partitions.rightmost(PartitionId::Collector);
                while idx >= leftmost {
                    if let Some(addr) = self.try_allocate_in(idx as RegionNum, req) {
                        return Some(addr);
                    }
                    idx = self
                        .partitions
                        .members(PartitionId::Collector)
                        .find_prev_set(idx - 1, leftmost - 1);
                }
            }

            // The reserve is exhausted. Borrow from the mutator view?
            if !self.config.evac_reserve_overflow {
                return None;
            }

            let capacity = self.capacity_fn();
            let leftmost_empty = self
                .partitions
                .leftmost_empty(PartitionId::Mutator, &capacity);
            let mut idx = self
                .partitions
                .rightmost_empty(PartitionId::Mutator, &capacity);
            while idx >= leftmost_empty {
                if self.partitions.in_partition(idx, PartitionId::Mutator)
                    && self.can_allocate_from(idx as RegionNum)
                {
                    self.flip_to_gc(idx);
                    if let Some(addr) = self.try_allocate_in(idx as RegionNum, req) {
                        debug!(
                            "Flipped region {idx} to the collector for a {} request",
                            req.kind().name()
                        );
                        return Some(addr);
                    }
                }
                idx = self
                    .partitions
                    .members(PartitionId::Mutator)
                    .find_prev_set(idx - 1, leftmost_empty - 1);
            }
            // Never mix collector allocations into partially used mutator
            // regions: moving their update watermark would hide mutator
            // objects from the reference-update pass.
            None
        }
    }

    /// Can this mutator-partition candidate possibly satisfy the request?
    /// TLABs shrink, so only their floor matters; shared requests probe the
    /// region outright, and a failed probe may retire a nearly full region.
    fn mutator_candidate_fits(&self, region: RegionNum, req: &AllocRequest) -> bool {
        if req.kind().is_lab() {
            self.host.alloc_capacity(region) >= words_to_bytes(req.min_size_words())
        } else {
            true
        }
    }

    /// Attempt the allocation inside one region, updating accounting and
    /// retiring the region if too little space remains afterwards.
    pub(super) fn try_allocate_in(
        &mut self,
        region: RegionNum,
        req: &mut AllocRequest,
    ) -> Option<Address> {
        if self.host.is_trash(region) && self.host.is_concurrent_weak_root_in_progress() {
            // The trash cannot be recycled until weak roots are done.
            return None;
        }
        self.try_recycle_trashed(region);
        let in_new_region = self.host.is_empty(region);
        req.set_in_new_region(in_new_region);
        if in_new_region {
            debug!("Using new region {region} for {} request", req.kind().name());
        }

        let region_size_bytes = self.host.region_size_bytes();
        let mut result = None;
        if req.kind().is_lab() {
            // Shrink the request down to what the region holds, bounded below
            // by the request's own floor.
            let free_words = align_down(
                bytes_to_words(self.host.alloc_capacity(region)),
                self.host.min_object_alignment_words(),
            );
            let adjusted_size = req.size_words().min(free_words);
            if adjusted_size >= req.min_size_words() {
                result = self.host.allocate_in_region(region, adjusted_size, req.kind());
                debug_assert!(
                    result.is_some(),
                    "in-region allocation of {adjusted_size} words within {free_words} free must succeed"
                );
                if result.is_some() {
                    req.set_actual_size(adjusted_size);
                    trace!(
                        "Allocated {adjusted_size} words (adjusted from {}) for {} in region {region}",
                        req.size_words(),
                        req.kind().name()
                    );
                }
            } else {
                trace!(
                    "Cannot shrink {} request of {} words to region {region}: {free_words} words free, floor {}",
                    req.kind().name(),
                    req.size_words(),
                    req.min_size_words()
                );
            }
        } else {
            result = self.host.allocate_in_region(region, req.size_words(), req.kind());
            if result.is_some() {
                req.set_actual_size(req.size_words());
                trace!(
                    "Allocated {} words for {} in region {region}",
                    req.size_words(),
                    req.kind().name()
                );
            }
        }

        if result.is_some() {
            // Credit the bytes to the partition that owns the region, so a
            // later move between partitions transfers a total that was
            // actually recorded.
            let which = self
                .partitions
                .membership(region as Idx)
                .expect("allocation attempted outside both partitions");
            self.partitions
                .increase_used(which, words_to_bytes(req.actual_size_words()));
            if req.kind().is_gc() {
                // Objects evacuated into this memory are not revisited by the
                // reference-update pass of the same cycle.
                let top = self.host.top(region);
                self.host.set_update_watermark(region, top);
            }
        }

        // Retire the region if what remains is not worth scanning again: below
        // the PLAB floor outright, or below the waste threshold after a
        // failed allocation.
        let remaining = self.host.alloc_capacity(region);
        let retire_threshold = if result.is_none() {
            self.config
                .waste_threshold_bytes(region_size_bytes)
                .max(self.config.plab_min_size_bytes)
        } else {
            self.config.plab_min_size_bytes
        };
        if remaining < retire_threshold {
            let which = self
                .partitions
                .membership(region as Idx)
                .expect("allocation attempted outside both partitions");
            let used_bytes = region_size_bytes - remaining;
            self.partitions
                .retire_from_partition(region as Idx, which, used_bytes);
            let capacity = self.capacity_fn();
            self.partitions.assert_bounds(capacity);
        }
        result
    }

    /// Allocate a humongous object across consecutive regions, biased toward
    /// the low end of the mutator range.
    pub(super) fn allocate_contiguous(&mut self, req: &mut AllocRequest) -> Option<Address> {
        let words = req.size_words();
        let region_size_bytes = self.host.region_size_bytes();
        let num = words_to_bytes(words).div_ceil(region_size_bytes);

        if num > self.partitions.count(PartitionId::Mutator) {
            return None;
        }

        let capacity = self.capacity_fn();
        let start_range = self
            .partitions
            .leftmost_empty(PartitionId::Mutator, &capacity);
        let end_range = self
            .partitions
            .rightmost_empty(PartitionId::Mutator, &capacity)
            + 1;

        // Walk candidate windows left to right. A member region that is not
        // actually empty rejects its window; the search resumes past it, so
        // the window's left edge strictly advances and the loop terminates.
        let mut start = start_range;
        let beg = loop {
            if start >= end_range {
                return None;
            }
            let beg = self
                .partitions
                .members(PartitionId::Mutator)
                .find_next_run(num, start, end_range);
            if beg >= end_range {
                return None;
            }
            let blocker =
                (beg..beg + num as Idx).find(|&idx| !self.can_allocate_from(idx as RegionNum));
            match blocker {
                None => break beg,
                Some(idx) => start = idx + 1,
            }
        };
        let end = beg + num as Idx - 1;

        let remainder_words = words % self.host.region_size_words();
        for idx in beg..=end {
            let region = idx as RegionNum;
            self.try_recycle_trashed(region);
            debug_assert!(self.host.is_empty(region), "humongous span must be empty");
            if idx == beg {
                self.host.make_humongous_start(region);
            } else {
                self.host.make_humongous_cont(region);
            }
            // The trailing region may be partially consumed; record the
            // remainder in its top.
            let used_words = if idx == end && remainder_words != 0 {
                remainder_words
            } else {
                self.host.region_size_words()
            };
            let bottom = self.host.bottom(region);
            self.host.set_update_watermark(region, bottom);
            self.host.set_top(region, used_words);
        }

        // Individual regions report their true tops, but the whole span is
        // accounted as used within the mutator partition.
        self.partitions
            .retire_range_from_partition(PartitionId::Mutator, beg, end);
        self.partitions
            .increase_used(PartitionId::Mutator, num * region_size_bytes);
        let capacity = self.capacity_fn();
        self.partitions.assert_bounds(capacity);

        req.set_actual_size(words);
        debug!("Allocated humongous object across regions {beg}..={end} ({num} regions)");
        Some(self.host.bottom(beg as RegionNum))
    }

    /// Reconsider the mutator scan direction once the bias budget runs out.
    ///
    /// Regions not reclaimed by the previous cycle congregate at one end of
    /// the heap. Scanning from the more fragmented end consumes partially
    /// used regions first, which tightens the span of fully empty regions
    /// and preserves them for humongous allocations.
    fn update_allocation_bias(&mut self) {
        if self.alloc_bias_weight == 0 {
            let capacity = self.capacity_fn();
            let non_empty_left = self
                .partitions
                .leftmost_empty(PartitionId::Mutator, &capacity)
                - self.partitions.leftmost(PartitionId::Mutator);
            let non_empty_right = self.partitions.rightmost(PartitionId::Mutator)
                - self
                    .partitions
                    .rightmost_empty(PartitionId::Mutator, &capacity);
            self.right_to_left_bias = non_empty_right > non_empty_left;
            self.alloc_bias_weight = limits::ALLOC_BIAS_WEIGHT;
        } else {
            self.alloc_bias_weight -= 1;
        }
    }

    /// Move an empty mutator region into the collector reserve so a starved
    /// evacuation can proceed.
    fn flip_to_gc(&mut self, idx: Idx) {
        debug_assert!(self.partitions.in_partition(idx, PartitionId::Mutator));
        debug_assert!(self.can_allocate_from(idx as RegionNum));
        let region_capacity = self.host.alloc_capacity(idx as RegionNum);
        self.partitions.move_from_partition_to_partition(
            idx,
            PartitionId::Mutator,
            PartitionId::Collector,
            region_capacity,
        );
        let capacity = self.capacity_fn();
        self.partitions.assert_bounds(capacity);
        // The region may still be trash; try_allocate_in recycles it before
        // placing anything.
    }
}
