/*!
 * Rebuild and Reserve
 * Post-collection repopulation of the partitions and the carving of the
 * evacuation reserve
 */

use super::types::PartitionId;
use super::{FreeSet, RegionHost};
use crate::core::types::{Idx, RegionNum, Size};
use log::{debug, info, trace};
use parking_lot::Mutex;

impl<H: RegionHost> FreeSet<H> {
    /// Drop all partition state and re-scan the heap, placing every region
    /// with usable capacity into the mutator partition. Returns the number
    /// of trash regions observed (former collection-set members not yet
    /// recycled).
    pub fn prepare_to_rebuild(&mut self) -> usize {
        self.partitions.make_all_regions_unavailable();
        debug!("Rebuilding the free set");
        self.find_regions_with_alloc_capacity()
    }

    /// Carve the evacuation reserve out of the high end of the mutator
    /// partition and publish the result.
    pub fn finish_rebuild(&mut self, cset_regions: usize) {
        let to_reserve =
            self.host.max_capacity() * self.config.evac_reserve_percent as Size / 100;
        debug!(
            "Reserving {to_reserve} bytes for evacuation, {cset_regions} regions pending recycle"
        );
        self.reserve_regions(to_reserve);
        let capacity = self.capacity_fn();
        self.partitions.assert_bounds(capacity);
        self.log_status();
    }

    /// Full rebuild: re-scan, then re-reserve
    pub fn rebuild(&mut self) {
        let cset_regions = self.prepare_to_rebuild();
        self.finish_rebuild(cset_regions);
    }

    fn find_regions_with_alloc_capacity(&mut self) -> usize {
        let region_size_bytes = self.host.region_size_bytes();
        let mut cset_regions = 0;

        let mut leftmost = self.partitions.max();
        let mut rightmost: Idx = -1;
        let mut leftmost_empty = self.partitions.max();
        let mut rightmost_empty: Idx = -1;
        let mut count = 0usize;
        let mut used: Size = 0;

        for region in 0..self.host.num_regions() {
            if self.host.is_trash(region) {
                // Former collection-set regions are not recycled until
                // reference updating finishes; count them for the caller.
                cset_regions += 1;
            }
            if self.host.is_alloc_allowed(region) || self.host.is_trash(region) {
                let region_capacity = self.host.alloc_capacity(region);
                // Regions that would almost surely fail allocation stay out.
                if region_capacity > self.config.plab_min_size_bytes {
                    let idx = region as Idx;
                    self.partitions.raw_set_membership(idx, PartitionId::Mutator);
                    leftmost = leftmost.min(idx);
                    rightmost = rightmost.max(idx);
                    if region_capacity == region_size_bytes {
                        leftmost_empty = leftmost_empty.min(idx);
                        rightmost_empty = rightmost_empty.max(idx);
                    }
                    count += 1;
                    used += region_size_bytes - region_capacity;
                    trace!(
                        "Adding region {region} to the mutator partition, {region_capacity} bytes free"
                    );
                }
            }
        }

        self.partitions.establish_intervals(
            leftmost,
            rightmost,
            leftmost_empty,
            rightmost_empty,
            count,
            used,
        );
        cset_regions
    }

    /// Migrate high-address mutator regions into the collector partition
    /// until the reserve holds `to_reserve` available bytes, as nearly as
    /// whole regions allow.
    ///
    /// Non-empty regions are taken too, not only empty ones: survivor
    /// objects then stay packed at the high end of the heap instead of
    /// scattering among ephemeral allocations.
    pub(super) fn reserve_regions(&mut self, to_reserve: Size) {
        for region in (0..self.host.num_regions()).rev() {
            let idx = region as Idx;
            if !self.partitions.in_partition(idx, PartitionId::Mutator) {
                continue;
            }
            let region_capacity = self.host.alloc_capacity(region);
            debug_assert!(
                region_capacity > 0,
                "partition membership implies allocation capacity"
            );
            // Take the region only while its whole contribution fits under
            // the target; the first region that would overshoot ends the
            // walk.
            if self.partitions.available_in(PartitionId::Collector) + region_capacity > to_reserve
            {
                break;
            }
            self.partitions.move_from_partition_to_partition(
                idx,
                PartitionId::Mutator,
                PartitionId::Collector,
                region_capacity,
            );
            trace!("Shifting region {region} from the mutator partition to the collector reserve");
        }

        let reserved = self.partitions.available_in(PartitionId::Collector);
        if reserved < to_reserve {
            debug!("Wanted {to_reserve} bytes of evacuation reserve, only reserved {reserved}");
        }
    }

    /// Return unused evacuation reserve to the mutators, up to
    /// `max_xfer_regions` regions, empty regions first. Acquires the heap
    /// lock internally, once per batch, so allocators can interleave; called
    /// at the start of reference updating when the reserve is no longer
    /// needed.
    pub fn move_regions_from_collector_to_mutator(this: &Mutex<Self>, max_xfer_regions: usize) {
        let mut remaining = max_xfer_regions;
        let mut empty_xfer: Size = 0;
        let mut not_empty_xfer: Size = 0;

        // Empty regions within the reserve first.
        if remaining > 0 {
            let mut fs = this.lock();
            let region_size_bytes = fs.host.region_size_bytes();
            let capacity = fs.capacity_fn();
            let rightmost = fs.partitions.rightmost_empty(PartitionId::Collector, &capacity);
            let mut idx = fs.partitions.leftmost_empty(PartitionId::Collector, &capacity);
            while remaining > 0 && idx >= 0 && idx <= rightmost {
                if fs.partitions.in_partition(idx, PartitionId::Collector)
                    && fs.can_allocate_from(idx as RegionNum)
                {
                    fs.partitions.move_from_partition_to_partition(
                        idx,
                        PartitionId::Collector,
                        PartitionId::Mutator,
                        region_size_bytes,
                    );
                    remaining -= 1;
                    empty_xfer += region_size_bytes;
                }
                idx += 1;
            }
        }

        // Then whatever partially used regions remain.
        if remaining > 0 {
            let mut fs = this.lock();
            let rightmost = fs.partitions.rightmost(PartitionId::Collector);
            let mut idx = fs.partitions.leftmost(PartitionId::Collector);
            while remaining > 0 && idx >= 0 && idx <= rightmost {
                if fs.partitions.in_partition(idx, PartitionId::Collector) {
                    let region_capacity = fs.host.alloc_capacity(idx as RegionNum);
                    if region_capacity > 0 {
                        fs.partitions.move_from_partition_to_partition(
                            idx,
                            PartitionId::Collector,
                            PartitionId::Mutator,
                            region_capacity,
                        );
                        remaining -= 1;
                        not_empty_xfer += region_capacity;
                    }
                }
                idx += 1;
            }
        }

        info!(
            "Moved {} bytes from the collector reserve back to the mutator partition",
            empty_xfer + not_empty_xfer
        );
    }
}
