/*!
 * Free-Set Reporting
 * Fragmentation metrics, the free-set map, and stats snapshots
 */

use super::types::{FreeSetStats, PartitionId};
use super::{FreeSet, RegionHost};
use crate::core::limits::STATUS_MAP_ROW;
use crate::core::types::RegionNum;
use log::{debug, info, log_enabled, Level};

impl<H: RegionHost> FreeSet<H> {
    /// Internal fragmentation over the mutator partition:
    ///
    /// ```text
    ///               sum(used[i]^2)
    ///   IF = 1 - --------------------
    ///             C * sum(used[i])
    /// ```
    ///
    /// where C is the region capacity. The non-linearity makes IF lower when
    /// the same total usage is densely packed: a heap that is half full with
    /// the first half of its regions completely full scores 0, while the
    /// same heap with every region half full scores 1/2.
    pub fn internal_fragmentation(&self) -> f64 {
        let region_size = self.host.region_size_bytes();
        let mut squared = 0.0f64;
        let mut linear = 0.0f64;

        self.for_each_member(PartitionId::Mutator, |region| {
            let used = (region_size - self.host.alloc_capacity(region)) as f64;
            squared += used * used;
            linear += used;
        });

        if linear > 0.0 {
            1.0 - squared / (region_size as f64 * linear)
        } else {
            0.0
        }
    }

    /// External fragmentation over the mutator partition:
    ///
    /// ```text
    ///   EF = 1 - largest_contiguous_free / total_free
    /// ```
    ///
    /// A completely empty (or completely full) heap scores 0; a heap whose
    /// full and empty regions interleave scores close to 1.
    pub fn external_fragmentation(&self) -> f64 {
        let region_size = self.host.region_size_bytes();
        let mut last_region = 0;
        let mut max_contig = 0usize;
        let mut empty_contig = 0usize;
        let mut free = 0usize;

        self.for_each_member(PartitionId::Mutator, |region| {
            if self.host.is_empty(region) {
                free += region_size;
                if last_region + 1 == region {
                    empty_contig += 1;
                } else {
                    empty_contig = 1;
                }
            } else {
                empty_contig = 0;
            }
            max_contig = max_contig.max(empty_contig);
            last_region = region;
        });

        if free > 0 {
            1.0 - (max_contig * region_size) as f64 / free as f64
        } else {
            0.0
        }
    }

    /// Point-in-time snapshot of both partitions
    pub fn status(&self) -> FreeSetStats {
        FreeSetStats {
            mutator_capacity: self.partitions.capacity_of(PartitionId::Mutator),
            mutator_used: self.partitions.used_by(PartitionId::Mutator),
            mutator_available: self.partitions.available_in(PartitionId::Mutator),
            mutator_regions: self.partitions.count(PartitionId::Mutator),
            collector_capacity: self.partitions.capacity_of(PartitionId::Collector),
            collector_used: self.partitions.used_by(PartitionId::Collector),
            collector_available: self.partitions.available_in(PartitionId::Collector),
            collector_regions: self.partitions.count(PartitionId::Collector),
            internal_fragmentation: self.internal_fragmentation(),
            external_fragmentation: self.external_fragmentation(),
        }
    }

    /// Log the per-region free-set map and partition totals.
    ///
    /// One character per region: `M`/`m` for empty/partial mutator regions,
    /// `C`/`c` for the collector reserve, `h` for humongous regions, `_` for
    /// everything retired or otherwise unavailable.
    pub fn log_status(&self) {
        if log_enabled!(Level::Debug) {
            debug!("Free-set map legend: M:mutator C:collector h:humongous _:retired");
            debug!(
                "Mutator range [{}..{}], collector range [{}..{}]",
                self.partitions.leftmost(PartitionId::Mutator),
                self.partitions.rightmost(PartitionId::Mutator),
                self.partitions.leftmost(PartitionId::Collector),
                self.partitions.rightmost(PartitionId::Collector),
            );
            for (row_start, row) in self.render_map().into_iter() {
                debug!("{row_start:6}: {row}");
            }
        }

        info!(
            "Free: {} bytes in {} mutator regions; collector reserve {} bytes in {} regions",
            self.partitions.available_in(PartitionId::Mutator),
            self.partitions.count(PartitionId::Mutator),
            self.partitions.available_in(PartitionId::Collector),
            self.partitions.count(PartitionId::Collector),
        );
    }

    /// Render the free-set map in rows, returning each row with the index of
    /// its first region.
    pub fn render_map(&self) -> Vec<(usize, String)> {
        let region_size = self.host.region_size_bytes();
        let mut rows = Vec::new();
        let mut row = String::with_capacity(STATUS_MAP_ROW);

        for region in 0..self.host.num_regions() {
            if region != 0 && region % STATUS_MAP_ROW == 0 {
                rows.push((region - STATUS_MAP_ROW, std::mem::take(&mut row)));
            }
            let idx = region as isize;
            let ch = if self.partitions.in_partition(idx, PartitionId::Mutator) {
                if self.host.alloc_capacity(region) == region_size {
                    'M'
                } else {
                    'm'
                }
            } else if self.partitions.in_partition(idx, PartitionId::Collector) {
                if self.host.alloc_capacity(region) == region_size {
                    'C'
                } else {
                    'c'
                }
            } else if self.host.is_humongous(region) {
                'h'
            } else {
                '_'
            };
            row.push(ch);
        }
        if !row.is_empty() {
            let start = (self.host.num_regions() / STATUS_MAP_ROW) * STATUS_MAP_ROW;
            let start = if start == self.host.num_regions() {
                start - STATUS_MAP_ROW
            } else {
                start
            };
            rows.push((start, row));
        }
        rows
    }

    /// Visit every member of the partition between its interval bounds, in
    /// ascending order.
    fn for_each_member(&self, which: PartitionId, mut visit: impl FnMut(RegionNum)) {
        if self.partitions.is_partition_empty(which) {
            return;
        }
        let rightmost = self.partitions.rightmost(which);
        let mut idx = self.partitions.leftmost(which);
        while idx <= rightmost {
            visit(idx as RegionNum);
            idx = self.partitions.members(which).find_next_set(idx + 1, rightmost + 1);
        }
    }
}
