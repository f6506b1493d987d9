/*!
 * Free Set
 *
 * Allocation policy engine over the region partitions. Receives allocation
 * requests, picks a placement strategy by request kind, walks candidate
 * regions through the partition table's bitmaps and interval hints, and
 * delegates the in-region bump allocation to the host.
 *
 * ## Placement
 *
 * Humongous objects are packed toward low addresses, the collector's
 * evacuation reserve toward high addresses, and single-region mutator
 * allocations fill the middle from whichever end is more fragmented.
 *
 * ## Locking
 *
 * All operations taking `&mut self` expect the caller to hold the heap lock;
 * the exclusive borrow stands in for the lock witness when the free set is
 * kept inside a `parking_lot::Mutex`. The two exceptions are
 * [`FreeSet::recycle_trash`] and
 * [`FreeSet::move_regions_from_collector_to_mutator`], which take the mutex
 * itself and acquire it per step so allocators can interleave.
 */

pub mod partitions;
pub mod traits;
pub mod types;

mod alloc;
mod rebuild;
mod stats;

pub use partitions::RegionPartitions;
pub use traits::RegionHost;
pub use types::{
    AllocKind, AllocRequest, ConfigError, FreeSetConfig, FreeSetStats, PartitionId,
};

use crate::core::limits;
use crate::core::types::{Address, Idx, RegionNum, Size};
use parking_lot::Mutex;
use std::sync::Arc;

/// Region-partitioned free-space manager.
///
/// Generic over the host heap; the free set itself owns no regions, only
/// their partition membership and the byte accounting derived from it.
pub struct FreeSet<H: RegionHost> {
    host: Arc<H>,
    partitions: RegionPartitions,
    config: FreeSetConfig,
    /// Scan direction for single-region mutator allocations
    right_to_left_bias: bool,
    /// Allocations remaining before the scan direction is reconsidered
    alloc_bias_weight: u32,
}

impl<H: RegionHost> FreeSet<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self::with_config(host, FreeSetConfig::default()).expect("default config is valid")
    }

    pub fn with_config(host: Arc<H>, config: FreeSetConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let partitions = RegionPartitions::new(host.num_regions(), host.region_size_bytes());
        Ok(Self {
            host,
            partitions,
            config,
            right_to_left_bias: false,
            alloc_bias_weight: limits::ALLOC_BIAS_WEIGHT,
        })
    }

    /// Serve an allocation request. Requests above the humongous threshold
    /// take the contiguous multi-region path; LAB requests that large are a
    /// category error and panic. Returns `None` when the request cannot be
    /// satisfied; escalation (stall, GC) is the caller's policy.
    pub fn allocate(&mut self, req: &mut AllocRequest) -> Option<Address> {
        if req.size_words() > self.config.humongous_threshold_words {
            assert!(
                !req.kind().is_lab(),
                "{} request of {} words exceeds the humongous threshold of {} words",
                req.kind().name(),
                req.size_words(),
                self.config.humongous_threshold_words
            );
            req.set_in_new_region(true);
            self.allocate_contiguous(req)
        } else {
            self.allocate_single(req)
        }
    }

    /// Remove every region from both partitions
    pub fn clear(&mut self) {
        self.partitions.make_all_regions_unavailable();
    }

    /// Bytes of mutator capacity as of the most recent rebuild
    #[inline]
    pub fn capacity(&self) -> Size {
        self.partitions.capacity_of(PartitionId::Mutator)
    }

    /// Bytes allocated (or retired as waste) from the mutator partition
    #[inline]
    pub fn used(&self) -> Size {
        self.partitions.used_by(PartitionId::Mutator)
    }

    #[inline]
    pub fn available(&self) -> Size {
        self.partitions.available_in(PartitionId::Mutator)
    }

    /// Read access to the partition table, for inspection and reporting
    #[inline]
    pub fn partitions(&self) -> &RegionPartitions {
        &self.partitions
    }

    #[inline]
    pub fn config(&self) -> &FreeSetConfig {
        &self.config
    }

    #[inline]
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Exact least index of a fully empty region in the partition
    pub fn leftmost_empty(&mut self, which: PartitionId) -> Idx {
        let capacity = self.capacity_fn();
        self.partitions.leftmost_empty(which, capacity)
    }

    /// Exact greatest index of a fully empty region in the partition
    pub fn rightmost_empty(&mut self, which: PartitionId) -> Idx {
        let capacity = self.capacity_fn();
        self.partitions.rightmost_empty(which, capacity)
    }

    /// Recycle all trash regions, releasing the heap lock between regions so
    /// allocating threads can make progress.
    pub fn recycle_trash(this: &Mutex<Self>) {
        let host = Arc::clone(&this.lock().host);
        for region in 0..host.num_regions() {
            if host.is_trash(region) {
                this.lock().try_recycle_trashed(region);
            }
            // Let a contending allocator grab the lock between iterations.
            std::hint::spin_loop();
        }
    }

    /// Is the region entirely available, either because it is empty or
    /// because its trash can be recycled right now?
    pub(crate) fn can_allocate_from(&self, region: RegionNum) -> bool {
        self.host.is_empty(region)
            || (self.host.is_trash(region) && !self.host.is_concurrent_weak_root_in_progress())
    }

    pub(crate) fn try_recycle_trashed(&self, region: RegionNum) {
        if self.host.is_trash(region) {
            self.host.recycle(region);
        }
    }

    /// Capacity probe handed to the partition table, so it can tighten its
    /// empty-interval hints without holding a reference back into the free
    /// set.
    pub(crate) fn capacity_fn(&self) -> impl Fn(RegionNum) -> Size {
        let host = Arc::clone(&self.host);
        move |region| host.alloc_capacity(region)
    }
}
