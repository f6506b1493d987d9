/*!
 * Free-Set Types
 * Requests, partitions, configuration, and statistics
 */

use crate::core::limits;
use crate::core::types::Size;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two tracked partitions. Absence of membership ("not free") is
/// represented by `Option<PartitionId>::None` rather than a third variant, so
/// the partition tables can be indexed by `PartitionId as usize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionId {
    /// Regions available to application threads
    Mutator,
    /// Regions reserved for the collector's evacuation work
    Collector,
}

pub(crate) const NUM_PARTITIONS: usize = 2;

impl PartitionId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PartitionId::Mutator => "Mutator",
            PartitionId::Collector => "Collector",
        }
    }
}

/// Allocation request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// Thread-local allocation buffer for a mutator thread
    Tlab,
    /// Shared (non-buffered) mutator allocation
    SharedMutator,
    /// Evacuation buffer for a collector thread
    GcLab,
    /// Shared collector allocation
    SharedGc,
}

impl AllocKind {
    /// Does the allocation serve an application thread?
    #[inline]
    pub fn is_mutator(self) -> bool {
        matches!(self, AllocKind::Tlab | AllocKind::SharedMutator)
    }

    /// Does the allocation serve the collector's evacuation?
    #[inline]
    pub fn is_gc(self) -> bool {
        !self.is_mutator()
    }

    /// Is this a size-shrinkable buffer allocation?
    #[inline]
    pub fn is_lab(self) -> bool {
        matches!(self, AllocKind::Tlab | AllocKind::GcLab)
    }

    pub fn name(self) -> &'static str {
        match self {
            AllocKind::Tlab => "TLAB",
            AllocKind::SharedMutator => "shared",
            AllocKind::GcLab => "GCLAB",
            AllocKind::SharedGc => "shared GC",
        }
    }
}

/// A single allocation request.
///
/// Sizes are in heap words. LAB requests may be satisfied with less than
/// `size_words` but never less than `min_size_words`; the granted size is
/// recorded in `actual_size_words`. `in_new_region` reports whether the
/// allocation started a previously empty region.
#[derive(Debug, Clone)]
pub struct AllocRequest {
    kind: AllocKind,
    size_words: Size,
    min_size_words: Size,
    actual_size_words: Size,
    in_new_region: bool,
}

impl AllocRequest {
    pub fn tlab(size_words: Size, min_size_words: Size) -> Self {
        Self::new(AllocKind::Tlab, size_words, min_size_words)
    }

    pub fn shared(size_words: Size) -> Self {
        Self::new(AllocKind::SharedMutator, size_words, size_words)
    }

    pub fn gclab(size_words: Size, min_size_words: Size) -> Self {
        Self::new(AllocKind::GcLab, size_words, min_size_words)
    }

    pub fn shared_gc(size_words: Size) -> Self {
        Self::new(AllocKind::SharedGc, size_words, size_words)
    }

    fn new(kind: AllocKind, size_words: Size, min_size_words: Size) -> Self {
        assert!(size_words > 0, "empty allocation request");
        assert!(
            min_size_words <= size_words,
            "minimum size {min_size_words} exceeds requested size {size_words}"
        );
        Self {
            kind,
            size_words,
            min_size_words,
            actual_size_words: 0,
            in_new_region: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> AllocKind {
        self.kind
    }

    #[inline]
    pub fn size_words(&self) -> Size {
        self.size_words
    }

    #[inline]
    pub fn min_size_words(&self) -> Size {
        self.min_size_words
    }

    /// Granted size; meaningful only after a successful allocation
    #[inline]
    pub fn actual_size_words(&self) -> Size {
        self.actual_size_words
    }

    /// Did the allocation start a previously empty region?
    #[inline]
    pub fn in_new_region(&self) -> bool {
        self.in_new_region
    }

    pub(crate) fn set_actual_size(&mut self, words: Size) {
        self.actual_size_words = words;
    }

    pub(crate) fn set_in_new_region(&mut self, value: bool) {
        self.in_new_region = value;
    }
}

/// Free-set configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("evacuation reserve must be 0-100 percent, got {0}")]
    ReserveOutOfRange(u32),

    #[error("evacuation waste factor must exceed 1.0, got {0}")]
    WasteFactorTooSmall(f64),

    #[error("humongous threshold must be non-zero")]
    HumongousThresholdZero,
}

/// Free-set tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeSetConfig {
    /// Target collector reserve as a percentage of maximum heap capacity
    pub evac_reserve_percent: u32,
    /// Controls the "too small to keep" retirement threshold after a failed
    /// allocation: `region_size * (1 - 1/evac_waste_factor)`
    pub evac_waste_factor: f64,
    /// Permit collector allocations to steal empty mutator regions when the
    /// reserve is exhausted
    pub evac_reserve_overflow: bool,
    /// Regions with less remaining capacity than this are retired outright
    /// and filtered out at rebuild
    pub plab_min_size_bytes: Size,
    /// Requests above this size take the contiguous multi-region path
    pub humongous_threshold_words: Size,
}

impl Default for FreeSetConfig {
    fn default() -> Self {
        Self {
            evac_reserve_percent: limits::DEFAULT_EVAC_RESERVE_PERCENT,
            evac_waste_factor: limits::DEFAULT_EVAC_WASTE_FACTOR,
            evac_reserve_overflow: limits::DEFAULT_EVAC_RESERVE_OVERFLOW,
            plab_min_size_bytes: limits::DEFAULT_PLAB_MIN_SIZE_BYTES,
            humongous_threshold_words: limits::DEFAULT_HUMONGOUS_THRESHOLD_WORDS,
        }
    }
}

impl FreeSetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evac_reserve_percent > 100 {
            return Err(ConfigError::ReserveOutOfRange(self.evac_reserve_percent));
        }
        if self.evac_waste_factor <= 1.0 {
            return Err(ConfigError::WasteFactorTooSmall(self.evac_waste_factor));
        }
        if self.humongous_threshold_words == 0 {
            return Err(ConfigError::HumongousThresholdZero);
        }
        Ok(())
    }

    pub fn with_evac_reserve_percent(mut self, percent: u32) -> Self {
        self.evac_reserve_percent = percent;
        self
    }

    pub fn with_evac_waste_factor(mut self, factor: f64) -> Self {
        self.evac_waste_factor = factor;
        self
    }

    pub fn with_evac_reserve_overflow(mut self, allowed: bool) -> Self {
        self.evac_reserve_overflow = allowed;
        self
    }

    pub fn with_plab_min_size_bytes(mut self, bytes: Size) -> Self {
        self.plab_min_size_bytes = bytes;
        self
    }

    pub fn with_humongous_threshold_words(mut self, words: Size) -> Self {
        self.humongous_threshold_words = words;
        self
    }

    /// Bytes below which a region is not worth keeping after an allocation
    /// failed in it
    pub(crate) fn waste_threshold_bytes(&self, region_size_bytes: Size) -> Size {
        (region_size_bytes as f64 * (1.0 - 1.0 / self.evac_waste_factor)) as Size
    }
}

/// Point-in-time snapshot of the free set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FreeSetStats {
    pub mutator_capacity: Size,
    pub mutator_used: Size,
    pub mutator_available: Size,
    pub mutator_regions: usize,
    pub collector_capacity: Size,
    pub collector_used: Size,
    pub collector_available: Size,
    pub collector_regions: usize,
    pub internal_fragmentation: f64,
    pub external_fragmentation: f64,
}
