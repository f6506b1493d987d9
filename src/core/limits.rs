/*!
 * Tunable Defaults
 *
 * Centralized location for the free-space manager's default thresholds.
 * All values include rationale comments explaining WHY they exist.
 */

/// Default evacuation reserve, in percent of maximum heap capacity
/// Memory set aside for the collector's evacuation buffers each cycle
pub const DEFAULT_EVAC_RESERVE_PERCENT: u32 = 5;

/// Default evacuation waste factor
/// A region whose remaining space is below `region_size * (1 - 1/factor)`
/// after a failed allocation is not worth keeping in the free set
pub const DEFAULT_EVAC_WASTE_FACTOR: f64 = 1.2;

/// Permit collector allocations to steal empty mutator regions by default
pub const DEFAULT_EVAC_RESERVE_OVERFLOW: bool = true;

/// Smallest buffer worth handing to an evacuating thread (2KB)
/// Regions with less remaining capacity are retired rather than scanned again
pub const DEFAULT_PLAB_MIN_SIZE_BYTES: usize = 2 * 1024;

/// Default humongous threshold (64K words = 512KB on 64-bit)
/// Requests above this size take the contiguous multi-region path
pub const DEFAULT_HUMONGOUS_THRESHOLD_WORDS: usize = 64 * 1024;

/// Allocation scan direction is reconsidered after this many single-region
/// allocations
/// [PERF] Recomputing the bias reads the empty-interval hints, which may walk
/// the bitmap; amortize that over a batch of allocations
pub const ALLOC_BIAS_WEIGHT: u32 = 256;

/// Width of one row of the free-set map log output, in regions
pub const STATUS_MAP_ROW: usize = 64;
