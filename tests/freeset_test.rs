/*!
 * Free-Set Tests
 * End-to-end allocation, rebuild, and reserve behavior over a simulated heap
 */

mod common;

use common::{RegionState, SimHeap};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use region_freeset::{AllocRequest, FreeSet, FreeSetConfig, PartitionId, RegionHost};
use std::sync::Arc;

/// 1 MiB regions on a 64-bit host
const REGION_WORDS: usize = 128 * 1024;
const REGION_BYTES: usize = REGION_WORDS * 8;

/// Region size 1 MiB, 16 regions, humongous threshold 512 KiB, evacuation
/// reserve 20%
fn scenario_config() -> FreeSetConfig {
    FreeSetConfig::default()
        .with_evac_reserve_percent(20)
        .with_humongous_threshold_words(64 * 1024)
}

fn scenario_freeset() -> (Arc<SimHeap>, FreeSet<SimHeap>) {
    let heap = SimHeap::new(16, REGION_WORDS);
    let freeset = FreeSet::with_config(Arc::clone(&heap), scenario_config()).unwrap();
    (heap, freeset)
}

#[test]
fn test_empty_rebuild() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 13);
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 3);
    assert_eq!(freeset.partitions().leftmost(PartitionId::Mutator), 0);
    assert_eq!(freeset.partitions().rightmost(PartitionId::Mutator), 12);
    assert_eq!(freeset.partitions().leftmost(PartitionId::Collector), 13);
    assert_eq!(freeset.partitions().rightmost(PartitionId::Collector), 15);
    assert_eq!(freeset.capacity(), 13 * REGION_BYTES);
    assert_eq!(freeset.used(), 0);
}

#[test]
fn test_tlab_allocation_from_empty() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    // 64 KiB TLAB with a 4 KiB floor
    let mut req = AllocRequest::tlab(8 * 1024, 512);
    let addr = freeset.allocate(&mut req);

    // Low-bias default: the allocation lands at the bottom of region 0.
    assert_eq!(addr, Some(0));
    assert!(req.in_new_region());
    assert_eq!(req.actual_size_words(), 8 * 1024);
    assert_eq!(freeset.used(), 64 * 1024);
}

#[test]
fn test_humongous_across_three_regions() {
    let (heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    // 2.5 MiB shared allocation spans three regions.
    let mut req = AllocRequest::shared(320 * 1024);
    let addr = freeset.allocate(&mut req);

    assert_eq!(addr, Some(0));
    assert!(req.in_new_region());
    assert_eq!(heap.state(0), RegionState::HumongousStart);
    assert_eq!(heap.state(1), RegionState::HumongousCont);
    assert_eq!(heap.state(2), RegionState::HumongousCont);
    assert_eq!(heap.top_words(0), REGION_WORDS);
    assert_eq!(heap.top_words(1), REGION_WORDS);
    // The trailing region holds only the 0.5 MiB remainder.
    assert_eq!(heap.top_words(2), 64 * 1024);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 10);
    assert_eq!(freeset.used(), 3 * REGION_BYTES);
}

#[test]
fn test_humongous_slides_past_partial_region() {
    let (heap, mut freeset) = scenario_freeset();
    // Region 1 is half consumed: 512 KiB of capacity left.
    heap.set_used_words(1, 64 * 1024);
    freeset.rebuild();

    // 2 MiB request needs two adjacent empty regions. The run search finds
    // [0, 1] first, but region 1 is not empty, so the window slides past it.
    let mut req = AllocRequest::shared(256 * 1024);
    let addr = freeset.allocate(&mut req);

    assert_eq!(addr, Some(freeset.host().bottom(2)));
    assert_eq!(heap.state(2), RegionState::HumongousStart);
    assert_eq!(heap.state(3), RegionState::HumongousCont);
    assert_eq!(heap.state(0), RegionState::Regular);
    assert_eq!(heap.state(1), RegionState::Regular);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 11);
}

#[test]
fn test_collector_steals_empty_mutator_region() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    // Exhaust the three-region reserve with GC allocations; each pair of
    // 512 KiB allocations fills one region, which is then retired.
    for _ in 0..6 {
        let mut req = AllocRequest::shared_gc(64 * 1024);
        assert!(freeset.allocate(&mut req).is_some());
    }
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 0);

    // The next GC request scans mutator empties from the right and flips
    // region 12 into the collector partition.
    let mut req = AllocRequest::shared_gc(64 * 1024);
    let addr = freeset.allocate(&mut req);

    assert_eq!(addr, Some(freeset.host().bottom(12)));
    assert_eq!(
        freeset.partitions().membership(12),
        Some(PartitionId::Collector)
    );
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 1);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 12);
}

#[test]
fn test_collector_steal_disabled_by_config() {
    let heap = SimHeap::new(16, REGION_WORDS);
    let config = scenario_config().with_evac_reserve_overflow(false);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();

    for _ in 0..6 {
        let mut req = AllocRequest::shared_gc(64 * 1024);
        assert!(freeset.allocate(&mut req).is_some());
    }

    let mut req = AllocRequest::shared_gc(64 * 1024);
    assert_eq!(freeset.allocate(&mut req), None);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 13);
}

#[test]
fn test_retirement_credits_padding_as_used() {
    let heap = SimHeap::new(16, REGION_WORDS);
    // Keep region 0 as the only member, let it be drained to a 16-byte tail,
    // and keep such a small tail below nothing but the failure threshold.
    for idx in 1..16 {
        heap.forbid_alloc(idx);
    }
    let config = FreeSetConfig::default()
        .with_evac_reserve_percent(0)
        .with_plab_min_size_bytes(16)
        .with_humongous_threshold_words(REGION_WORDS);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 1);

    // Drain the region down to 16 bytes.
    let mut req = AllocRequest::shared(REGION_WORDS - 2);
    assert!(freeset.allocate(&mut req).is_some());
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 1);

    // A 1 KiB request fails in it; the region is retired and the 16-byte
    // tail is credited to the mutator partition as used padding.
    let before = freeset.used();
    let mut req = AllocRequest::shared(128);
    assert_eq!(freeset.allocate(&mut req), None);

    assert_eq!(freeset.used(), before + 16);
    assert_eq!(freeset.used(), REGION_BYTES);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 0);
    assert!(freeset.partitions().membership(0).is_none());
    // Retirement leaves the region's capacity in its origin partition.
    assert_eq!(freeset.capacity(), REGION_BYTES);
}

#[test]
#[should_panic]
fn test_humongous_lab_request_panics() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    let mut req = AllocRequest::tlab(128 * 1024, 1024);
    freeset.allocate(&mut req);
}

#[test]
fn test_mutator_never_falls_back_to_collector() {
    let heap = SimHeap::new(4, REGION_WORDS);
    let config = FreeSetConfig::default()
        .with_evac_reserve_percent(50)
        .with_humongous_threshold_words(REGION_WORDS);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 2);
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 2);

    // Fill both mutator regions; each is retired once full.
    for _ in 0..2 {
        let mut req = AllocRequest::shared(REGION_WORDS);
        assert!(freeset.allocate(&mut req).is_some());
    }
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 0);

    // The mutator view is exhausted; the collector reserve is off limits.
    let mut req = AllocRequest::shared(128);
    assert_eq!(freeset.allocate(&mut req), None);
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 2);
}

#[test]
fn test_lab_request_shrinks_to_region() {
    let heap = SimHeap::new(16, REGION_WORDS);
    for idx in 1..16 {
        heap.forbid_alloc(idx);
    }
    // Region 0 has 4096 words left.
    heap.set_used_words(0, REGION_WORDS - 4096);
    let config = FreeSetConfig::default().with_evac_reserve_percent(0);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();

    let mut req = AllocRequest::tlab(8192, 1024);
    let addr = freeset.allocate(&mut req);

    assert_eq!(addr, Some(REGION_WORDS - 4096));
    assert_eq!(req.actual_size_words(), 4096);
    // Nothing remains; the region is retired.
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 0);
}

#[test]
fn test_gclab_below_floor_fails_and_retires() {
    let heap = SimHeap::new(2, REGION_WORDS);
    heap.fill(0);
    // Region 1 has 512 words left, below the request floor.
    heap.set_used_words(1, REGION_WORDS - 512);
    let config = FreeSetConfig::default().with_evac_reserve_percent(100);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 1);

    let mut req = AllocRequest::gclab(8192, 1024);
    assert_eq!(freeset.allocate(&mut req), None);

    // The failed shrink leaves too little to keep; the region is retired.
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 0);
    assert!(!freeset.partitions().in_partition(1, PartitionId::Collector));
}

#[test]
fn test_trash_recycled_on_allocation() {
    let heap = SimHeap::new(16, REGION_WORDS);
    for idx in 0..16 {
        if idx != 2 {
            heap.forbid_alloc(idx);
        }
    }
    heap.fill(2);
    heap.make_trash(2);
    let config = FreeSetConfig::default().with_evac_reserve_percent(0);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();

    let cset_regions = freeset.prepare_to_rebuild();
    assert_eq!(cset_regions, 1);
    freeset.finish_rebuild(cset_regions);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 1);

    let mut req = AllocRequest::shared(64);
    let addr = freeset.allocate(&mut req);

    assert_eq!(addr, Some(freeset.host().bottom(2)));
    assert!(req.in_new_region());
    assert!(!heap.is_trash(2));
    assert_eq!(heap.top_words(2), 64);
}

#[test]
fn test_trash_skipped_during_weak_root_processing() {
    let heap = SimHeap::new(16, REGION_WORDS);
    for idx in 0..16 {
        if idx != 2 {
            heap.forbid_alloc(idx);
        }
    }
    heap.fill(2);
    heap.make_trash(2);
    let config = FreeSetConfig::default().with_evac_reserve_percent(0);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();

    heap.set_weak_roots_in_progress(true);
    let mut req = AllocRequest::shared(64);
    assert_eq!(freeset.allocate(&mut req), None);
    // The region is skipped, not retired.
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 1);

    heap.set_weak_roots_in_progress(false);
    let mut req = AllocRequest::shared(64);
    assert!(freeset.allocate(&mut req).is_some());
}

#[test]
fn test_recycle_trash_sweeps_all_regions() {
    let heap = SimHeap::new(16, REGION_WORDS);
    for idx in [3, 7, 11] {
        heap.fill(idx);
        heap.make_trash(idx);
    }
    let freeset = FreeSet::with_config(Arc::clone(&heap), scenario_config()).unwrap();
    let freeset = Mutex::new(freeset);

    FreeSet::recycle_trash(&freeset);

    for idx in [3, 7, 11] {
        assert!(!heap.is_trash(idx));
        assert_eq!(heap.top_words(idx), 0);
    }
}

#[test]
fn test_move_collector_regions_back_to_mutator() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    // Half-fill the highest reserve region so one move goes through the
    // non-empty phase.
    let mut req = AllocRequest::shared_gc(64 * 1024);
    assert!(freeset.allocate(&mut req).is_some());

    let freeset = Mutex::new(freeset);
    FreeSet::move_regions_from_collector_to_mutator(&freeset, 16);

    let freeset = freeset.into_inner();
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 0);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 16);
    assert_eq!(
        freeset.partitions().membership(15),
        Some(PartitionId::Mutator)
    );
}

#[test]
fn test_move_collector_regions_respects_transfer_cap() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 3);

    let freeset = Mutex::new(freeset);
    FreeSet::move_regions_from_collector_to_mutator(&freeset, 2);

    let freeset = freeset.into_inner();
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 1);
    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 15);
}

#[test]
fn test_rebuild_is_idempotent() {
    let heap = SimHeap::new(16, REGION_WORDS);
    heap.set_used_words(3, 1000);
    heap.fill(5);
    heap.make_trash(5);
    heap.forbid_alloc(9);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), scenario_config()).unwrap();

    freeset.rebuild();
    let first: Vec<_> = (0..16).map(|idx| freeset.partitions().membership(idx)).collect();
    let first_counts = (
        freeset.partitions().count(PartitionId::Mutator),
        freeset.partitions().count(PartitionId::Collector),
        freeset.capacity(),
        freeset.used(),
    );

    freeset.rebuild();
    let second: Vec<_> = (0..16).map(|idx| freeset.partitions().membership(idx)).collect();
    let second_counts = (
        freeset.partitions().count(PartitionId::Mutator),
        freeset.partitions().count(PartitionId::Collector),
        freeset.capacity(),
        freeset.used(),
    );

    assert_eq!(first, second);
    assert_eq!(first_counts, second_counts);
}

#[test]
fn test_reserve_takes_everything_when_target_exceeds_heap() {
    let heap = SimHeap::new(4, REGION_WORDS);
    let config = FreeSetConfig::default().with_evac_reserve_percent(100);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();

    assert_eq!(freeset.partitions().count(PartitionId::Mutator), 0);
    assert_eq!(freeset.partitions().count(PartitionId::Collector), 4);
}

#[test]
fn test_allocation_bias_switches_to_fragmented_end() {
    let heap = SimHeap::new(16, REGION_WORDS);
    // Partially used regions cluster at the high end.
    heap.set_used_words(14, 1000);
    heap.set_used_words(15, 1000);
    let config = FreeSetConfig::default().with_evac_reserve_percent(0);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();

    // The initial bias is left to right; burn through the bias budget.
    for _ in 0..256 {
        let mut req = AllocRequest::tlab(256, 256);
        let addr = freeset.allocate(&mut req).unwrap();
        assert!(addr < REGION_WORDS, "expected low-address allocation");
    }

    // The next allocation reconsiders direction: the right side has more
    // partially used regions, so the scan now starts at region 15.
    let mut req = AllocRequest::tlab(256, 256);
    let addr = freeset.allocate(&mut req).unwrap();
    assert_eq!(addr / REGION_WORDS, 15);
}

#[test]
fn test_fragmentation_metrics() {
    let heap = SimHeap::new(16, REGION_WORDS);
    let config = FreeSetConfig::default().with_evac_reserve_percent(0);
    let mut freeset = FreeSet::with_config(Arc::clone(&heap), config).unwrap();
    freeset.rebuild();

    // Fully empty heap: no fragmentation of either kind.
    assert_eq!(freeset.internal_fragmentation(), 0.0);
    assert_eq!(freeset.external_fragmentation(), 0.0);

    // Half-use every even region: internal fragmentation is 1/2, and the
    // empty regions interleave so external fragmentation climbs to 7/8.
    for idx in (0..16).step_by(2) {
        heap.set_used_words(idx, REGION_WORDS / 2);
    }
    freeset.rebuild();
    assert!((freeset.internal_fragmentation() - 0.5).abs() < 1e-9);
    assert!((freeset.external_fragmentation() - 0.875).abs() < 1e-9);
}

#[test]
fn test_status_snapshot() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    let mut req = AllocRequest::tlab(8 * 1024, 512);
    freeset.allocate(&mut req).unwrap();

    let stats = freeset.status();
    assert_eq!(stats.mutator_regions, 13);
    assert_eq!(stats.collector_regions, 3);
    assert_eq!(stats.mutator_capacity, 13 * REGION_BYTES);
    assert_eq!(stats.mutator_used, 64 * 1024);
    assert_eq!(stats.collector_available, 3 * REGION_BYTES);

    let json = serde_json::to_string(&stats).unwrap();
    let back: region_freeset::FreeSetStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back.mutator_regions, 13);
}

#[test]
fn test_freeset_map_rendering() {
    let (_heap, mut freeset) = scenario_freeset();
    freeset.rebuild();

    let rows = freeset.render_map();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, 0);
    assert_eq!(rows[0].1, "MMMMMMMMMMMMMCCC");

    // A humongous object at the low end and a TLAB bite out of region 3.
    let mut req = AllocRequest::shared(320 * 1024);
    freeset.allocate(&mut req).unwrap();
    let mut req = AllocRequest::tlab(8 * 1024, 512);
    freeset.allocate(&mut req).unwrap();

    let rows = freeset.render_map();
    assert_eq!(rows[0].1, "hhhmMMMMMMMMMCCC");
}
