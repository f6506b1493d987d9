/*!
 * Test Heap
 * A minimal in-memory region host for exercising the free set
 */

#![allow(dead_code)]

use parking_lot::Mutex;
use region_freeset::{AllocKind, RegionHost};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-region state tracked by the simulated heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    Regular,
    HumongousStart,
    HumongousCont,
    Trash,
}

#[derive(Debug, Clone)]
struct Region {
    state: RegionState,
    top_words: usize,
    alloc_allowed: bool,
    update_watermark: usize,
}

/// Simulated heap: fixed-size regions with bump allocation, no real memory.
/// Addresses are word-granular; region `i` spans
/// `[i * region_size_words, (i + 1) * region_size_words)`.
pub struct SimHeap {
    regions: Mutex<Vec<Region>>,
    region_size_words: usize,
    weak_roots_in_progress: AtomicBool,
}

impl SimHeap {
    pub fn new(num_regions: usize, region_size_words: usize) -> Arc<Self> {
        let regions = vec![
            Region {
                state: RegionState::Regular,
                top_words: 0,
                alloc_allowed: true,
                update_watermark: 0,
            };
            num_regions
        ];
        Arc::new(Self {
            regions: Mutex::new(regions),
            region_size_words,
            weak_roots_in_progress: AtomicBool::new(false),
        })
    }

    pub fn set_weak_roots_in_progress(&self, value: bool) {
        self.weak_roots_in_progress.store(value, Ordering::Relaxed);
    }

    /// Mark the region as used up to `words` past its bottom
    pub fn set_used_words(&self, idx: usize, words: usize) {
        assert!(words <= self.region_size_words);
        self.regions.lock()[idx].top_words = words;
    }

    pub fn fill(&self, idx: usize) {
        self.set_used_words(idx, self.region_size_words);
    }

    pub fn make_trash(&self, idx: usize) {
        let mut regions = self.regions.lock();
        regions[idx].state = RegionState::Trash;
    }

    pub fn forbid_alloc(&self, idx: usize) {
        self.regions.lock()[idx].alloc_allowed = false;
    }

    pub fn state(&self, idx: usize) -> RegionState {
        self.regions.lock()[idx].state
    }

    pub fn top_words(&self, idx: usize) -> usize {
        self.regions.lock()[idx].top_words
    }

    pub fn update_watermark(&self, idx: usize) -> usize {
        self.regions.lock()[idx].update_watermark
    }
}

impl RegionHost for SimHeap {
    fn num_regions(&self) -> usize {
        self.regions.lock().len()
    }

    fn region_size_bytes(&self) -> usize {
        self.region_size_words * std::mem::size_of::<usize>()
    }

    fn region_size_words(&self) -> usize {
        self.region_size_words
    }

    fn min_object_alignment_words(&self) -> usize {
        1
    }

    fn max_capacity(&self) -> usize {
        self.num_regions() * self.region_size_bytes()
    }

    fn is_concurrent_weak_root_in_progress(&self) -> bool {
        self.weak_roots_in_progress.load(Ordering::Relaxed)
    }

    fn alloc_capacity(&self, idx: usize) -> usize {
        let regions = self.regions.lock();
        match regions[idx].state {
            RegionState::Trash => self.region_size_bytes(),
            RegionState::HumongousStart | RegionState::HumongousCont => 0,
            RegionState::Regular => {
                (self.region_size_words - regions[idx].top_words) * std::mem::size_of::<usize>()
            }
        }
    }

    fn is_empty(&self, idx: usize) -> bool {
        let regions = self.regions.lock();
        regions[idx].state == RegionState::Regular && regions[idx].top_words == 0
    }

    fn is_trash(&self, idx: usize) -> bool {
        self.regions.lock()[idx].state == RegionState::Trash
    }

    fn is_alloc_allowed(&self, idx: usize) -> bool {
        let regions = self.regions.lock();
        regions[idx].state == RegionState::Regular && regions[idx].alloc_allowed
    }

    fn is_humongous(&self, idx: usize) -> bool {
        matches!(
            self.regions.lock()[idx].state,
            RegionState::HumongousStart | RegionState::HumongousCont
        )
    }

    fn allocate_in_region(&self, idx: usize, words: usize, _kind: AllocKind) -> Option<usize> {
        let mut regions = self.regions.lock();
        let region = &mut regions[idx];
        assert_eq!(region.state, RegionState::Regular, "allocation in unrecycled region");
        if words <= self.region_size_words - region.top_words {
            let addr = idx * self.region_size_words + region.top_words;
            region.top_words += words;
            Some(addr)
        } else {
            None
        }
    }

    fn recycle(&self, idx: usize) {
        let mut regions = self.regions.lock();
        regions[idx].state = RegionState::Regular;
        regions[idx].top_words = 0;
        regions[idx].update_watermark = 0;
    }

    fn make_humongous_start(&self, idx: usize) {
        self.regions.lock()[idx].state = RegionState::HumongousStart;
    }

    fn make_humongous_cont(&self, idx: usize) {
        self.regions.lock()[idx].state = RegionState::HumongousCont;
    }

    fn bottom(&self, idx: usize) -> usize {
        idx * self.region_size_words
    }

    fn top(&self, idx: usize) -> usize {
        let regions = self.regions.lock();
        idx * self.region_size_words + regions[idx].top_words
    }

    fn set_top(&self, idx: usize, words: usize) {
        self.regions.lock()[idx].top_words = words;
    }

    fn set_update_watermark(&self, idx: usize, addr: usize) {
        self.regions.lock()[idx].update_watermark = addr;
    }
}
