//! Cache Statistics Module
//!
//! Tracks read outcomes, tolerated partial-write inconsistencies and the
//! regeneration pipeline.

use serde::Serialize;

// == Cache Stats ==
/// Counters maintained by the ISR cache engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads served from cache (fresh or stale)
    pub hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Hits served past their revalidation deadline
    pub stale_hits: u64,
    /// Metadata rows found without a blob
    pub orphaned_reads: u64,
    /// Reads that failed on storage errors and degraded to a miss
    pub read_errors: u64,
    /// Stale reads that started a regeneration
    pub regenerations_scheduled: u64,
    /// Stale reads that found a regeneration already in flight locally
    pub regenerations_deduplicated: u64,
    /// Regenerations skipped because another instance holds the claim
    pub regenerations_skipped: u64,
    /// Regenerations that wrote a fresh entry
    pub regenerations_completed: u64,
    /// Regenerations that failed
    pub regenerations_failed: u64,
    /// Entries removed by delete or revalidation
    pub invalidated_entries: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self, stale: bool) {
        self.hits += 1;
        if stale {
            self.stale_hits += 1;
        }
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// An orphaned read is also a miss.
    pub fn record_orphaned_read(&mut self) {
        self.orphaned_reads += 1;
        self.misses += 1;
    }

    /// A failed read is also a miss.
    pub fn record_read_error(&mut self) {
        self.read_errors += 1;
        self.misses += 1;
    }

    pub fn record_regeneration_scheduled(&mut self) {
        self.regenerations_scheduled += 1;
    }

    pub fn record_regeneration_deduplicated(&mut self) {
        self.regenerations_deduplicated += 1;
    }

    pub fn record_regeneration_skipped(&mut self) {
        self.regenerations_skipped += 1;
    }

    pub fn record_regeneration_completed(&mut self) {
        self.regenerations_completed += 1;
    }

    pub fn record_regeneration_failed(&mut self) {
        self.regenerations_failed += 1;
    }

    pub fn record_invalidated(&mut self, count: u64) {
        self.invalidated_entries += count;
    }
}
