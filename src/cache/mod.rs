//! Cache Module
//!
//! ISR cache engine: stale-while-revalidate reads, ordered writes across the
//! blob and metadata stores, and tag/path fan-out invalidation.

mod engine;
mod entry;
pub mod keys;
mod stats;


// Re-export public types
pub use engine::{CacheSettings, IsrCache};
pub use entry::{current_timestamp_ms, CachedResponse, EntryMetadata, SetOptions};
pub use stats::CacheStats;

// == Public Constants ==
/// Maximum allowed logical key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Default maximum payload size in bytes
pub const DEFAULT_MAX_VALUE_SIZE: usize = 10 * 1024 * 1024; // 10 MiB

/// Default index rows per batch write (document API fan-out limit)
pub const DEFAULT_INDEX_BATCH_SIZE: usize = 25;

/// Default outer retention TTL of metadata and index rows
pub const DEFAULT_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;

/// Default lifetime of a regeneration claim
pub const DEFAULT_CLAIM_TTL_SECS: u64 = 30;
