//! Cache Entry Module
//!
//! Defines the metadata row persisted per entry, the write options accepted by
//! `set`, and the response handed back to the render pipeline on a hit.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// == Entry Metadata ==
/// Metadata row stored in the document store for a single cache entry.
///
/// The payload itself lives in the blob store under `blob_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Logical cache key
    pub key: String,
    /// Deployment that produced the entry
    pub build_id: String,
    /// URL path the entry is indexed under, if any
    #[serde(default)]
    pub path: Option<String>,
    /// Response headers replayed verbatim
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response status replayed verbatim
    pub status: u16,
    /// Invalidation labels attached at write time
    #[serde(default)]
    pub tags: Vec<String>,
    /// Staleness deadline (Unix milliseconds), None = never stale
    #[serde(default)]
    pub revalidate_after: Option<u64>,
    /// Write time (Unix milliseconds)
    pub last_modified: u64,
    /// Outer retention deadline for the storage layer (Unix seconds)
    pub expires_at: u64,
    /// Content store key holding the payload
    pub blob_key: String,
}

impl EntryMetadata {
    // == Is Stale ==
    /// Checks whether the entry is past its revalidation deadline.
    ///
    /// An entry is stale only once `now` is strictly greater than the deadline.
    /// Entries without a deadline are never stale.
    pub fn is_stale_at(&self, now_ms: u64) -> bool {
        match self.revalidate_after {
            Some(deadline) => now_ms > deadline,
            None => false,
        }
    }
}

// == Set Options ==
/// Optional fields accepted by `IsrCache::set`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOptions {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Defaults to 200
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Absolute staleness deadline (Unix milliseconds)
    #[serde(default)]
    pub revalidate_after: Option<u64>,
    /// Path index override; keys starting with `/` are indexed under themselves
    #[serde(default)]
    pub path: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_revalidate_after(mut self, deadline_ms: u64) -> Self {
        self.revalidate_after = Some(deadline_ms);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

// == Cached Response ==
/// A cache hit, as returned by `IsrCache::get`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub value: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub tags: Vec<String>,
    pub revalidate_after: Option<u64>,
    /// True when served past the revalidation deadline
    pub is_stale: bool,
}

impl CachedResponse {
    pub(crate) fn from_parts(metadata: EntryMetadata, value: Vec<u8>, is_stale: bool) -> Self {
        Self {
            value,
            headers: metadata.headers,
            status: metadata.status,
            tags: metadata.tags,
            revalidate_after: metadata.revalidate_after,
            is_stale,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
