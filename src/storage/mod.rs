//! Storage backends for the ISR cache
//!
//! The cache keeps payloads and metadata in two physically separate services:
//! a blob store (object storage) and a document store holding metadata rows,
//! tag/path index rows and regeneration claim rows.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::EntryMetadata;

pub mod document_api;
pub mod memory;
pub mod object_storage;

pub use document_api::DocumentApiMetadataStore;
pub use memory::{MemoryBlobStore, MemoryMetadataStore};
pub use object_storage::ObjectStorageBlobStore;

// == Storage Error ==
#[derive(Error, Debug)]
pub enum StorageError {
    /// Transport failure talking to a remote store
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store answered with a non-success status
    #[error("{service} returned {status} ({code}): {message}")]
    Status {
        service: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    /// Remote store answered with a body we could not interpret
    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single index write exceeded the store's fan-out limit
    #[error("Batch of {size} rows exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Store is unreachable or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

// == Index Row ==
/// Secondary index row: `(partition, entry)` where `entry` is the metadata
/// partition key of the indexed cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexRow {
    pub partition: String,
    pub entry: String,
    /// Retention deadline (Unix seconds)
    pub expires_at: u64,
}

impl IndexRow {
    pub fn new(partition: impl Into<String>, entry: impl Into<String>, expires_at: u64) -> Self {
        Self {
            partition: partition.into(),
            entry: entry.into(),
            expires_at,
        }
    }
}

// == Blob Store ==
/// Content store for cached payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns `None` when the object does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    fn name(&self) -> &'static str;
}

// == Metadata Store ==
/// Document store holding metadata rows, index rows and claim rows.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_metadata(&self, partition: &str) -> StorageResult<Option<EntryMetadata>>;

    async fn put_metadata(&self, partition: &str, metadata: &EntryMetadata) -> StorageResult<()>;

    /// Returns whether a row existed.
    async fn delete_metadata(&self, partition: &str) -> StorageResult<bool>;

    /// Writes one batch of index rows. Callers chunk to the store's fan-out limit.
    async fn put_index_rows(&self, rows: &[IndexRow]) -> StorageResult<()>;

    /// All index rows under a partition.
    async fn query_index(&self, partition: &str) -> StorageResult<Vec<IndexRow>>;

    /// Takes a short-lived claim. Returns false if someone else holds an
    /// unexpired claim on the same row.
    async fn try_claim(&self, claim: &str, token: &str, ttl: Duration) -> StorageResult<bool>;

    /// Releases a claim if it is still held with `token`.
    async fn release_claim(&self, claim: &str, token: &str) -> StorageResult<()>;

    fn name(&self) -> &'static str;
}
