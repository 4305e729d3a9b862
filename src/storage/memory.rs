//! In-memory storage backends
//!
//! Fast but non-persistent: suitable for local development, single-instance
//! deployments without cloud resources, and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::{current_timestamp_ms, EntryMetadata};
use crate::storage::{BlobStore, IndexRow, MetadataStore, StorageError, StorageResult};

// == Memory Blob Store ==
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.objects.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// == Memory Metadata Store ==
#[derive(Default)]
struct Tables {
    metadata: HashMap<String, EntryMetadata>,
    index: HashMap<String, BTreeMap<String, u64>>,
    /// claim -> (token, expires at ms)
    claims: HashMap<String, (String, u64)>,
    batch_sizes: Vec<usize>,
}

/// Document store kept in process memory.
///
/// Mirrors the remote store's batch fan-out limit so chunking bugs surface
/// locally, and records the size of every index batch it accepts.
#[derive(Clone)]
pub struct MemoryMetadataStore {
    tables: Arc<RwLock<Tables>>,
    batch_limit: usize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::with_batch_limit(usize::MAX)
    }

    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            batch_limit,
        }
    }

    /// Sizes of accepted index batches, in write order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.tables.read().await.batch_sizes.clone()
    }

    pub async fn metadata_len(&self) -> usize {
        self.tables.read().await.metadata.len()
    }

    /// Distinct partitions currently holding index rows.
    pub async fn index_partitions(&self) -> BTreeSet<String> {
        self.tables.read().await.index.keys().cloned().collect()
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_metadata(&self, partition: &str) -> StorageResult<Option<EntryMetadata>> {
        Ok(self.tables.read().await.metadata.get(partition).cloned())
    }

    async fn put_metadata(&self, partition: &str, metadata: &EntryMetadata) -> StorageResult<()> {
        self.tables
            .write()
            .await
            .metadata
            .insert(partition.to_string(), metadata.clone());
        Ok(())
    }

    async fn delete_metadata(&self, partition: &str) -> StorageResult<bool> {
        Ok(self.tables.write().await.metadata.remove(partition).is_some())
    }

    async fn put_index_rows(&self, rows: &[IndexRow]) -> StorageResult<()> {
        if rows.len() > self.batch_limit {
            return Err(StorageError::BatchTooLarge {
                size: rows.len(),
                limit: self.batch_limit,
            });
        }

        let mut tables = self.tables.write().await;
        for row in rows {
            tables
                .index
                .entry(row.partition.clone())
                .or_default()
                .insert(row.entry.clone(), row.expires_at);
        }
        tables.batch_sizes.push(rows.len());
        Ok(())
    }

    async fn query_index(&self, partition: &str) -> StorageResult<Vec<IndexRow>> {
        let tables = self.tables.read().await;
        let rows = tables
            .index
            .get(partition)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(entry, expires_at)| IndexRow::new(partition, entry.clone(), *expires_at))
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn try_claim(&self, claim: &str, token: &str, ttl: Duration) -> StorageResult<bool> {
        let now = current_timestamp_ms();
        let mut tables = self.tables.write().await;

        if let Some((_, expires_at)) = tables.claims.get(claim) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        let expires_at = now + ttl.as_millis() as u64;
        tables
            .claims
            .insert(claim.to_string(), (token.to_string(), expires_at));
        Ok(true)
    }

    async fn release_claim(&self, claim: &str, token: &str) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let held_by_caller = tables
            .claims
            .get(claim)
            .map(|(holder, _)| holder == token)
            .unwrap_or(false);
        if held_by_caller {
            tables.claims.remove(claim);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
