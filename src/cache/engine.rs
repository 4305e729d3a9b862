//! ISR Cache Engine
//!
//! Single source of truth for cached render output. Each operation is a short,
//! independently committed unit of work against the blob store and the
//! metadata store; no lock is held across operations.
//!
//! Write order inside `set` is blob → metadata → index rows, so a concurrent
//! reader can observe a blob without metadata (unreachable, harmless) but never
//! metadata of a successful `set` without its blob.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{
    current_timestamp_ms, keys, CacheStats, CachedResponse, EntryMetadata, SetOptions,
    DEFAULT_CLAIM_TTL_SECS, DEFAULT_INDEX_BATCH_SIZE, DEFAULT_MAX_VALUE_SIZE,
    DEFAULT_RETENTION_SECS, MAX_KEY_LENGTH,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::storage::{BlobStore, IndexRow, MemoryBlobStore, MemoryMetadataStore, MetadataStore};
use crate::tasks::{spawn_regeneration, InFlightRegenerations, Regenerator};

// == Cache Settings ==
/// Tunables of the cache engine.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Deployment namespace for keys
    pub build_id: String,
    /// Maximum index rows per batch write
    pub index_batch_size: usize,
    /// Outer retention TTL written on metadata and index rows
    pub retention: Duration,
    /// Lifetime of a regeneration claim
    pub claim_ttl: Duration,
    /// Maximum payload size accepted by `set`
    pub max_value_size: usize,
}

impl CacheSettings {
    /// Settings with defaults for `build_id`, which must not contain `#`.
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            index_batch_size: DEFAULT_INDEX_BATCH_SIZE,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            claim_ttl: Duration::from_secs(DEFAULT_CLAIM_TTL_SECS),
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }

    /// Settings from server configuration, namespaced by `build_id`.
    ///
    /// Fails when `build_id` cannot be encoded into metadata partition keys.
    pub fn from_config(config: &Config, build_id: impl Into<String>) -> Result<Self> {
        let build_id = build_id.into();
        keys::validate_build_id(&build_id)?;
        Ok(Self {
            build_id,
            index_batch_size: config.index_batch_size.max(1),
            retention: Duration::from_secs(config.retention_secs),
            claim_ttl: Duration::from_secs(config.regeneration_lock_secs),
            max_value_size: config.max_value_bytes,
        })
    }

    pub fn with_index_batch_size(mut self, size: usize) -> Self {
        self.index_batch_size = size.max(1);
        self
    }
}

// == ISR Cache ==
/// Cache engine shared by the render pipeline, the revalidation API and
/// background regeneration tasks. Cloning is cheap.
#[derive(Clone)]
pub struct IsrCache {
    settings: Arc<CacheSettings>,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    stats: Arc<RwLock<CacheStats>>,
    in_flight: InFlightRegenerations,
    regenerator: Option<Arc<dyn Regenerator>>,
}

impl IsrCache {
    // == Constructor ==
    pub fn new(
        settings: CacheSettings,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            blobs,
            metadata,
            stats: Arc::new(RwLock::new(CacheStats::new())),
            in_flight: InFlightRegenerations::new(),
            regenerator: None,
        }
    }

    /// Engine over process-local stores.
    pub fn in_memory(build_id: impl Into<String>) -> Self {
        Self::new(
            CacheSettings::new(build_id),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryMetadataStore::new()),
        )
    }

    /// Installs the regenerator invoked for stale entries.
    pub fn with_regenerator(mut self, regenerator: Arc<dyn Regenerator>) -> Self {
        self.regenerator = Some(regenerator);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn build_id(&self) -> &str {
        &self.settings.build_id
    }

    // == Get ==
    /// Reads an entry.
    ///
    /// Never fails: a missing metadata row, a missing blob and any storage
    /// error all resolve to `None`. Stale entries are still returned, after a
    /// regeneration signal has been emitted.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        match self.read(key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, treating as miss");
                self.stats.write().await.record_read_error();
                None
            }
        }
    }

    async fn read(&self, key: &str) -> Result<Option<CachedResponse>> {
        let partition = keys::metadata_partition(&self.settings.build_id, key);

        // Metadata first: a miss here costs no blob read
        let Some(metadata) = self.metadata.get_metadata(&partition).await? else {
            self.stats.write().await.record_miss();
            return Ok(None);
        };

        let is_stale = metadata.is_stale_at(current_timestamp_ms());
        if is_stale {
            self.signal_regeneration(key).await;
        }

        let Some(value) = self.blobs.get(&metadata.blob_key).await? else {
            debug!(key, blob = %metadata.blob_key, "metadata without blob, treating as miss");
            self.stats.write().await.record_orphaned_read();
            return Ok(None);
        };

        self.stats.write().await.record_hit(is_stale);
        Ok(Some(CachedResponse::from_parts(metadata, value, is_stale)))
    }

    // == Set ==
    /// Writes an entry: blob, then metadata, then index rows in batches.
    ///
    /// A failure after the blob write leaves the blob behind; it is
    /// unreachable without metadata and reclaimed by bucket lifecycle rules.
    pub async fn set(&self, key: &str, value: Vec<u8>, options: SetOptions) -> Result<()> {
        self.validate(key, &value, &options)?;

        let build_id = &self.settings.build_id;
        let now = current_timestamp_ms();
        let expires_at = now / 1000 + self.settings.retention.as_secs();
        let blob_key = keys::blob_key(build_id, key);
        let partition = keys::metadata_partition(build_id, key);

        self.blobs.put(&blob_key, value).await?;

        let mut seen = BTreeSet::new();
        let tags: Vec<String> = options
            .tags
            .into_iter()
            .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
            .collect();
        let path = options
            .path
            .or_else(|| key.starts_with('/').then(|| key.to_string()));

        let metadata = EntryMetadata {
            key: key.to_string(),
            build_id: build_id.clone(),
            path: path.clone(),
            headers: options.headers,
            status: options.status.unwrap_or(200),
            tags: tags.clone(),
            revalidate_after: options.revalidate_after,
            last_modified: now,
            expires_at,
            blob_key,
        };
        self.metadata.put_metadata(&partition, &metadata).await?;

        let mut rows: Vec<IndexRow> = tags
            .iter()
            .map(|tag| IndexRow::new(keys::tag_partition(tag), partition.clone(), expires_at))
            .collect();
        if let Some(path) = &path {
            rows.push(IndexRow::new(
                keys::path_partition(path),
                partition.clone(),
                expires_at,
            ));
        }
        for chunk in rows.chunks(self.settings.index_batch_size.max(1)) {
            self.metadata.put_index_rows(chunk).await?;
        }

        debug!(key, tags = tags.len(), "cache entry written");
        Ok(())
    }

    fn validate(&self, key: &str, value: &[u8], options: &SetOptions) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if value.len() > self.settings.max_value_size {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                self.settings.max_value_size
            )));
        }
        if let Some(status) = options.status {
            if !(100..=599).contains(&status) {
                return Err(CacheError::InvalidRequest(format!(
                    "Invalid status code {}",
                    status
                )));
            }
        }
        Ok(())
    }

    // == Delete ==
    /// Deletes the blob, then the metadata row. Missing entries are a no-op.
    ///
    /// Index rows pointing at the key are left behind; lookups through them
    /// resolve to independent misses.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let build_id = self.settings.build_id.clone();
        self.delete_entry(&build_id, key).await?;
        Ok(())
    }

    async fn delete_entry(&self, build_id: &str, key: &str) -> Result<bool> {
        self.blobs.delete(&keys::blob_key(build_id, key)).await?;
        let existed = self
            .metadata
            .delete_metadata(&keys::metadata_partition(build_id, key))
            .await?;
        if existed {
            self.stats.write().await.record_invalidated(1);
        }
        Ok(existed)
    }

    // == Revalidate ==
    /// Deletes every entry indexed under `path`. Returns how many existed.
    pub async fn revalidate_path(&self, path: &str) -> Result<u64> {
        let removed = self.invalidate_index(&keys::path_partition(path)).await?;
        info!(path, removed, "path revalidated");
        Ok(removed)
    }

    /// Deletes every entry carrying `tag`. Returns how many existed.
    pub async fn revalidate_tag(&self, tag: &str) -> Result<u64> {
        let removed = self.invalidate_index(&keys::tag_partition(tag)).await?;
        info!(tag, removed, "tag revalidated");
        Ok(removed)
    }

    async fn invalidate_index(&self, partition: &str) -> Result<u64> {
        let rows = self.metadata.query_index(partition).await?;
        let mut removed = 0;

        // Rows carry the build that wrote them, so older builds are cleared too
        for row in rows {
            let Some((build_id, key)) = keys::split_metadata_partition(&row.entry) else {
                warn!(partition, entry = %row.entry, "skipping malformed index row");
                continue;
            };
            if self.delete_entry(build_id, key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    // == Regeneration ==
    /// Starts at most one background regeneration per key in this process.
    async fn signal_regeneration(&self, key: &str) {
        if self.regenerator.is_none() {
            debug!(key, "entry is stale but no regenerator is configured");
            return;
        }
        match self.in_flight.acquire(key) {
            Some(guard) => {
                self.stats.write().await.record_regeneration_scheduled();
                debug!(key, "stale entry, scheduling regeneration");
                spawn_regeneration(self.clone(), key.to_string(), guard);
            }
            None => {
                self.stats.write().await.record_regeneration_deduplicated();
                debug!(key, "regeneration already in flight");
            }
        }
    }

    /// Body of a regeneration task: claim, regenerate, write, release.
    pub(crate) async fn regenerate(&self, key: &str) {
        let Some(regenerator) = self.regenerator.clone() else {
            info!(key, "entry is stale but no regenerator is configured");
            return;
        };

        let claim = keys::claim_partition(&self.settings.build_id, key);
        let token = Uuid::new_v4().to_string();
        match self
            .metadata
            .try_claim(&claim, &token, self.settings.claim_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(key, "regeneration claimed by another instance");
                self.stats.write().await.record_regeneration_skipped();
                return;
            }
            Err(err) => {
                warn!(key, error = %err, "could not claim regeneration");
                self.stats.write().await.record_regeneration_failed();
                return;
            }
        }

        let outcome = self.run_regenerator(regenerator.as_ref(), key).await;

        if let Err(err) = self.metadata.release_claim(&claim, &token).await {
            warn!(key, error = %err, "could not release regeneration claim");
        }

        match outcome {
            Ok(written) => {
                info!(key, written, "regeneration finished");
                self.stats.write().await.record_regeneration_completed();
            }
            Err(err) => {
                warn!(key, error = %err, "regeneration failed, stale entry kept");
                self.stats.write().await.record_regeneration_failed();
            }
        }
    }

    async fn run_regenerator(&self, regenerator: &dyn Regenerator, key: &str) -> Result<bool> {
        let page = regenerator
            .regenerate(key)
            .await
            .map_err(|err| CacheError::Internal(format!("regenerator failed: {err:#}")))?;

        match page {
            Some(page) => {
                self.set(key, page.value, page.options).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
