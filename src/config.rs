//! Configuration Module
//!
//! Handles loading and managing runtime configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{
    DEFAULT_CLAIM_TTL_SECS, DEFAULT_INDEX_BATCH_SIZE, DEFAULT_MAX_VALUE_SIZE,
    DEFAULT_RETENTION_SECS,
};
use crate::storage::object_storage::DEFAULT_ENDPOINT;

/// Build id used when neither the environment nor a manifest provides one
pub const DEVELOPMENT_BUILD_ID: &str = "development";

/// Runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// Cloud stores are used only when their location is configured; otherwise the
/// runtime falls back to process-local stores.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Explicit build id, overrides the manifest
    pub build_id: Option<String>,
    /// Object Storage bucket for cached payloads
    pub cache_bucket: Option<String>,
    pub object_storage_endpoint: String,
    /// Document API endpoint of the metadata database
    pub docapi_endpoint: Option<String>,
    pub cache_table: String,
    /// IAM token passed to both stores
    pub iam_token: Option<String>,
    /// Shared secret for the revalidation endpoint
    pub revalidation_secret: Option<String>,
    pub index_batch_size: usize,
    pub retention_secs: u64,
    pub regeneration_lock_secs: u64,
    pub max_value_bytes: usize,
    /// Application origin used to regenerate stale pages
    pub app_origin: Option<String>,
    pub project_root: PathBuf,
    pub manifest_path: PathBuf,
    pub middleware_timeout_ms: u64,
    pub node_binary: String,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `BUILD_ID` - Build id (default: from manifest, else `development`)
    /// - `CACHE_BUCKET` - Object Storage bucket (default: in-memory blobs)
    /// - `OBJECT_STORAGE_ENDPOINT` - (default: https://storage.yandexcloud.net)
    /// - `YDB_DOCAPI_ENDPOINT` - Document API endpoint (default: in-memory metadata)
    /// - `CACHE_TABLE` - Document table (default: isr-cache)
    /// - `YC_IAM_TOKEN` - IAM token for cloud stores
    /// - `REVALIDATION_SECRET` - Revalidation shared secret (default: no check)
    /// - `INDEX_BATCH_SIZE` - Index rows per batch (default: 25)
    /// - `CACHE_RETENTION_SECS` - Outer retention TTL (default: 30 days)
    /// - `REGENERATION_LOCK_SECS` - Claim TTL (default: 30)
    /// - `MAX_VALUE_BYTES` - Payload limit (default: 10 MiB)
    /// - `APP_ORIGIN` - Origin for regeneration requests (default: none)
    /// - `PROJECT_ROOT` - Next.js project root (default: .)
    /// - `DEPLOY_MANIFEST` - Manifest path (default: {PROJECT_ROOT}/deploy-manifest.json)
    /// - `MIDDLEWARE_TIMEOUT_MS` - Middleware execution timeout (default: 5000)
    /// - `NODE_BINARY` - Native runtime for middleware fallback (default: node)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let project_root = optional("PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.project_root);
        let manifest_path = optional("DEPLOY_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| project_root.join("deploy-manifest.json"));

        Self {
            server_port: parsed("PORT").unwrap_or(defaults.server_port),
            build_id: optional("BUILD_ID"),
            cache_bucket: optional("CACHE_BUCKET"),
            object_storage_endpoint: optional("OBJECT_STORAGE_ENDPOINT")
                .unwrap_or(defaults.object_storage_endpoint),
            docapi_endpoint: optional("YDB_DOCAPI_ENDPOINT"),
            cache_table: optional("CACHE_TABLE").unwrap_or(defaults.cache_table),
            iam_token: optional("YC_IAM_TOKEN"),
            revalidation_secret: optional("REVALIDATION_SECRET"),
            index_batch_size: parsed("INDEX_BATCH_SIZE").unwrap_or(defaults.index_batch_size),
            retention_secs: parsed("CACHE_RETENTION_SECS").unwrap_or(defaults.retention_secs),
            regeneration_lock_secs: parsed("REGENERATION_LOCK_SECS")
                .unwrap_or(defaults.regeneration_lock_secs),
            max_value_bytes: parsed("MAX_VALUE_BYTES").unwrap_or(defaults.max_value_bytes),
            app_origin: optional("APP_ORIGIN"),
            project_root,
            manifest_path,
            middleware_timeout_ms: parsed("MIDDLEWARE_TIMEOUT_MS")
                .unwrap_or(defaults.middleware_timeout_ms),
            node_binary: optional("NODE_BINARY").unwrap_or(defaults.node_binary),
        }
    }

    pub fn middleware_timeout(&self) -> Duration {
        Duration::from_millis(self.middleware_timeout_ms)
    }
}

/// Non-empty environment value.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            build_id: None,
            cache_bucket: None,
            object_storage_endpoint: DEFAULT_ENDPOINT.to_string(),
            docapi_endpoint: None,
            cache_table: "isr-cache".to_string(),
            iam_token: None,
            revalidation_secret: None,
            index_batch_size: DEFAULT_INDEX_BATCH_SIZE,
            retention_secs: DEFAULT_RETENTION_SECS,
            regeneration_lock_secs: DEFAULT_CLAIM_TTL_SECS,
            max_value_bytes: DEFAULT_MAX_VALUE_SIZE,
            app_origin: None,
            project_root: PathBuf::from("."),
            manifest_path: PathBuf::from("./deploy-manifest.json"),
            middleware_timeout_ms: 5000,
            node_binary: "node".to_string(),
        }
    }
}
