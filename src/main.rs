//! Runtime server entry point
//!
//! Serves revalidation, cache-handler and middleware endpoints for a Next.js
//! deployment.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use reqwest::Client;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yc_next_runtime::cache::{CacheSettings, IsrCache};
use yc_next_runtime::config::{Config, DEVELOPMENT_BUILD_ID};
use yc_next_runtime::manifest::{CompatibilityMatrix, DeploymentManifest};
use yc_next_runtime::middleware::MiddlewareEmulator;
use yc_next_runtime::storage::{
    BlobStore, DocumentApiMetadataStore, MemoryBlobStore, MemoryMetadataStore, MetadataStore,
    ObjectStorageBlobStore,
};
use yc_next_runtime::tasks::HttpRegenerator;
use yc_next_runtime::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yc_next_runtime=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Next.js runtime");

    let config = Config::from_env();
    info!(
        "Configuration loaded: port={}, project_root={}, batch_size={}",
        config.server_port,
        config.project_root.display(),
        config.index_batch_size
    );

    let manifest = load_manifest(&config);
    let report = CompatibilityMatrix::global().check(&manifest);
    for warning in &report.warnings {
        warn!("{}", warning);
    }

    let build_id = config
        .build_id
        .clone()
        .unwrap_or_else(|| manifest.build_id.clone());
    info!(build_id = %build_id, next_version = ?manifest.next_version, "Deployment resolved");

    let client = Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let cache = build_cache(&config, &client, &manifest, build_id)?;

    let emulator = MiddlewareEmulator::from_manifest(&manifest, &config);
    info!(mode = ?emulator.mode(), "Middleware emulator ready");

    let state = AppState::new(cache, emulator)
        .with_revalidation_secret(config.revalidation_secret.clone());
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Manifest from disk, or a development manifest when the project has not
/// been built.
fn load_manifest(config: &Config) -> DeploymentManifest {
    match DeploymentManifest::discover(&config.manifest_path, &config.project_root) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!(error = %err, "No deployment manifest, running in development mode");
            let build_id = config.build_id.as_deref().unwrap_or(DEVELOPMENT_BUILD_ID);
            DeploymentManifest::development(build_id)
        }
    }
}

fn build_cache(
    config: &Config,
    client: &Client,
    manifest: &DeploymentManifest,
    build_id: String,
) -> anyhow::Result<IsrCache> {
    let settings = CacheSettings::from_config(config, build_id).context("Invalid build id")?;

    let blobs: Arc<dyn BlobStore> = match &config.cache_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, "Using object storage for cache payloads");
            Arc::new(ObjectStorageBlobStore::new(
                client.clone(),
                config.object_storage_endpoint.clone(),
                bucket.clone(),
                config.iam_token.clone(),
            ))
        }
        None => {
            warn!("CACHE_BUCKET not set, cache payloads are kept in memory");
            Arc::new(MemoryBlobStore::new())
        }
    };

    let metadata: Arc<dyn MetadataStore> = match &config.docapi_endpoint {
        Some(endpoint) => {
            info!(table = %config.cache_table, "Using document API for cache metadata");
            Arc::new(DocumentApiMetadataStore::new(
                client.clone(),
                endpoint.clone(),
                config.cache_table.clone(),
                config.iam_token.clone(),
            ))
        }
        None => {
            warn!("YDB_DOCAPI_ENDPOINT not set, cache metadata is kept in memory");
            Arc::new(MemoryMetadataStore::new())
        }
    };

    let cache = IsrCache::new(settings, blobs, metadata);
    let Some(origin) = &config.app_origin else {
        return Ok(cache);
    };

    info!(origin = %origin, "Background regeneration enabled");
    let mut regenerator = HttpRegenerator::new(client.clone(), origin.clone());
    match &manifest.preview_mode_id {
        Some(preview_mode_id) => regenerator = regenerator.with_preview_mode_id(preview_mode_id),
        None => warn!(
            "No previewModeId in the build, the origin may answer regeneration from its cache"
        ),
    }
    Ok(cache.with_regenerator(Arc::new(regenerator)))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
