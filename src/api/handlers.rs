//! API Handlers
//!
//! HTTP request handlers for revalidation, the cache-handler endpoints, the
//! gateway middleware endpoint, stats and health.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::cache::IsrCache;
use crate::error::{CacheError, Result};
use crate::middleware::{GatewayEvent, MiddlewareEmulator};
use crate::models::{
    CachePutRequest, CacheQuery, CacheWriteResponse, CachedEntryResponse, HealthResponse,
    MiddlewareDecision, RevalidateRequest, RevalidateResponse, RevalidationTarget, StatsResponse,
};

pub const SECRET_HEADER: &str = "x-revalidate-secret";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: IsrCache,
    pub emulator: Arc<MiddlewareEmulator>,
    /// Shared secret for revalidation; `None` disables the check
    pub revalidation_secret: Option<String>,
}

impl AppState {
    pub fn new(cache: IsrCache, emulator: MiddlewareEmulator) -> Self {
        Self {
            cache,
            emulator: Arc::new(emulator),
            revalidation_secret: None,
        }
    }

    pub fn with_revalidation_secret(mut self, secret: Option<String>) -> Self {
        self.revalidation_secret = secret.filter(|secret| !secret.is_empty());
        self
    }

    fn authorize(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = self.revalidation_secret.as_deref() else {
            return Ok(());
        };
        let matches = provided
            .map(|provided| bool::from(provided.as_bytes().ct_eq(expected.as_bytes())))
            .unwrap_or(false);
        if matches {
            Ok(())
        } else {
            Err(CacheError::Unauthorized("invalid revalidation secret".to_string()))
        }
    }
}

/// Handler for POST /api/revalidate
pub async fn revalidate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RevalidateRequest>,
) -> Result<Json<RevalidateResponse>> {
    let header_secret = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    state.authorize(req.secret.as_deref().or(header_secret))?;

    let target = req.target().ok_or_else(|| {
        CacheError::InvalidRequest("either path or tag is required".to_string())
    })?;
    if req.has_both_targets() {
        warn!(path = ?req.path, tag = ?req.tag, "Both path and tag given, revalidating path only");
    }

    let invalidated = match &target {
        RevalidationTarget::Path(path) => state.cache.revalidate_path(path).await?,
        RevalidationTarget::Tag(tag) => state.cache.revalidate_tag(tag).await?,
    };
    info!(?target, invalidated, "Revalidated");

    Ok(Json(RevalidateResponse::new(invalidated)))
}

/// Handler for GET /api/cache?key=
pub async fn cache_get_handler(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Result<Json<CachedEntryResponse>> {
    let cached = state
        .cache
        .get(&query.key)
        .await
        .ok_or_else(|| CacheError::NotFound(query.key.clone()))?;

    Ok(Json(CachedEntryResponse::new(query.key, cached)))
}

/// Handler for PUT /api/cache
pub async fn cache_put_handler(
    State(state): State<AppState>,
    Json(req): Json<CachePutRequest>,
) -> Result<Json<CacheWriteResponse>> {
    let value = req.decode_value().map_err(CacheError::InvalidRequest)?;
    state.cache.set(&req.key, value, req.options).await?;

    Ok(Json(CacheWriteResponse::stored(req.key)))
}

/// Handler for DELETE /api/cache?key=
pub async fn cache_delete_handler(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Result<Json<CacheWriteResponse>> {
    state.cache.delete(&query.key).await?;

    Ok(Json(CacheWriteResponse::deleted(query.key)))
}

/// Handler for POST /api/middleware
///
/// Never fails: middleware errors surface as the `none` outcome.
pub async fn middleware_handler(
    State(state): State<AppState>,
    Json(event): Json<GatewayEvent>,
) -> Json<MiddlewareDecision> {
    let outcome = state.emulator.handle(&event).await;
    Json(MiddlewareDecision::from(outcome))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.stats().await;

    Json(StatsResponse::new(
        state.cache.build_id(),
        stats,
        state.emulator.mode(),
    ))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
