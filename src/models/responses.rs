//! Response DTOs for the runtime API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use crate::cache::{CacheStats, CachedResponse};
use crate::manifest::MiddlewareMode;
use crate::middleware::{GatewayResponse, MiddlewareOutcome};

/// Response body of `POST /api/revalidate`
#[derive(Debug, Clone, Serialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    /// Unix milliseconds
    pub now: i64,
    /// Entries removed by this call
    pub invalidated: u64,
}

impl RevalidateResponse {
    pub fn new(invalidated: u64) -> Self {
        Self {
            revalidated: true,
            now: chrono::Utc::now().timestamp_millis(),
            invalidated,
        }
    }
}

/// Response body of `GET /api/cache`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntryResponse {
    pub key: String,
    /// Base64 payload
    pub value: String,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub tags: Vec<String>,
    pub revalidate_after: Option<u64>,
    pub is_stale: bool,
}

impl CachedEntryResponse {
    pub fn new(key: impl Into<String>, cached: CachedResponse) -> Self {
        Self {
            key: key.into(),
            value: STANDARD.encode(&cached.value),
            headers: cached.headers,
            status: cached.status,
            tags: cached.tags,
            revalidate_after: cached.revalidate_after,
            is_stale: cached.is_stale,
        }
    }
}

/// Response body of `PUT` and `DELETE /api/cache`
#[derive(Debug, Clone, Serialize)]
pub struct CacheWriteResponse {
    pub message: String,
    pub key: String,
}

impl CacheWriteResponse {
    pub fn stored(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored", key),
            key,
        }
    }

    pub fn deleted(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted", key),
            key,
        }
    }
}

/// Response body of `POST /api/middleware`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareDecision {
    /// `none`, `continue`, `rewrite`, `redirect` or `response`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<GatewayResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
}

impl From<MiddlewareOutcome> for MiddlewareDecision {
    fn from(outcome: MiddlewareOutcome) -> Self {
        let mut decision = Self {
            outcome: outcome.kind(),
            response: None,
            rewrite: None,
            request_headers: None,
            response_headers: None,
        };
        match outcome {
            MiddlewareOutcome::None => {}
            MiddlewareOutcome::Continue(passthrough) => {
                decision.request_headers = passthrough.request_headers;
                decision.response_headers = Some(passthrough.response_headers);
            }
            MiddlewareOutcome::Rewrite { url, passthrough } => {
                decision.rewrite = Some(url);
                decision.request_headers = passthrough.request_headers;
                decision.response_headers = Some(passthrough.response_headers);
            }
            MiddlewareOutcome::Redirect(response) | MiddlewareOutcome::Response(response) => {
                decision.response = Some(response);
            }
        }
        decision
    }
}

/// Response body of `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub build_id: String,
    #[serde(flatten)]
    pub cache: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    pub middleware_mode: MiddlewareMode,
}

impl StatsResponse {
    pub fn new(
        build_id: impl Into<String>,
        cache: CacheStats,
        middleware_mode: MiddlewareMode,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            hit_rate: cache.hit_rate(),
            cache,
            middleware_mode,
        }
    }
}

/// Response body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
