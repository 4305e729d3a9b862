//! API Routes
//!
//! Configures the Axum router with all runtime endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    cache_delete_handler, cache_get_handler, cache_put_handler, health_handler,
    middleware_handler, revalidate_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `POST /api/revalidate` - Invalidate by path or tag
/// - `GET|PUT|DELETE /api/cache` - Cache handler operations
/// - `POST /api/middleware` - Run middleware for a gateway event
/// - `GET /stats` - Cache and regeneration counters
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/revalidate", post(revalidate_handler))
        .route(
            "/api/cache",
            get(cache_get_handler)
                .put(cache_put_handler)
                .delete(cache_delete_handler),
        )
        .route("/api/middleware", post(middleware_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
