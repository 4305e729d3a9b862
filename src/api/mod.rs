//! API Module
//!
//! HTTP handlers and routing for the runtime.
//!
//! # Endpoints
//! - `POST /api/revalidate` - On-demand revalidation by path or tag
//! - `GET /api/cache?key=` - Read a cached entry
//! - `PUT /api/cache` - Store an entry
//! - `DELETE /api/cache?key=` - Delete an entry
//! - `POST /api/middleware` - Middleware decision for a gateway event
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
