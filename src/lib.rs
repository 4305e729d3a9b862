//! Next.js runtime for Yandex Cloud serverless
//!
//! Provides an incremental static regeneration cache over object storage and
//! a document table, an edge-middleware emulator, and the deployment
//! manifest/compatibility layer that configures both.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;
pub mod middleware;
pub mod models;
pub mod storage;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::IsrCache;
pub use config::Config;
pub use manifest::DeploymentManifest;
pub use middleware::MiddlewareEmulator;
