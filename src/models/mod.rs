//! Request and Response models for the runtime API
//!
//! DTOs used for serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

pub use requests::{CachePutRequest, CacheQuery, RevalidateRequest, RevalidationTarget};
pub use responses::{
    CacheWriteResponse, CachedEntryResponse, HealthResponse, MiddlewareDecision,
    RevalidateResponse, StatsResponse,
};
