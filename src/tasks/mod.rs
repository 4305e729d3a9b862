//! Background Tasks Module
//!
//! Stale-while-revalidate regeneration runs as detached tokio tasks spawned
//! from the cache read path.

mod regeneration;

pub use regeneration::{
    parse_s_maxage, spawn_regeneration, HttpRegenerator, InFlightRegenerations, RegeneratedPage,
    RegenerationGuard, Regenerator, CACHE_TAGS_HEADER, NEXT_CACHE_HEADER,
    PRERENDER_REVALIDATE_HEADER,
};
