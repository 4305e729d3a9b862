//! Background Regeneration
//!
//! Stale reads hand the key to a background task that re-renders the page and
//! writes it back. Two layers keep regeneration single-flight: an in-process
//! registry of keys being regenerated, then a claim row in the metadata store
//! shared by every instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{header, Client};
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::cache::{current_timestamp_ms, IsrCache, SetOptions};

/// Request header that makes Next.js bypass its cache and render the page
/// again. Its value must be the build's `previewModeId`.
pub const PRERENDER_REVALIDATE_HEADER: &str = "x-prerender-revalidate";

/// Response header reporting whether Next.js served the page from its cache.
pub const NEXT_CACHE_HEADER: &str = "x-nextjs-cache";

/// Response header carrying comma-separated cache tags.
pub const CACHE_TAGS_HEADER: &str = "x-next-cache-tags";

/// Response headers never replayed from cache.
const UNCACHED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "date",
    "keep-alive",
    "set-cookie",
    "transfer-encoding",
    NEXT_CACHE_HEADER,
];

// == In-Flight Registry ==
/// Keys with a regeneration task currently running in this process.
#[derive(Default, Clone)]
pub struct InFlightRegenerations {
    keys: Arc<DashMap<String, ()>>,
}

impl InFlightRegenerations {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(DashMap::new()),
        }
    }

    /// Returns a guard if no regeneration is in flight for `key`.
    pub fn acquire(&self, key: &str) -> Option<RegenerationGuard> {
        use dashmap::mapref::entry::Entry;

        match self.keys.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(RegenerationGuard {
                    key: key.to_string(),
                    keys: Arc::clone(&self.keys),
                })
            }
            Entry::Occupied(_) => None,
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }
}

/// Marks `key` as in flight until dropped.
pub struct RegenerationGuard {
    key: String,
    keys: Arc<DashMap<String, ()>>,
}

impl Drop for RegenerationGuard {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

// == Regenerator ==
/// A freshly rendered page ready to be written back.
#[derive(Debug, Clone)]
pub struct RegeneratedPage {
    pub value: Vec<u8>,
    pub options: SetOptions,
}

/// Produces a fresh rendering of a cached key.
///
/// `Ok(None)` means there is nothing to write; the stale entry stays.
#[async_trait]
pub trait Regenerator: Send + Sync {
    async fn regenerate(&self, key: &str) -> anyhow::Result<Option<RegeneratedPage>>;
}

/// Spawns the regeneration of `key`. The guard is held until the task ends.
pub fn spawn_regeneration(
    cache: IsrCache,
    key: String,
    guard: RegenerationGuard,
) -> JoinHandle<()> {
    let span = tracing::info_span!("regeneration", key = %key);
    tokio::spawn(
        async move {
            let _guard = guard;
            cache.regenerate(&key).await;
        }
        .instrument(span),
    )
}

// == HTTP Regenerator ==
/// Re-renders pages by requesting them from the application origin.
///
/// Only keys that are URL paths can be regenerated this way; other keys
/// yield `None`.
///
/// The origin is asked to skip its cache with the build's `previewModeId`.
/// A response the origin still reports as served from cache is rejected, so
/// a stale body is never written back as fresh.
pub struct HttpRegenerator {
    client: Client,
    origin: String,
    preview_mode_id: Option<String>,
    timeout: Duration,
}

impl HttpRegenerator {
    pub fn new(client: Client, origin: impl Into<String>) -> Self {
        Self {
            client,
            origin: origin.into().trim_end_matches('/').to_string(),
            preview_mode_id: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the token sent in `x-prerender-revalidate`.
    pub fn with_preview_mode_id(mut self, preview_mode_id: impl Into<String>) -> Self {
        self.preview_mode_id = Some(preview_mode_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Regenerator for HttpRegenerator {
    async fn regenerate(&self, key: &str) -> anyhow::Result<Option<RegeneratedPage>> {
        if !key.starts_with('/') {
            debug!(key, "key is not a path, nothing to request");
            return Ok(None);
        }

        let mut request = self
            .client
            .get(format!("{}{}", self.origin, key))
            .timeout(self.timeout);
        if let Some(preview_mode_id) = &self.preview_mode_id {
            request = request.header(PRERENDER_REVALIDATE_HEADER, preview_mode_id);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("origin answered {} for {}", status, key);
        }
        if let Some(state) = response
            .headers()
            .get(NEXT_CACHE_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            if served_from_cache(state) {
                anyhow::bail!("origin served {} from its cache ({}), not rendered", key, state);
            }
        }

        let mut headers = BTreeMap::new();
        let mut tags = Vec::new();
        let mut revalidate_after = None;
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let name = name.as_str();
            if name == CACHE_TAGS_HEADER {
                tags = parse_tags(value);
                continue;
            }
            if name == header::CACHE_CONTROL.as_str() {
                revalidate_after = parse_s_maxage(value)
                    .map(|secs| current_timestamp_ms() + secs.saturating_mul(1000));
            }
            if !UNCACHED_HEADERS.contains(&name) {
                headers.insert(name.to_string(), value.to_string());
            }
        }

        let value = response.bytes().await?.to_vec();
        let mut options = SetOptions::new()
            .with_status(status.as_u16())
            .with_tags(tags);
        options.headers = headers;
        options.revalidate_after = revalidate_after;

        Ok(Some(RegeneratedPage { value, options }))
    }
}

/// Extracts the shared-cache lifetime in seconds from a `Cache-Control` value.
///
/// `no-store` and `private` responses have none. `max-age` is used when
/// `s-maxage` is absent.
pub fn parse_s_maxage(cache_control: &str) -> Option<u64> {
    let mut max_age = None;
    let mut s_maxage = None;

    for directive in cache_control.split(',') {
        let directive = directive.trim().to_ascii_lowercase();
        match directive.split_once('=') {
            Some(("s-maxage", value)) => s_maxage = value.trim_matches('"').parse().ok(),
            Some(("max-age", value)) => max_age = value.trim_matches('"').parse().ok(),
            None if directive == "no-store" || directive == "private" => return None,
            _ => {}
        }
    }

    s_maxage.or(max_age)
}

/// True for `x-nextjs-cache` values of responses that were not rendered.
fn served_from_cache(state: &str) -> bool {
    let state = state.trim();
    state.eq_ignore_ascii_case("HIT") || state.eq_ignore_ascii_case("STALE")
}

fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
