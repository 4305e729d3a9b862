//! Request DTOs for the runtime API
//!
//! Defines the structure of incoming HTTP request bodies and queries.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::cache::SetOptions;

/// Body of `POST /api/revalidate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevalidateRequest {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Shared secret; the `x-revalidate-secret` header is accepted too
    #[serde(default)]
    pub secret: Option<String>,
}

/// What a revalidation request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationTarget {
    Path(String),
    Tag(String),
}

impl RevalidateRequest {
    /// Resolves the target. A path wins over a tag; blank values count as
    /// absent.
    pub fn target(&self) -> Option<RevalidationTarget> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        non_blank(&self.path)
            .map(RevalidationTarget::Path)
            .or_else(|| non_blank(&self.tag).map(RevalidationTarget::Tag))
    }

    pub fn has_both_targets(&self) -> bool {
        self.path.as_deref().is_some_and(|path| !path.trim().is_empty())
            && self.tag.as_deref().is_some_and(|tag| !tag.trim().is_empty())
    }
}

/// Body of `PUT /api/cache`.
#[derive(Debug, Clone, Deserialize)]
pub struct CachePutRequest {
    pub key: String,
    /// Base64 payload
    pub value: String,
    #[serde(default)]
    pub options: SetOptions,
}

impl CachePutRequest {
    pub fn decode_value(&self) -> Result<Vec<u8>, String> {
        STANDARD
            .decode(&self.value)
            .map_err(|err| format!("value is not valid base64: {err}"))
    }
}

/// Query of `GET` and `DELETE /api/cache`.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheQuery {
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revalidate_target_prefers_path() {
        let req: RevalidateRequest =
            serde_json::from_str(r#"{"path": "/blog", "tag": "posts"}"#).unwrap();
        assert_eq!(req.target(), Some(RevalidationTarget::Path("/blog".to_string())));
        assert!(req.has_both_targets());
    }

    #[test]
    fn test_revalidate_target_tag_only() {
        let req: RevalidateRequest = serde_json::from_str(r#"{"tag": "posts"}"#).unwrap();
        assert_eq!(req.target(), Some(RevalidationTarget::Tag("posts".to_string())));
        assert!(!req.has_both_targets());
    }

    #[test]
    fn test_revalidate_blank_fields_are_absent() {
        let req: RevalidateRequest = serde_json::from_str(r#"{"path": "  ", "tag": ""}"#).unwrap();
        assert!(req.target().is_none());

        let req: RevalidateRequest = serde_json::from_str("{}").unwrap();
        assert!(req.target().is_none());
    }

    #[test]
    fn test_cache_put_request_decodes_value() {
        let req: CachePutRequest = serde_json::from_str(
            r#"{"key": "/blog", "value": "aGVsbG8=", "options": {"tags": ["posts"], "revalidateAfter": 10}}"#,
        )
        .unwrap();
        assert_eq!(req.decode_value().unwrap(), b"hello");
        assert_eq!(req.options.tags, vec!["posts"]);
        assert_eq!(req.options.revalidate_after, Some(10));

        let bad = CachePutRequest {
            key: "/blog".to_string(),
            value: "not base64!".to_string(),
            options: SetOptions::default(),
        };
        assert!(bad.decode_value().is_err());
    }
}
