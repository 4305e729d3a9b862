//! Key derivation for the blob store and the metadata store.
//!
//! Blob keys are content-addressed from the logical key and sharded by the
//! first byte of the digest:
//!
//! ```text
//! cache/{buildId}/{sha256(key)[..2]}/{sha256(key)}
//! ```
//!
//! Metadata rows are namespaced by build (`{buildId}#{key}`, sort key
//! `metadata`). Index rows point back at that partition key from
//! `tag#{tag}` or the literal path.

use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Fixed sort key of metadata rows.
pub const METADATA_SORT_KEY: &str = "metadata";

/// Fixed sort key of regeneration claim rows.
pub const CLAIM_SORT_KEY: &str = "lock";

const TAG_PREFIX: &str = "tag#";
const CLAIM_PREFIX: &str = "lock#";

/// Hex SHA-256 digest of a logical key.
pub fn digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Content store key for an entry.
pub fn blob_key(build_id: &str, key: &str) -> String {
    let digest = digest(key);
    format!("cache/{}/{}/{}", build_id, &digest[..2], digest)
}

/// Metadata partition key for an entry.
pub fn metadata_partition(build_id: &str, key: &str) -> String {
    format!("{}#{}", build_id, key)
}

/// Tag index partition key.
pub fn tag_partition(tag: &str) -> String {
    format!("{}{}", TAG_PREFIX, tag)
}

/// Path index partition key (the literal path).
pub fn path_partition(path: &str) -> String {
    path.to_string()
}

/// Claim row partition key used for single-flight regeneration.
pub fn claim_partition(build_id: &str, key: &str) -> String {
    format!("{}{}#{}", CLAIM_PREFIX, build_id, key)
}

/// Checks that `build_id` can namespace partition keys.
///
/// The first `#` of a metadata partition separates the build id from the
/// key, so build ids may not contain one.
pub fn validate_build_id(build_id: &str) -> Result<()> {
    if build_id.is_empty() {
        return Err(CacheError::InvalidRequest("Build id cannot be empty".to_string()));
    }
    if build_id.contains('#') {
        return Err(CacheError::InvalidRequest(format!(
            "Build id {:?} cannot contain '#'",
            build_id
        )));
    }
    Ok(())
}

/// Splits a metadata partition key back into `(build_id, key)`.
///
/// Build ids are checked by `validate_build_id`, so the first separator is
/// authoritative.
pub fn split_metadata_partition(partition: &str) -> Option<(&str, &str)> {
    partition
        .split_once('#')
        .filter(|(build_id, key)| !build_id.is_empty() && !key.is_empty())
}
