//! Cache keys for derivatives.
//!
//! A key is the SHA-256 of a canonical description of the derivative:
//!
//! ```text
//! {folder}/{name}|w={width}|h={height}|q={tier}
//! ```
//!
//! An absent width or height is always written as [`NO_DIMENSION`] (`0`),
//! which can never collide with a real dimension since those are positive.
//! The digest is lowercase hex, 64 characters, and doubles as the entry's
//! filename on disk.

use std::fmt;

use sha2::{Digest, Sha256};

use super::quality::QualityTier;
use crate::asset::OriginAssetRef;

/// Token written into the canonical form for an absent dimension.
pub const NO_DIMENSION: u32 = 0;

/// Length of a cache key in characters.
pub const CACHE_KEY_LEN: usize = 64;

/// Fixed-length opaque identifier of one derivative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a string as a cache key.
    ///
    /// Only exactly 64 lowercase hex characters are accepted, which is also
    /// how stray files in the cache directory are told apart from entries.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == CACHE_KEY_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| CacheKey(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical string hashed into the cache key.
pub fn canonical_form(
    asset: &OriginAssetRef,
    width: Option<u32>,
    height: Option<u32>,
    tier: QualityTier,
) -> String {
    format!(
        "{}|w={}|h={}|q={}",
        asset.object_key(),
        width.unwrap_or(NO_DIMENSION),
        height.unwrap_or(NO_DIMENSION),
        tier.name()
    )
}

/// Derive the cache key for a derivative.
pub fn derive_key(
    asset: &OriginAssetRef,
    width: Option<u32>,
    height: Option<u32>,
    tier: QualityTier,
) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(canonical_form(asset, width, height, tier).as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
}
