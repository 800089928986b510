//! Quality tiers.
//!
//! Clients may ask for any quality in `1..=100`, but derivatives are only ever
//! produced at one of three tiers. Quantizing the request keeps the number of
//! distinct cache entries per asset and size at three.

use std::fmt;

/// Minimum accepted requested quality.
pub const MIN_QUALITY: i64 = 1;

/// Maximum accepted requested quality.
pub const MAX_QUALITY: i64 = 100;

/// Output quality level of a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QualityTier {
    Thumbnail,
    Preview,
    Full,
}

impl QualityTier {
    /// Fixed name of the tier. This string is part of the cache key, so it
    /// must never change for an existing tier.
    pub fn name(&self) -> &'static str {
        match self {
            QualityTier::Thumbnail => "thumbnail",
            QualityTier::Preview => "preview",
            QualityTier::Full => "full",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns `true` if `quality` is in the accepted range (1-100).
#[inline]
pub fn is_valid_quality(quality: i64) -> bool {
    (MIN_QUALITY..=MAX_QUALITY).contains(&quality)
}

/// Thresholds for classifying requests and the encoder quality of each tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityPolicy {
    /// Requests at or below this value map to `Thumbnail`
    pub thumbnail_max: u8,

    /// Requests at or below this value (and above `thumbnail_max`) map to `Preview`
    pub preview_max: u8,

    /// Encoder quality used for `Thumbnail` derivatives
    pub thumbnail_quality: u8,

    /// Encoder quality used for `Preview` derivatives
    pub preview_quality: u8,

    /// Encoder quality used for `Full` derivatives
    pub full_quality: u8,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            thumbnail_max: 30,
            preview_max: 50,
            thumbnail_quality: 30,
            preview_quality: 50,
            full_quality: 90,
        }
    }
}

impl QualityPolicy {
    /// Map a requested quality onto a tier.
    ///
    /// Absent or out-of-range requests fall back to `Preview`.
    pub fn classify(&self, requested: Option<i64>) -> QualityTier {
        match requested {
            Some(q) if is_valid_quality(q) => {
                if q <= i64::from(self.thumbnail_max) {
                    QualityTier::Thumbnail
                } else if q <= i64::from(self.preview_max) {
                    QualityTier::Preview
                } else {
                    QualityTier::Full
                }
            }
            _ => QualityTier::Preview,
        }
    }

    /// Encoder quality (1-100) for a tier.
    pub fn encode_quality(&self, tier: QualityTier) -> u8 {
        match tier {
            QualityTier::Thumbnail => self.thumbnail_quality,
            QualityTier::Preview => self.preview_quality,
            QualityTier::Full => self.full_quality,
        }
    }

    /// Check that thresholds are ordered and every quality is in range.
    pub fn validate(&self) -> Result<(), String> {
        if self.thumbnail_max == 0 || self.thumbnail_max >= self.preview_max {
            return Err(format!(
                "quality thresholds must satisfy 1 <= thumbnail ({}) < preview ({})",
                self.thumbnail_max, self.preview_max
            ));
        }
        if i64::from(self.preview_max) > MAX_QUALITY {
            return Err("preview threshold must be at most 100".to_string());
        }
        for (name, q) in [
            ("thumbnail", self.thumbnail_quality),
            ("preview", self.preview_quality),
            ("full", self.full_quality),
        ] {
            if !is_valid_quality(i64::from(q)) {
                return Err(format!("{} quality must be between 1 and 100", name));
            }
        }
        Ok(())
    }
}
