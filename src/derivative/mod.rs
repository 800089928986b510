//! Derivative pipeline.
//!
//! This module turns an original image plus request parameters into a WebP
//! derivative and caches the result on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         DerivativeCacheService          │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ QualityPolicy│  │ ImageTransformer│  │
//! │  │ + CacheKey   │  │ (decode →       │  │
//! │  │              │  │  resize → WebP) │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            │                     │
//!            ▼                     ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │   DiskCacheStore   │ │   OriginStore    │
//! └────────────────────┘ └──────────────────┘
//! ```
//!
//! # Components
//!
//! - [`DerivativeCacheService`]: Main entry point, owns single-flight coalescing
//! - [`ImageTransformer`]: Decode, resize (Lanczos3) and WebP encode
//! - [`QualityPolicy`]: Maps requested quality onto a [`QualityTier`]
//! - [`CacheKey`]: SHA-256 fingerprint of (asset, width, height, tier)

mod key;
mod quality;
mod service;
mod transformer;

pub use key::{canonical_form, derive_key, CacheKey, CACHE_KEY_LEN, NO_DIMENSION};
pub use quality::{is_valid_quality, QualityPolicy, QualityTier, MAX_QUALITY, MIN_QUALITY};
pub use service::{
    DerivativeCacheService, DerivativeResponse, ServiceConfig, ServiceStats, TransformRequest,
    DEFAULT_MAX_DIMENSION, DEFAULT_ORIGIN_TIMEOUT, STALE_WHILE_REVALIDATE_SECS,
};
pub use transformer::{
    has_transparency, target_dimensions, ImageTransformer, RESIZE_FILTER, WEBP_CONTENT_TYPE,
    WEBP_MAX_DIMENSION,
};
