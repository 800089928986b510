//! # Derivative Cache
//!
//! An on-demand image derivative server fronting an S3 bucket of originals.
//!
//! Requests name an original plus an optional width, height and quality. The
//! service generates a WebP derivative the first time it is asked for,
//! persists it to a local disk cache, and serves it from disk afterwards. A
//! background janitor keeps the cache within an age limit and a size budget.
//!
//! ## Features
//!
//! - **Deterministic derivatives**: identical requests map to one SHA-256 cache key
//! - **Quality tiers**: arbitrary requested quality collapses onto three tiers
//! - **Single-flight**: concurrent misses for one key share a single generation
//! - **Atomic disk writes**: readers never observe partial entries
//! - **Bounded eviction**: age then size, oldest first, with per-sweep limits
//!
//! ## Architecture
//!
//! - [`asset`] - Origin asset references and filename sanitizing
//! - [`io`] - Origin store trait and its S3 implementation
//! - [`derivative`] - Cache keys, quality tiers, transformer and the service
//! - [`store`] - Disk cache and janitor
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use derivative_cache::{
//!     create_router, DerivativeCacheService, DiskCacheStore, QualityPolicy, RouterConfig,
//!     S3OriginStore, ServiceConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let origin = Arc::new(S3OriginStore::connect("uploads", "us-east-1", None).await);
//!     let store = Arc::new(DiskCacheStore::open("cache").await?);
//!
//!     let service =
//!         DerivativeCacheService::new(origin, store, QualityPolicy::default(), ServiceConfig::default());
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod config;
pub mod derivative;
pub mod error;
pub mod io;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use asset::{sanitize_filename, AssetFolder, OriginAssetRef};
pub use config::{parse_byte_size, Cli, Command, ServeConfig, SweepConfig};
pub use derivative::{
    derive_key, CacheKey, DerivativeCacheService, DerivativeResponse, ImageTransformer,
    QualityPolicy, QualityTier, ServiceConfig, ServiceStats, TransformRequest, WEBP_CONTENT_TYPE,
};
pub use error::{CacheError, IoError, ServeError, TransformError};
pub use io::{OriginStore, S3OriginStore};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use store::{
    CacheIndex, CacheJanitor, DiskCacheStore, EntryMeta, JanitorConfig, JanitorHandle,
    SweepReport,
};
