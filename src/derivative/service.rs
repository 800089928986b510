//! Derivative service for answering image requests.
//!
//! The DerivativeCacheService is the main entry point for derivative
//! requests. It orchestrates:
//! - Quality classification and cache key derivation
//! - Disk cache lookups
//! - Origin fetches (with a timeout)
//! - Transforms on the blocking pool
//! - Best-effort cache writes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     DerivativeCacheService                        │
//! │  ┌──────────────────────────────────────────────────────────┐    │
//! │  │                        serve()                           │    │
//! │  │  1. Classify tier      4. Join or start generation       │    │
//! │  │  2. Derive key         5. Fetch, transform, write        │    │
//! │  │  3. Check disk         6. Publish to every waiter        │    │
//! │  └──────────────────────────────────────────────────────────┘    │
//! │          │                     │                     │            │
//! │          ▼                     ▼                     ▼            │
//! │  ┌───────────────┐    ┌────────────────┐    ┌──────────────────┐ │
//! │  │ DiskCacheStore│    │  OriginStore   │    │ ImageTransformer │ │
//! │  └───────────────┘    └────────────────┘    └──────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Single-flight
//!
//! At most one generation runs per key. The first request to miss registers
//! a watch channel and spawns the generation as its own task; later requests
//! for the same key attach to the channel. Since the work is not owned by any
//! request, a client disconnecting only abandons its own wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::asset::OriginAssetRef;
use crate::error::{CacheError, IoError, ServeError};
use crate::io::OriginStore;
use crate::store::DiskCacheStore;

use super::key::{derive_key, CacheKey};
use super::quality::{QualityPolicy, QualityTier};
use super::transformer::{ImageTransformer, WEBP_CONTENT_TYPE};

/// Default upper bound on a single origin fetch.
pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on requested width and height.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

/// `stale-while-revalidate` window advertised on every response, in seconds.
pub const STALE_WHILE_REVALIDATE_SECS: u64 = 60;

// =============================================================================
// Configuration
// =============================================================================

/// Request-path settings for the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Advertised as `max-age` in `Cache-Control`
    pub cache_duration: Duration,

    /// Upper bound on one origin fetch
    pub origin_timeout: Duration,

    /// Requested dimensions above this are clamped to it, and no output
    /// axis is larger
    pub max_dimension: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_duration: crate::store::DEFAULT_CACHE_DURATION,
            origin_timeout: DEFAULT_ORIGIN_TIMEOUT,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

// =============================================================================
// Transform Request
// =============================================================================

/// A fully normalized derivative request.
///
/// Dimensions are already clamped and zero values dropped, so two requests
/// that would produce the same bytes compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    pub asset: OriginAssetRef,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality_tier: QualityTier,
}

impl TransformRequest {
    /// Cache key of the derivative this request produces.
    pub fn cache_key(&self) -> CacheKey {
        derive_key(&self.asset, self.width, self.height, self.quality_tier)
    }
}

// =============================================================================
// Derivative Response
// =============================================================================

/// Response from the derivative service.
#[derive(Debug, Clone)]
pub struct DerivativeResponse {
    /// Encoded WebP bytes
    pub data: Bytes,

    /// Always `image/webp`
    pub content_type: &'static str,

    /// Value for the `Cache-Control` header
    pub cache_control: String,

    /// Whether the bytes were read from the disk cache
    pub cache_hit: bool,

    /// Key the derivative is stored under
    pub key: CacheKey,

    /// Tier the derivative was encoded at
    pub tier: QualityTier,
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct ServiceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    origin_fetches: AtomicU64,
    transforms: AtomicU64,
    cache_write_failures: AtomicU64,
}

/// Point-in-time copy of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    /// Requests answered from disk
    pub hits: u64,

    /// Requests that needed a generation (started or joined)
    pub misses: u64,

    /// Misses that attached to a generation already in flight
    pub coalesced: u64,

    /// Calls made to the origin store
    pub origin_fetches: u64,

    /// Transforms that were started
    pub transforms: u64,

    /// Cache writes that failed (the response was still served)
    pub cache_write_failures: u64,
}

// =============================================================================
// Derivative Cache Service
// =============================================================================

type Outcome = Option<Result<Bytes, ServeError>>;
type InFlightMap = Mutex<HashMap<CacheKey, watch::Receiver<Outcome>>>;

struct Shared<O: OriginStore> {
    origin: Arc<O>,
    store: Arc<DiskCacheStore>,
    transformer: ImageTransformer,
    config: ServiceConfig,
    counters: ServiceCounters,
    in_flight: InFlightMap,
    #[cfg(test)]
    after_exists: Mutex<Option<Box<dyn FnOnce(&CacheKey) + Send>>>,
}

impl<O: OriginStore> Shared<O> {
    /// Runs a one-shot hook between the existence check and the read.
    #[cfg(test)]
    fn run_after_exists(&self, key: &CacheKey) {
        let hook = self
            .after_exists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hook) = hook {
            hook(key);
        }
    }
}

/// Service for generating and caching derivatives.
///
/// Cloning is cheap; all clones share the same store, counters and
/// in-flight map.
///
/// # Example
///
/// ```ignore
/// use derivative_cache::{DerivativeCacheService, DiskCacheStore, OriginAssetRef};
///
/// let store = Arc::new(DiskCacheStore::open("cache").await?);
/// let service = DerivativeCacheService::new(origin, store, policy, ServiceConfig::default());
///
/// let asset = OriginAssetRef::parse("marketplace", "item.png")?;
/// let response = service.serve(&asset, Some(200), None, Some(40)).await?;
/// ```
pub struct DerivativeCacheService<O: OriginStore + 'static> {
    shared: Arc<Shared<O>>,
    policy: QualityPolicy,
}

impl<O: OriginStore + 'static> Clone for DerivativeCacheService<O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            policy: self.policy.clone(),
        }
    }
}

impl<O: OriginStore + 'static> DerivativeCacheService<O> {
    /// Create a new service.
    pub fn new(
        origin: Arc<O>,
        store: Arc<DiskCacheStore>,
        policy: QualityPolicy,
        config: ServiceConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                origin,
                store,
                transformer: ImageTransformer::new(policy.clone())
                    .with_max_dimension(config.max_dimension),
                config,
                counters: ServiceCounters::default(),
                in_flight: Mutex::new(HashMap::new()),
                #[cfg(test)]
                after_exists: Mutex::new(None),
            }),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<DiskCacheStore> {
        &self.shared.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.shared.config
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// `Cache-Control` value sent with every derivative.
    pub fn cache_control(&self) -> String {
        format!(
            "public, max-age={}, stale-while-revalidate={}",
            self.shared.config.cache_duration.as_secs(),
            STALE_WHILE_REVALIDATE_SECS
        )
    }

    /// Normalize raw request parameters.
    ///
    /// Zero dimensions are treated as absent and dimensions above
    /// `max_dimension` are clamped.
    pub fn prepare(
        &self,
        asset: &OriginAssetRef,
        width: Option<u32>,
        height: Option<u32>,
        requested_quality: Option<i64>,
    ) -> TransformRequest {
        let max = self.shared.config.max_dimension;
        let clamp = |d: Option<u32>| d.filter(|v| *v > 0).map(|v| v.min(max));

        TransformRequest {
            asset: asset.clone(),
            width: clamp(width),
            height: clamp(height),
            quality_tier: self.policy.classify(requested_quality),
        }
    }

    /// Returns `true` if a derivative for `key` is on disk.
    pub async fn is_cached(&self, key: &CacheKey) -> bool {
        self.shared.store.exists(key).await
    }

    /// Serve a derivative from raw request parameters.
    pub async fn serve(
        &self,
        asset: &OriginAssetRef,
        width: Option<u32>,
        height: Option<u32>,
        requested_quality: Option<i64>,
    ) -> Result<DerivativeResponse, ServeError> {
        let request = self.prepare(asset, width, height, requested_quality);
        self.serve_request(&request).await
    }

    /// Serve a prepared request.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the original does not exist
    /// - `OriginTimeout` if the origin did not answer within `origin_timeout`
    /// - `Origin` for other origin failures
    /// - `BadAsset` if the original cannot be decoded
    /// - `EncodeError` / `Internal` if generation itself fails
    ///
    /// Cache write failures are not errors.
    pub async fn serve_request(
        &self,
        request: &TransformRequest,
    ) -> Result<DerivativeResponse, ServeError> {
        let key = request.cache_key();
        let counters = &self.shared.counters;

        if self.shared.store.exists(&key).await {
            #[cfg(test)]
            self.shared.run_after_exists(&key);

            match self.shared.store.read(&key).await {
                Ok(data) => {
                    counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, asset = %request.asset, "Derivative cache hit");
                    return Ok(self.respond(data, key, request.quality_tier, true));
                }
                Err(CacheError::NotFound { .. }) => {
                    debug!(key = %key, "Entry vanished before read, regenerating");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache read failed, regenerating");
                }
            }
        }

        counters.misses.fetch_add(1, Ordering::Relaxed);
        let mut rx = self.join_or_start(&key, request);

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .map_err(|_| ServeError::Internal {
                message: "derivative generation ended without a result".to_string(),
            })?;

        match outcome {
            Some(Ok(data)) => Ok(self.respond(data, key, request.quality_tier, false)),
            Some(Err(e)) => Err(e),
            None => Err(ServeError::Internal {
                message: "derivative generation published no result".to_string(),
            }),
        }
    }

    /// Get a snapshot of the service counters.
    pub fn stats(&self) -> ServiceStats {
        let c = &self.shared.counters;
        ServiceStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            origin_fetches: c.origin_fetches.load(Ordering::Relaxed),
            transforms: c.transforms.load(Ordering::Relaxed),
            cache_write_failures: c.cache_write_failures.load(Ordering::Relaxed),
        }
    }

    fn respond(&self, data: Bytes, key: CacheKey, tier: QualityTier, cache_hit: bool) -> DerivativeResponse {
        DerivativeResponse {
            data,
            content_type: WEBP_CONTENT_TYPE,
            cache_control: self.cache_control(),
            cache_hit,
            key,
            tier,
        }
    }

    /// Attach to the generation for `key`, starting one if none is running.
    fn join_or_start(&self, key: &CacheKey, request: &TransformRequest) -> watch::Receiver<Outcome> {
        let mut in_flight = lock_in_flight(&self.shared.in_flight);

        if let Some(rx) = in_flight.get(key) {
            self.shared.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Joining in-flight generation");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), rx.clone());
        drop(in_flight);

        let shared = Arc::clone(&self.shared);
        let key = key.clone();
        let request = request.clone();

        tokio::spawn(async move {
            let guard = InFlightGuard {
                shared: Arc::clone(&shared),
                key: key.clone(),
            };
            let result = generate(&shared, &key, &request).await;

            // Unregister before publishing so a failure is never observed by
            // a request that arrives afterwards
            drop(guard);
            let _ = tx.send(Some(result));
        });

        rx
    }
}

/// Removes the in-flight entry when generation finishes or panics.
struct InFlightGuard<O: OriginStore> {
    shared: Arc<Shared<O>>,
    key: CacheKey,
}

impl<O: OriginStore> Drop for InFlightGuard<O> {
    fn drop(&mut self) {
        lock_in_flight(&self.shared.in_flight).remove(&self.key);
    }
}

fn lock_in_flight(
    map: &InFlightMap,
) -> std::sync::MutexGuard<'_, HashMap<CacheKey, watch::Receiver<Outcome>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One generation: recheck disk, fetch, transform, write.
async fn generate<O: OriginStore>(
    shared: &Shared<O>,
    key: &CacheKey,
    request: &TransformRequest,
) -> Result<Bytes, ServeError> {
    // A previous generation may have finished between our miss and now
    if let Ok(data) = shared.store.read(key).await {
        return Ok(data);
    }

    let asset = &request.asset;
    let timeout = shared.config.origin_timeout;

    shared.counters.origin_fetches.fetch_add(1, Ordering::Relaxed);
    let source = match tokio::time::timeout(timeout, shared.origin.get(asset)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(IoError::NotFound(_))) => {
            return Err(ServeError::NotFound {
                asset: asset.to_string(),
            })
        }
        Ok(Err(e)) => return Err(ServeError::Origin(e)),
        Err(_) => {
            return Err(ServeError::OriginTimeout {
                asset: asset.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    shared.counters.transforms.fetch_add(1, Ordering::Relaxed);
    let transformer = shared.transformer.clone();
    let (width, height, tier) = (request.width, request.height, request.quality_tier);
    let data = tokio::task::spawn_blocking(move || transformer.transform(&source, width, height, tier))
        .await
        .map_err(|e| ServeError::Internal {
            message: format!("transform task failed: {}", e),
        })??;

    match shared.store.write(key, &data).await {
        Ok(()) => {
            info!(
                key = %key,
                asset = %asset,
                tier = %tier,
                bytes = data.len(),
                "Derivative generated"
            );
        }
        Err(e) => {
            shared
                .counters
                .cache_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "Failed to cache derivative, serving uncached");
        }
    }

    Ok(data)
}

// =============================================================================
// Tests
// =============================================================================
