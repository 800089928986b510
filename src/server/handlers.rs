//! HTTP request handlers for the derivative image API.
//!
//! This module contains the Axum handlers for serving derivatives, health
//! checks and service counters.
//!
//! # Endpoints
//!
//! - `GET /uploads/{folder}/{filename}?w=&h=&q=` - Serve a derivative
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Service counters

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::asset::OriginAssetRef;
use crate::derivative::{CacheKey, DerivativeCacheService, ServiceStats};
use crate::error::{IoError, ServeError};
use crate::io::OriginStore;

/// Header reporting whether the derivative came from disk.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Header reporting the tier the derivative was encoded at.
pub const X_QUALITY_TIER: HeaderName = HeaderName::from_static("x-quality-tier");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the derivative service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<O: OriginStore + 'static> {
    /// The service answering derivative requests
    pub service: Arc<DerivativeCacheService<O>>,
}

impl<O: OriginStore + 'static> AppState<O> {
    /// Create a new application state with the given service.
    pub fn new(service: DerivativeCacheService<O>) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

impl<O: OriginStore + 'static> Clone for AppState<O> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for derivative requests.
///
/// Extracted from: `/uploads/{folder}/{*filename}`. The filename segment is a
/// wildcard so that traversal attempts reach validation instead of falling
/// through to a routing 404.
#[derive(Debug, Deserialize)]
pub struct DerivativePathParams {
    /// `nobg` or `marketplace`
    pub folder: String,

    /// Requested filename, must already be in sanitized form
    pub filename: String,
}

/// Query parameters for derivative requests.
///
/// Kept as raw strings so that malformed values degrade to "absent" rather
/// than rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct DerivativeQueryParams {
    #[serde(default)]
    pub w: Option<String>,

    #[serde(default)]
    pub h: Option<String>,

    #[serde(default)]
    pub q: Option<String>,
}

impl DerivativeQueryParams {
    /// Requested width, if a positive integer.
    pub fn width(&self) -> Option<u32> {
        parse_dimension(self.w.as_deref())
    }

    /// Requested height, if a positive integer.
    pub fn height(&self) -> Option<u32> {
        parse_dimension(self.h.as_deref())
    }

    /// Requested quality, if an integer. Range is checked by the classifier.
    pub fn quality(&self) -> Option<i64> {
        self.q.as_deref().and_then(|q| q.trim().parse().ok())
    }
}

fn parse_dimension(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|v| v.trim().parse::<u32>().ok()).filter(|v| *v > 0)
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "origin_timeout")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ServeError to HTTP response.
///
/// This implementation logs errors appropriately based on their severity:
/// - 404s are logged at DEBUG level (common and expected)
/// - other 4xx errors are logged at WARN level
/// - 5xx errors are logged at ERROR level
impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            // Invalid folder/filename is indistinguishable from a missing asset
            ServeError::InvalidRequest { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ServeError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),

            ServeError::OriginTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "origin_timeout"),

            ServeError::Origin(IoError::Connection(_)) => {
                (StatusCode::BAD_GATEWAY, "connection_error")
            }
            ServeError::Origin(IoError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ServeError::Origin(IoError::S3(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }

            ServeError::BadAsset { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "decode_error"),
            ServeError::EncodeError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            ServeError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);

        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle derivative requests.
///
/// # Endpoint
///
/// `GET /uploads/{folder}/{filename}`
///
/// # Query Parameters
///
/// - `w`: Target width (optional, positive integer)
/// - `h`: Target height (optional, positive integer)
/// - `q`: Requested quality 1-100 (optional, defaults to the preview tier)
///
/// # Response
///
/// - `200 OK`: WebP derivative
/// - `304 Not Modified`: `If-None-Match` matched a cached derivative
/// - `404 Not Found`: Unknown folder, unsanitized filename, or missing original
/// - `500 Internal Server Error`: Original could not be decoded or encoded
/// - `502 Bad Gateway` / `504 Gateway Timeout`: Origin store unreachable or slow
///
/// # Headers
///
/// - `Content-Type: image/webp`
/// - `Cache-Control: public, max-age={cache_duration}, stale-while-revalidate=60`
/// - `Vary: Accept-Encoding`
/// - `ETag: "{cache key}"`
/// - `X-Cache: HIT|MISS`
/// - `X-Quality-Tier: thumbnail|preview|full`
pub async fn derivative_handler<O: OriginStore + 'static>(
    State(state): State<AppState<O>>,
    Path(params): Path<DerivativePathParams>,
    Query(query): Query<DerivativeQueryParams>,
    headers: HeaderMap,
) -> Result<Response, ServeError> {
    // Validated before anything touches the origin or the disk
    let asset = OriginAssetRef::parse(&params.folder, &params.filename)?;

    let request = state
        .service
        .prepare(&asset, query.width(), query.height(), query.quality());
    let key = request.cache_key();
    let etag = etag_for(&key);

    if if_none_match_matches(&headers, &etag) && state.service.is_cached(&key).await {
        debug!(key = %key, "Conditional request matched, 304");
        let response = (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag),
                (header::CACHE_CONTROL, state.service.cache_control()),
                (header::VARY, "Accept-Encoding".to_string()),
            ],
        )
            .into_response();
        return Ok(response);
    }

    let response = state.service.serve_request(&request).await?;

    let cache_status = if response.cache_hit { "HIT" } else { "MISS" };
    let http_response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, response.content_type.to_string()),
            (header::CACHE_CONTROL, response.cache_control),
            (header::VARY, "Accept-Encoding".to_string()),
            (header::ETAG, etag),
            (X_CACHE, cache_status.to_string()),
            (X_QUALITY_TIER, response.tier.name().to_string()),
        ],
        response.data,
    )
        .into_response();

    Ok(http_response)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle service counter requests.
///
/// `GET /stats` returns the current [`ServiceStats`] as JSON.
pub async fn stats_handler<O: OriginStore + 'static>(
    State(state): State<AppState<O>>,
) -> Json<ServiceStats> {
    Json(state.service.stats())
}

fn etag_for(key: &CacheKey) -> String {
    format!("\"{}\"", key)
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == etag || candidate == "*")
}
