//! API integration tests for derivative serving and error handling.
//!
//! Tests verify:
//! - Derivative retrieval and response headers
//! - Conditional requests (ETag / If-None-Match)
//! - Validation of folder and filename before any side effect
//! - HTTP status codes for origin and decode failures

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use derivative_cache::error::IoError;
use derivative_cache::{create_router, RouterConfig, ServiceConfig};

use super::test_utils::{
    build_service, build_service_with_config, create_png, image_dimensions, is_valid_webp,
    stored_keys, MockOriginStore,
};

fn router_for(origin: Arc<MockOriginStore>, dir: &tempfile::TempDir) -> Router {
    create_router(
        build_service(origin, dir.path()),
        RouterConfig::new().with_tracing(false),
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Basic Retrieval
// =============================================================================

#[tokio::test]
async fn test_derivative_retrieval_success() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "chair.png",
        create_png(400, 200),
    ));
    let router = router_for(origin.clone(), &dir);

    let response = router
        .oneshot(get("/uploads/marketplace/chair.png?w=100&q=40"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/webp");
    assert_eq!(
        headers.get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=604800, stale-while-revalidate=60"
    );
    assert_eq!(headers.get(header::VARY).unwrap(), "Accept-Encoding");
    assert_eq!(headers.get("x-cache").unwrap(), "MISS");
    assert_eq!(headers.get("x-quality-tier").unwrap(), "preview");

    let etag = headers.get(header::ETAG).unwrap().to_str().unwrap();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert_eq!(etag.len(), 64 + 2);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_webp(&body));
    assert_eq!(image_dimensions(&body), (100, 50));
    assert_eq!(origin.get_count(), 1);
}

#[tokio::test]
async fn test_second_request_is_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "nobg",
        "lamp.png",
        create_png(64, 64),
    ));
    let router = router_for(origin.clone(), &dir);

    let first = router
        .clone()
        .oneshot(get("/uploads/nobg/lamp.png?w=32"))
        .await
        .unwrap();
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    let first_body = first.into_body().collect().await.unwrap().to_bytes();

    let second = router
        .oneshot(get("/uploads/nobg/lamp.png?w=32"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    let second_body = second.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(first_body, second_body);
    assert_eq!(origin.get_count(), 1);
}

#[tokio::test]
async fn test_quality_tiers_in_headers() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(16, 16),
    ));
    let router = router_for(origin, &dir);

    for (q, tier) in [
        ("10", "thumbnail"),
        ("30", "thumbnail"),
        ("31", "preview"),
        ("75", "full"),
        ("0", "preview"),
        ("101", "preview"),
        ("best", "preview"),
    ] {
        let response = router
            .clone()
            .oneshot(get(&format!("/uploads/marketplace/a.png?q={}", q)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "q={}", q);
        assert_eq!(response.headers().get("x-quality-tier").unwrap(), tier, "q={}", q);
    }
}

#[tokio::test]
async fn test_malformed_dimensions_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(40, 20),
    ));
    let router = router_for(origin, &dir);

    let plain = router
        .clone()
        .oneshot(get("/uploads/marketplace/a.png"))
        .await
        .unwrap();
    let plain_etag = plain.headers().get(header::ETAG).unwrap().clone();

    let response = router
        .oneshot(get("/uploads/marketplace/a.png?w=abc&h=-5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Same derivative as the request without dimensions
    assert_eq!(response.headers().get(header::ETAG).unwrap(), &plain_etag);
    assert_eq!(response.headers().get("x-cache").unwrap(), "HIT");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(image_dimensions(&body), (40, 20));
}

// =============================================================================
// Conditional Requests
// =============================================================================

#[tokio::test]
async fn test_if_none_match_returns_304() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(32, 32),
    ));
    let router = router_for(origin.clone(), &dir);

    let first = router
        .clone()
        .oneshot(get("/uploads/marketplace/a.png?w=16"))
        .await
        .unwrap();
    let etag = first.headers().get(header::ETAG).unwrap().clone();

    let request = Request::builder()
        .uri("/uploads/marketplace/a.png?w=16")
        .header(header::IF_NONE_MATCH, etag.clone())
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers().get(header::ETAG).unwrap(), &etag);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
    assert_eq!(origin.get_count(), 1);
}

#[tokio::test]
async fn test_if_none_match_on_uncached_entry_serves_body() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(32, 32),
    ));

    // Learn the ETag from one cache, then ask a fresh cache for it
    let warm_dir = tempfile::tempdir().unwrap();
    let etag = router_for(origin.clone(), &warm_dir)
        .oneshot(get("/uploads/marketplace/a.png"))
        .await
        .unwrap()
        .headers()
        .get(header::ETAG)
        .unwrap()
        .clone();

    let request = Request::builder()
        .uri("/uploads/marketplace/a.png")
        .header(header::IF_NONE_MATCH, etag)
        .body(Body::empty())
        .unwrap();
    let response = router_for(origin, &dir).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_invalid_folder_returns_404_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(8, 8),
    ));
    let router = router_for(origin.clone(), &dir);

    let response = router
        .oneshot(get("/uploads/evil/a.png?w=10"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);

    assert_eq!(origin.get_count(), 0);
    assert!(stored_keys(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unsanitized_filenames_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new());
    let router = router_for(origin.clone(), &dir);

    for uri in [
        "/uploads/marketplace/..%2F..%2Fetc%2Fpasswd",
        "/uploads/marketplace/../secret.png",
        "/uploads/marketplace/nested/dir.png",
        "/uploads/marketplace/my%20chair.png",
        "/uploads/marketplace/.hidden",
        "/uploads/marketplace/%00.png",
    ] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }

    assert_eq!(origin.get_count(), 0);
    assert!(stored_keys(dir.path()).is_empty());
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_original_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new());
    let router = router_for(origin.clone(), &dir);

    let response = router
        .oneshot(get("/uploads/marketplace/missing.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(origin.get_count(), 1);
}

#[tokio::test]
async fn test_corrupt_original_returns_500_and_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "broken.png",
        b"\x89PNG\r\n\x1a\nthis is not really a png".to_vec(),
    ));
    let router = router_for(origin.clone(), &dir);

    let response = router
        .clone()
        .oneshot(get("/uploads/marketplace/broken.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "decode_error");
    assert!(stored_keys(dir.path()).is_empty());

    // Not cached, so the next request goes back to the origin
    let _ = router
        .oneshot(get("/uploads/marketplace/broken.png"))
        .await
        .unwrap();
    assert_eq!(origin.get_count(), 2);
}

#[tokio::test]
async fn test_origin_timeout_returns_504() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(
        MockOriginStore::new()
            .with_asset("marketplace", "slow.png", create_png(8, 8))
            .with_delay(Duration::from_millis(500)),
    );
    let service = build_service_with_config(
        origin,
        dir.path(),
        ServiceConfig {
            origin_timeout: Duration::from_millis(20),
            ..ServiceConfig::default()
        },
    );
    let router = create_router(service, RouterConfig::new().with_tracing(false));

    let response = router
        .oneshot(get("/uploads/marketplace/slow.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = body_json(response).await;
    assert_eq!(json["error"], "origin_timeout");
}

#[tokio::test]
async fn test_origin_connection_error_returns_502() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(
        MockOriginStore::new().with_failure(IoError::Connection("connection refused".to_string())),
    );
    let router = router_for(origin, &dir);

    let response = router
        .oneshot(get("/uploads/marketplace/a.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

// =============================================================================
// Health and Stats
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_for(Arc::new(MockOriginStore::new()), &dir);

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let origin = Arc::new(MockOriginStore::new().with_asset(
        "marketplace",
        "a.png",
        create_png(8, 8),
    ));
    let router = router_for(origin, &dir);

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(get("/uploads/marketplace/a.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["origin_fetches"], 1);
    assert_eq!(json["transforms"], 1);
    assert_eq!(json["cache_write_failures"], 0);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let router = router_for(Arc::new(MockOriginStore::new()), &dir);

    let response = router.oneshot(get("/uploads/marketplace")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
