//! HTTP server layer for the derivative cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        GET /uploads/{folder}/{filename}?w=&h=&q=                │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error → HTTP) │  │ (router, CORS, tracing)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    derivative_handler, health_handler, stats_handler, AppState, DerivativePathParams,
    DerivativeQueryParams, ErrorResponse, HealthResponse, X_CACHE, X_QUALITY_TIER,
};
pub use routes::{create_router, RouterConfig};
