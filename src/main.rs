//! Derivative Cache - resized WebP images from an S3 origin.
//!
//! This binary starts the HTTP server (or runs a one-off sweep) and wires
//! all components together.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use derivative_cache::{
    config::{Cli, Command, ServeConfig, SweepConfig},
    server::{create_router, RouterConfig},
    store::ORPHAN_TMP_AGE,
    CacheJanitor, DerivativeCacheService, DiskCacheStore, S3OriginStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sweep(config) => run_sweep(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Derivative Cache v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  S3 bucket: {}", config.s3_bucket);
    if let Some(ref endpoint) = config.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.s3_region);
    info!("  Cache dir: {}", config.cache_dir.display());
    info!(
        "  Cache budget: {}MB, max age {}s",
        config.max_cache_size / (1024 * 1024),
        config.cache_duration_secs
    );

    let store = match DiskCacheStore::open(&config.cache_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open cache directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let origin = Arc::new(
        S3OriginStore::connect(
            config.s3_bucket.clone(),
            &config.s3_region,
            config.s3_endpoint.as_deref(),
        )
        .await,
    );

    let service = DerivativeCacheService::new(
        origin,
        Arc::clone(&store),
        config.quality_policy(),
        config.service_config(),
    );

    let janitor = Arc::new(CacheJanitor::new(Arc::clone(&store), config.janitor_config()));
    let janitor_handle = janitor.spawn();
    info!(
        "  Janitor: every {}s, at most {} deletions per sweep",
        config.janitor_interval_secs, config.janitor_max_deletions
    );

    let router = create_router(service, build_router_config(&config));
    let addr = config.bind_address();

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            janitor_handle.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl 'http://{}/uploads/marketplace/<file>?w=200&q=40'", addr);
    info!("");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    janitor_handle.shutdown().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "derivative_cache=debug,tower_http=debug"
    } else {
        "derivative_cache=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new();

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Sweep Command
// =============================================================================

async fn run_sweep(config: SweepConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = Arc::new(DiskCacheStore::new(&config.cache_dir));
    let orphans = store.clean_orphaned_tmp(ORPHAN_TMP_AGE).await;
    if orphans > 0 {
        info!(removed = orphans, "Removed orphaned temp files");
    }

    let janitor = CacheJanitor::new(store, config.janitor_config());
    let report = janitor.sweep(SystemTime::now()).await;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: failed to serialize report: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if report.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
