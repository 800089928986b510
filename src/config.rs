//! Configuration management for the derivative cache.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `DC_` prefix
//! - Sensible defaults for all optional settings
//!
//! Parsed configuration is converted into the per-component config structs
//! ([`QualityPolicy`], [`ServiceConfig`], [`JanitorConfig`]) which are handed
//! to constructors. Nothing else reads process state.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use derivative_cache::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Sweep(config) => println!("Sweeping {}", config.cache_dir.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `DC_HOST` - Server bind address (default: 0.0.0.0)
//! - `DC_PORT` - Server port (default: 3000)
//! - `DC_S3_BUCKET` - S3 bucket holding originals (required)
//! - `DC_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `DC_S3_REGION` - AWS region (default: us-east-1)
//! - `DC_ORIGIN_TIMEOUT_SECS` - Origin fetch timeout (default: 10)
//! - `DC_CACHE_DIR` - Derivative cache directory (default: cache)
//! - `DC_MAX_CACHE_SIZE` - Disk budget, e.g. `512MB` (default: 1GB)
//! - `DC_CACHE_DURATION_SECS` - Maximum entry age (default: 604800)
//! - `DC_JANITOR_INTERVAL_SECS` - Time between sweeps (default: 600)
//! - `DC_JANITOR_MAX_DELETIONS` - Deletions per sweep (default: 10000)
//! - `DC_JANITOR_TIME_BUDGET_SECS` - Time per sweep (default: 30)
//! - `DC_THUMBNAIL_MAX_QUALITY` / `DC_PREVIEW_MAX_QUALITY` - Tier thresholds (30 / 50)
//! - `DC_THUMBNAIL_QUALITY` / `DC_PREVIEW_QUALITY` / `DC_FULL_QUALITY` - Encoder quality (30 / 50 / 90)
//! - `DC_MAX_DIMENSION` - Cap on requested width and height (default: 4096)
//! - `DC_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::derivative::{QualityPolicy, ServiceConfig, DEFAULT_MAX_DIMENSION, WEBP_MAX_DIMENSION};
use crate::store::{JanitorConfig, DEFAULT_MAX_SCAN_ENTRIES};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default cache directory.
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Default disk budget.
pub const DEFAULT_MAX_CACHE_SIZE: &str = "1GB";

/// Default maximum entry age in seconds (7 days).
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Default origin fetch timeout in seconds.
pub const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 10;

/// Default time between janitor sweeps in seconds.
pub const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 600;

/// Default deletions per sweep.
pub const DEFAULT_JANITOR_MAX_DELETIONS: usize = 10_000;

/// Default time budget per sweep in seconds.
pub const DEFAULT_JANITOR_TIME_BUDGET_SECS: u64 = 30;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Derivative Cache - resized WebP images from an S3 origin.
#[derive(Parser, Debug, Clone)]
#[command(name = "derivative-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server.
    Serve(ServeConfig),

    /// Run one janitor sweep over a cache directory and print the report.
    Sweep(SweepConfig),
}

/// Options for `derivative-cache serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DC_PORT")]
    pub port: u16,

    // =========================================================================
    // Origin Configuration
    // =========================================================================
    /// S3 bucket holding the original uploads.
    #[arg(long, env = "DC_S3_BUCKET")]
    pub s3_bucket: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "DC_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "DC_S3_REGION")]
    pub s3_region: String,

    /// Upper bound on a single origin fetch, in seconds.
    #[arg(long, default_value_t = DEFAULT_ORIGIN_TIMEOUT_SECS, env = "DC_ORIGIN_TIMEOUT_SECS")]
    pub origin_timeout_secs: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Directory holding cached derivatives.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "DC_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Disk budget for cached derivatives (B, KB, MB or GB).
    #[arg(long, default_value = DEFAULT_MAX_CACHE_SIZE, env = "DC_MAX_CACHE_SIZE", value_parser = parse_byte_size)]
    pub max_cache_size: u64,

    /// Maximum age of a cached derivative, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_DURATION_SECS, env = "DC_CACHE_DURATION_SECS")]
    pub cache_duration_secs: u64,

    /// Time between janitor sweeps, in seconds.
    #[arg(long, default_value_t = DEFAULT_JANITOR_INTERVAL_SECS, env = "DC_JANITOR_INTERVAL_SECS")]
    pub janitor_interval_secs: u64,

    /// Maximum deletions per sweep.
    #[arg(long, default_value_t = DEFAULT_JANITOR_MAX_DELETIONS, env = "DC_JANITOR_MAX_DELETIONS")]
    pub janitor_max_deletions: usize,

    /// Maximum time spent per sweep, in seconds.
    #[arg(long, default_value_t = DEFAULT_JANITOR_TIME_BUDGET_SECS, env = "DC_JANITOR_TIME_BUDGET_SECS")]
    pub janitor_time_budget_secs: u64,

    // =========================================================================
    // Quality Configuration
    // =========================================================================
    /// Requested qualities at or below this map to the thumbnail tier.
    #[arg(long, default_value_t = 30, env = "DC_THUMBNAIL_MAX_QUALITY")]
    pub thumbnail_max_quality: u8,

    /// Requested qualities at or below this map to the preview tier.
    #[arg(long, default_value_t = 50, env = "DC_PREVIEW_MAX_QUALITY")]
    pub preview_max_quality: u8,

    /// Encoder quality of thumbnail derivatives.
    #[arg(long, default_value_t = 30, env = "DC_THUMBNAIL_QUALITY")]
    pub thumbnail_quality: u8,

    /// Encoder quality of preview derivatives.
    #[arg(long, default_value_t = 50, env = "DC_PREVIEW_QUALITY")]
    pub preview_quality: u8,

    /// Encoder quality of full derivatives.
    #[arg(long, default_value_t = 90, env = "DC_FULL_QUALITY")]
    pub full_quality: u8,

    /// Requested widths and heights above this are clamped.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "DC_MAX_DIMENSION")]
    pub max_dimension: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "DC_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.s3_bucket.trim().is_empty() {
            return Err("S3 bucket name is required. Set --s3-bucket or DC_S3_BUCKET".to_string());
        }
        if self.origin_timeout_secs == 0 {
            return Err("origin_timeout_secs must be greater than 0".to_string());
        }
        if self.max_cache_size == 0 {
            return Err("max_cache_size must be greater than 0".to_string());
        }
        if self.cache_duration_secs == 0 {
            return Err("cache_duration_secs must be greater than 0".to_string());
        }
        if self.janitor_interval_secs == 0 {
            return Err("janitor_interval_secs must be greater than 0".to_string());
        }
        if self.janitor_max_deletions == 0 {
            return Err("janitor_max_deletions must be greater than 0".to_string());
        }
        if self.janitor_time_budget_secs == 0 {
            return Err("janitor_time_budget_secs must be greater than 0".to_string());
        }
        if self.max_dimension == 0 || self.max_dimension > WEBP_MAX_DIMENSION {
            return Err(format!(
                "max_dimension must be between 1 and {}",
                WEBP_MAX_DIMENSION
            ));
        }

        self.quality_policy().validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn quality_policy(&self) -> QualityPolicy {
        QualityPolicy {
            thumbnail_max: self.thumbnail_max_quality,
            preview_max: self.preview_max_quality,
            thumbnail_quality: self.thumbnail_quality,
            preview_quality: self.preview_quality,
            full_quality: self.full_quality,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            cache_duration: Duration::from_secs(self.cache_duration_secs),
            origin_timeout: Duration::from_secs(self.origin_timeout_secs),
            max_dimension: self.max_dimension,
        }
    }

    pub fn janitor_config(&self) -> JanitorConfig {
        JanitorConfig {
            interval: Duration::from_secs(self.janitor_interval_secs),
            cache_duration: Duration::from_secs(self.cache_duration_secs),
            max_cache_size_bytes: self.max_cache_size,
            max_deletions: self.janitor_max_deletions,
            time_budget: Duration::from_secs(self.janitor_time_budget_secs),
            max_scan_entries: DEFAULT_MAX_SCAN_ENTRIES,
        }
    }
}

/// Options for `derivative-cache sweep`.
#[derive(Args, Debug, Clone)]
pub struct SweepConfig {
    /// Directory holding cached derivatives.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "DC_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Disk budget for cached derivatives (B, KB, MB or GB).
    #[arg(long, default_value = DEFAULT_MAX_CACHE_SIZE, env = "DC_MAX_CACHE_SIZE", value_parser = parse_byte_size)]
    pub max_cache_size: u64,

    /// Maximum age of a cached derivative, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_DURATION_SECS, env = "DC_CACHE_DURATION_SECS")]
    pub cache_duration_secs: u64,

    /// Maximum deletions for this sweep.
    #[arg(long, default_value_t = DEFAULT_JANITOR_MAX_DELETIONS, env = "DC_JANITOR_MAX_DELETIONS")]
    pub janitor_max_deletions: usize,

    /// Maximum time spent on this sweep, in seconds.
    #[arg(long, default_value_t = DEFAULT_JANITOR_TIME_BUDGET_SECS, env = "DC_JANITOR_TIME_BUDGET_SECS")]
    pub janitor_time_budget_secs: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size == 0 {
            return Err("max_cache_size must be greater than 0".to_string());
        }
        if self.cache_duration_secs == 0 {
            return Err("cache_duration_secs must be greater than 0".to_string());
        }
        if self.janitor_max_deletions == 0 {
            return Err("janitor_max_deletions must be greater than 0".to_string());
        }
        if self.janitor_time_budget_secs == 0 {
            return Err("janitor_time_budget_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn janitor_config(&self) -> JanitorConfig {
        JanitorConfig {
            cache_duration: Duration::from_secs(self.cache_duration_secs),
            max_cache_size_bytes: self.max_cache_size,
            max_deletions: self.janitor_max_deletions,
            time_budget: Duration::from_secs(self.janitor_time_budget_secs),
            ..JanitorConfig::default()
        }
    }
}

/// Parse a byte size such as `1GB`, `512MB`, `64KB` or `1000`.
///
/// Suffixes are case-insensitive and 1024-based; a bare number is bytes.
pub fn parse_byte_size(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}' (expected e.g. 512MB or 1GB)", trimmed))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", trimmed))
}

// =============================================================================
// Tests
// =============================================================================
