//! Centralized Configuration
//!
//! All tunables of the data layer in one place. Durations are stored as
//! integer milliseconds so the structures read naturally from TOML and
//! environment variables; accessors return `Duration`.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{CoreError, Result};

/// Base URL baked in at build time, if any
pub const BUILD_API_URL: Option<&str> = option_env!("BEANMARKET_API_URL");

/// Fallback base URL when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

// ----------------------------------------------------------------------------
// API Configuration
// ----------------------------------------------------------------------------

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every request path is joined onto
    pub base_url: String,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Additional attempts after the first for transient failures
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
    /// Sent as `User-Agent`
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: BUILD_API_URL.unwrap_or(DEFAULT_API_URL).to_string(),
            timeout_ms: 15_000,   // 15 seconds per attempt
            max_retries: 2,       // 3 attempts total
            retry_delay_ms: 1_000,
            user_agent: concat!("beanmarket/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Fast timeouts and retries for tests
    pub fn testing() -> Self {
        Self {
            base_url: "http://beanmarket.test/api".to_string(),
            timeout_ms: 200,
            max_retries: 2,
            retry_delay_ms: 10,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Cache Configuration
// ----------------------------------------------------------------------------

/// Query cache lifetimes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long fetched data stays fresh
    pub stale_time_ms: u64,
    /// How long an unobserved entry is kept before eviction
    pub gc_time_ms: u64,
    /// Interval of the background eviction sweep
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 5 * 60 * 1_000,  // 5 minutes
            gc_time_ms: 30 * 60 * 1_000,    // 30 minutes
            sweep_interval_ms: 60 * 1_000,  // 1 minute
        }
    }
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Short lifetimes for tests
    pub fn testing() -> Self {
        Self {
            stale_time_ms: 1_000,
            gc_time_ms: 5_000,
            sweep_interval_ms: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Authentication endpoints and session persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// JSON file holding the persisted session; in-memory when unset
    pub storage_path: Option<PathBuf>,
    pub login_path: String,
    pub google_login_path: String,
    pub apple_login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            login_path: "/auth/login".to_string(),
            google_login_path: "/auth/google-login".to_string(),
            apple_login_path: "/auth/apple-login".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `beanmarket_client=debug`
    pub filter: String,
    /// Include span targets in output
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            with_target: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the data layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl MarketplaceConfig {
    /// Configuration for tests: fast timeouts, short cache lifetimes
    pub fn testing() -> Self {
        Self {
            api: ApiConfig::testing(),
            cache: CacheConfig::testing(),
            session: SessionConfig::default(),
            logging: LoggingConfig {
                filter: "debug".to_string(),
                with_target: true,
            },
        }
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(CoreError::config_error("api.base_url", "must not be empty"));
        }
        if self.api.timeout_ms == 0 {
            return Err(CoreError::config_error("api.timeout_ms", "must be positive"));
        }
        if self.cache.gc_time_ms < self.cache.stale_time_ms {
            return Err(CoreError::config_error(
                "cache.gc_time_ms",
                "must be at least cache.stale_time_ms",
            ));
        }
        if self.cache.sweep_interval_ms == 0 {
            return Err(CoreError::config_error("cache.sweep_interval_ms", "must be positive"));
        }
        for (field, path) in [
            ("session.login_path", &self.session.login_path),
            ("session.google_login_path", &self.session.google_login_path),
            ("session.apple_login_path", &self.session.apple_login_path),
        ] {
            if !path.starts_with('/') {
                return Err(CoreError::config_error(field, "must start with '/'"));
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
