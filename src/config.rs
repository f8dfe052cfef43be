//! Process-lifecycle configuration.
//!
//! Loaded once at process start, handed down as an `Arc<EngineConfig>`. A
//! request handler must never be the first thing to touch it lazily.

use std::env;
use std::time::Duration;

/// Typed, process-wide configuration with env-var overrides and sane defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the sqlite database file. `:memory:` for ephemeral/test use.
    pub database_path: String,
    /// The graph id demo-mode tenants are pinned to.
    pub demo_graph_id: String,
    /// Name of the default branch every graph gets.
    pub default_branch: String,
    /// Name of the default graph created on first use.
    pub default_graph: String,
    /// Retry policy for transient store write failures.
    pub retry: RetryConfig,
    /// Token-bucket capacity for outbound collaborator calls.
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Tokens refilled per second, per tenant.
    pub per_tenant_rps: f64,
    /// Tokens refilled per second, per user.
    pub per_user_rps: f64,
    /// Bucket capacity (burst size).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_tenant_rps: 5.0,
            per_user_rps: 2.0,
            burst: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "kge.db".to_string(),
            demo_graph_id: "demo".to_string(),
            default_branch: "main".to_string(),
            default_graph: "default".to_string(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("KGE_DATABASE_PATH") {
            cfg.database_path = v;
        }
        if let Ok(v) = env::var("KGE_DEMO_GRAPH_ID") {
            cfg.demo_graph_id = v;
        }
        if let Ok(v) = env::var("KGE_DEFAULT_BRANCH") {
            cfg.default_branch = v;
        }
        if let Ok(v) = env::var("KGE_DEFAULT_GRAPH") {
            cfg.default_graph = v;
        }
        if let Ok(v) = env::var("KGE_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                cfg.retry.max_attempts = n;
            }
        }
        cfg
    }
}
