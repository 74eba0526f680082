//! Canonical server configuration shared across subsystems.

use crate::types::SecurityTier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Connection admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionLimits {
    /// Maximum concurrently admitted connections.
    pub max_connections: usize,
    /// Maximum connections from a single client IP.
    pub max_per_ip: usize,
    /// Idle timeout before the reaper removes a connection (seconds).
    pub connection_timeout_secs: u64,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 50,
            max_per_ip: 10,
            connection_timeout_secs: 3600,
        }
    }
}

/// Sliding-window rate limit parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    /// Requests admitted per window per connection.
    pub max_requests: usize,
    /// Window width in seconds.
    pub window_seconds: u64,
    /// Short-burst cap (same algorithm over a 1-second window).
    pub burst_limit: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_seconds: 60,
            burst_limit: 5,
        }
    }
}

/// Circuit breaker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures counted in Closed before tripping to Open.
    pub failure_threshold: u32,
    /// Seconds in Open before a half-open trial is allowed.
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

/// Artifact retention defaults used by the periodic auto-cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum artifact age before the auto-cleanup considers it.
    pub retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base directory for artifact storage and workspaces.
    /// Defaults to `<system temp>/crucible` when not set.
    pub base_dir: Option<PathBuf>,
    /// Default security tier applied to workspaces without an override.
    pub security_tier: SecurityTier,
    pub connections: ConnectionLimits,
    pub rate_limits: RateLimits,
    pub breaker: BreakerConfig,
    pub retention: RetentionConfig,
    /// Whether the sliding-window rate limiter is consulted at all.
    pub enable_rate_limiting: bool,
    /// Whether API-key authentication is required for tool calls.
    pub enable_auth: bool,
    /// Maximum accepted raw request size in bytes (requests of exactly
    /// this size are accepted).
    pub max_request_bytes: usize,
    /// Maximum parameter nesting depth (exactly this depth is accepted).
    pub max_params_depth: usize,
    /// Maximum serialized tool response size before truncation.
    pub max_response_bytes: usize,
    /// Health monitor sweep interval (seconds).
    pub monitoring_interval_secs: u64,
    /// Connection reaper interval (seconds).
    pub reap_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            security_tier: SecurityTier::default(),
            connections: ConnectionLimits::default(),
            rate_limits: RateLimits::default(),
            breaker: BreakerConfig::default(),
            retention: RetentionConfig::default(),
            enable_rate_limiting: true,
            enable_auth: false,
            max_request_bytes: 10 * 1024 * 1024,
            max_params_depth: 10,
            max_response_bytes: 1024 * 1024,
            monitoring_interval_secs: 60,
            reap_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Resolve the effective base directory.
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("crucible"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.connections.max_connections, 50);
        assert_eq!(config.connections.max_per_ip, 10);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.max_request_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_params_depth, 10);
        assert!(!config.enable_auth);
    }

    #[test]
    fn test_resolved_base_dir_fallback() {
        let config = ServerConfig::default();
        assert!(config
            .resolved_base_dir()
            .ends_with("crucible"));
    }
}
