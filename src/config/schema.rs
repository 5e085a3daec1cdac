//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! gateway. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// External identity provider.
    pub provider: ProviderConfig,

    /// Session validation settings.
    pub session: SessionConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Brute force backoff configuration.
    pub brute_force: BruteForceConfig,

    /// Permission cache settings.
    pub permissions: PermissionsConfig,

    /// Audit trail settings.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Stale-row cleanup settings.
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Outbound identity-provider call timeout in seconds.
    pub provider_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            provider_secs: 5,
        }
    }
}

/// External identity provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider's auth API.
    pub base_url: String,

    /// Service API key sent alongside bearer tokens.
    pub api_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9999/".to_string(),
            api_key: String::new(),
        }
    }
}

/// Session validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds before expiry at which clients are told to refresh.
    pub refresh_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_window_secs: 300,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Fixed window size in seconds.
    pub window_secs: u64,

    /// Budget per window for general traffic.
    pub default_limit: u32,

    /// Budget per window for authentication-action endpoints.
    pub auth_limit: u32,

    /// Source addresses that bypass limiting. `*` exempts everyone.
    pub exempt_ips: Vec<String>,

    /// Low-sensitivity system endpoints never counted.
    pub exempt_endpoints: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            default_limit: 60,
            auth_limit: 10,
            exempt_ips: Vec::new(),
            exempt_endpoints: vec![
                "/health".to_string(),
                "/time".to_string(),
                "/version".to_string(),
            ],
        }
    }
}

/// One progressive-backoff step: reaching `failures` sets a block of
/// `block_minutes`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BackoffStep {
    pub failures: u32,
    pub block_minutes: u64,
}

impl BackoffStep {
    pub fn default_steps() -> Vec<BackoffStep> {
        vec![
            BackoffStep { failures: 3, block_minutes: 15 },
            BackoffStep { failures: 5, block_minutes: 60 },
            BackoffStep { failures: 10, block_minutes: 240 },
            BackoffStep { failures: 20, block_minutes: 1440 },
        ]
    }
}

/// Brute force guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BruteForceConfig {
    /// Enable brute force tracking.
    pub enabled: bool,

    /// Ascending threshold → block duration table.
    pub steps: Vec<BackoffStep>,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            steps: BackoffStep::default_steps(),
        }
    }
}

/// Permission cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Cache entry time-to-live in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Capacity of the background write queue. Writes beyond a full
    /// queue are dropped with a local error log, never blocking the
    /// request.
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Capacity of each telemetry ring buffer.
    pub buffer_capacity: usize,

    /// Maximum tracked rate-limit bucket views.
    pub rate_bucket_capacity: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            buffer_capacity: 500,
            rate_bucket_capacity: 500,
        }
    }
}

/// Stale-row cleanup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Requests between eligibility checks.
    pub interval_calls: u64,

    /// Wall-clock seconds after which cleanup runs even under low
    /// traffic.
    pub interval_secs: u64,

    /// Counter/session retention horizon in seconds.
    pub max_age_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_calls: 100,
            interval_secs: 300,
            max_age_secs: 3600,
        }
    }
}

/// Admin dashboard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin/dashboard surface.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
