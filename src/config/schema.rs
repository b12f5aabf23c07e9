//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gate.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the access gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Credential resolution settings.
    pub auth: AuthConfig,

    /// Cross-origin request policy.
    pub cors: CorsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Steady refill rate per client address.
    pub requests_per_second: f64,

    /// Bucket capacity per client address.
    pub burst_size: u32,

    /// Take the client address from X-Forwarded-For / X-Real-IP.
    /// Only safe behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,

    /// How often the evictor sweeps idle clients, in seconds.
    pub eviction_interval_secs: u64,

    /// Idle time after which a client's bucket is dropped, in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst_size: 4,
            trust_proxy_headers: false,
            eviction_interval_secs: 60,
            idle_timeout_secs: 180,
        }
    }
}

/// Which bearer token scheme the gate accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Random tokens looked up by hash in the token store.
    #[default]
    Opaque,
    /// HMAC-signed JWTs verified against the shared secret.
    Signed,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token scheme.
    pub mode: AuthMode,

    /// HS256 signing secret (signed mode only).
    /// Overridden by the `GATE_JWT_SECRET` environment variable.
    pub secret: String,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `aud` claim member.
    pub audience: String,

    /// Lifetime of tokens minted by this service, in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Opaque,
            secret: String::new(),
            issuer: "access-gate".to_string(),
            audience: "access-gate".to_string(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests, e.g. "https://app.example.com".
    pub trusted_origins: Vec<String>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Deadline for each credential, user or permission lookup, in milliseconds.
    pub lookup_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            lookup_ms: 3000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus exporter bind address.
    pub metrics_address: String,

    /// Mount `GET /debug/vars`.
    pub debug_vars_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            debug_vars_enabled: true,
        }
    }
}
