//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field rules.
//! All violations are reported, not just the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::{AuthMode, GateConfig};

/// Minimum HS256 secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("rate_limit.requests_per_second must be greater than zero")]
    NonPositiveRate,

    #[error("rate_limit.burst_size must be at least 1")]
    ZeroBurst,

    #[error("rate_limit.{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("auth.secret must be at least {MIN_SECRET_LEN} bytes in signed mode")]
    WeakSecret,

    #[error("auth.{0} must not be empty in signed mode")]
    MissingClaim(&'static str),

    #[error("cors.trusted_origins entry {0:?} is not a scheme://host[:port] origin")]
    InvalidOrigin(String),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let limits = &config.rate_limit;
    if !(limits.requests_per_second > 0.0) {
        errors.push(ValidationError::NonPositiveRate);
    }
    if limits.burst_size == 0 {
        errors.push(ValidationError::ZeroBurst);
    }
    if limits.eviction_interval_secs == 0 {
        errors.push(ValidationError::ZeroInterval("eviction_interval_secs"));
    }
    if limits.idle_timeout_secs == 0 {
        errors.push(ValidationError::ZeroInterval("idle_timeout_secs"));
    }

    if config.auth.mode == AuthMode::Signed {
        if config.auth.secret.len() < MIN_SECRET_LEN {
            errors.push(ValidationError::WeakSecret);
        }
        if config.auth.issuer.is_empty() {
            errors.push(ValidationError::MissingClaim("issuer"));
        }
        if config.auth.audience.is_empty() {
            errors.push(ValidationError::MissingClaim("audience"));
        }
    }

    for origin in &config.cors.trusted_origins {
        if !is_origin(origin) {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }
    if config.timeouts.lookup_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("lookup_ms"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Browsers send the serialized origin, so the configured value must be
/// exactly that: no path, query or trailing slash.
fn is_origin(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => url.has_host() && url.origin().ascii_serialization() == value,
        Err(_) => false,
    }
}
