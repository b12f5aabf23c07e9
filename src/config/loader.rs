//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GateConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable that overrides `auth.secret`.
pub const SECRET_ENV: &str = "GATE_JWT_SECRET";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GateConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GateConfig = toml::from_str(&content)?;
    apply_env(&mut config);
    finish(config)
}

/// Defaults plus environment overrides, for running without a file.
pub fn default_config() -> Result<GateConfig, ConfigError> {
    let mut config = GateConfig::default();
    apply_env(&mut config);
    finish(config)
}

fn apply_env(config: &mut GateConfig) {
    if let Ok(secret) = std::env::var(SECRET_ENV) {
        if !secret.is_empty() {
            config.auth.secret = secret;
        }
    }
}

fn finish(config: GateConfig) -> Result<GateConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
