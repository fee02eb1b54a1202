//! Configuration error types.

use thiserror::Error;

/// Result type alias for settings and config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while turning raw parameters into typed settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for '{name}': {value}")]
    InvalidValue { name: String, value: String },

    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("invalid disk space threshold '{0}'")]
    DiskSpaceThreshold(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
