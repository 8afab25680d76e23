//! Configuration errors.

use gateway_core::GatewayError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file {path:?}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not map to a known format
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// The document could not be deserialised
    #[error("Failed to parse {format} configuration: {message}")]
    Parse {
        /// Format that was parsed
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// An environment override holds an unusable value
    #[error("Invalid value for {var}: '{value}'")]
    EnvOverride {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },

    /// The configuration violates a constraint
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<ConfigError> for GatewayError {
    fn from(error: ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}
