//! Configuration loading.

use crate::config::GatewayConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (`.yaml`, `.yml`)
    Yaml,
    /// TOML (`.toml`)
    Toml,
}

impl ConfigFormat {
    /// Infer the format from a file extension
    ///
    /// # Errors
    /// Returns an error for unknown or missing extensions
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }
}

/// Parse a configuration document
///
/// # Errors
/// Returns a parse error when the document does not match the schema
pub fn parse_str(contents: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
    let parsed = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::Parse {
        format: format.name(),
        message,
    })
}

/// Loads configuration from an optional file, then environment overrides,
/// then validates
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_overrides: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader that reads environment overrides and no file
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            env_overrides: true,
        }
    }

    /// Read the given file
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Enable or disable `GATEWAY_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    /// Load and validate the configuration
    ///
    /// # Errors
    /// Returns I/O, parse, override or validation errors
    pub async fn load(&self) -> ConfigResult<GatewayConfig> {
        let mut config = match &self.file {
            Some(path) => {
                let format = ConfigFormat::from_path(path)?;
                let contents =
                    tokio::fs::read_to_string(path)
                        .await
                        .map_err(|source| ConfigError::Io {
                            path: path.clone(),
                            source,
                        })?;
                debug!(path = %path.display(), format = format.name(), "Parsing configuration file");
                parse_str(&contents, format)?
            }
            None => GatewayConfig::default(),
        };

        if self.env_overrides {
            config.apply_env_overrides(|var| std::env::var(var).ok())?;
        }

        config.validate_all()?;

        info!(
            models = config.models.len(),
            global_limit = config.concurrency.global_limit,
            max_retries = config.failover.max_retries,
            "Configuration loaded"
        );
        Ok(config)
    }
}
