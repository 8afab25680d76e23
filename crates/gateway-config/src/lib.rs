//! # Gateway Config
//!
//! Configuration for the failover gateway: a serde schema readable from YAML
//! or TOML, `GATEWAY_*` environment overrides, and validation.
//!
//! ```no_run
//! # async fn example() -> Result<(), gateway_config::ConfigError> {
//! let config = gateway_config::ConfigLoader::new()
//!     .with_file("gateway.yaml")
//!     .load()
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    ConcurrencyConfig, DegradationConfig, FailoverConfig, GatewayConfig, HealthConfig,
    RateLimitConfig, RequestConfig, SelectionConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{parse_str, ConfigFormat, ConfigLoader};
