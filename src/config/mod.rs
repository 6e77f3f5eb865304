//! Configuration module for the exporter.
//!
//! Settings are layered, lowest precedence first:
//! - built-in defaults
//! - an optional YAML file (with `${VAR}` / `${VAR:-default}` expansion)
//! - `UNIFI_PROTECT_EXPORTER_<SECTION>__<FIELD>` environment variables
//! - command-line flags, applied by the binary

mod app;
mod validation;

pub use app::{
    ApiConfig, CamerasConfig, CollectorsConfig, LogLevel, LoggingConfig, MonitoringConfig,
    Secret, ServerConfig, Settings, UnifiConfig, UpdateIntervals,
};
pub use validation::{ConfigError, ENV_PREFIX, apply_env_overrides, check_range, expand_env_vars};

// Re-export constants
pub use app::{DEFAULT_LISTEN_PORT, DEFAULT_UNIFI_PORT};
