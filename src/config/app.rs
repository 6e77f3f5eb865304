//! Application configuration structures.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::Tier;
use crate::metrics::{DEFAULT_BUCKETS, DEFAULT_NAMESPACE};

use super::validation::{ConfigError, apply_env_overrides, check_range, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default HTTPS port of the Protect console.
pub const DEFAULT_UNIFI_PORT: u16 = 443;

/// Default exporter listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 9099;

fn default_unifi_port() -> u16 {
    DEFAULT_UNIFI_PORT
}

fn default_api_timeout() -> u64 {
    30
}

fn default_concurrency_limit() -> usize {
    crate::upstream::DEFAULT_CONCURRENCY_LIMIT
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Secret
// =============================================================================

/// A string that never shows up in logs or serialized output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The plain-text value. Only pass this to the upstream login.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("********")
    }
}

// =============================================================================
// UniFi Configuration
// =============================================================================

/// Protect console connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnifiConfig {
    /// Console hostname or IP address.
    pub host: String,

    /// Console HTTPS port (default: 443).
    #[serde(default = "default_unifi_port")]
    pub port: u16,

    pub username: String,

    pub password: Secret,

    /// Verify the console's TLS certificate (default: false, consoles ship
    /// self-signed certificates).
    pub verify_ssl: bool,
}

impl Default for UnifiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_UNIFI_PORT,
            username: String::new(),
            password: Secret::default(),
            verify_ssl: false,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Log verbosity accepted in the config file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse().map_err(|_| {
            format!("invalid log level '{value}', expected one of DEBUG, INFO, WARNING, ERROR, CRITICAL")
        })
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl LoggingConfig {
    pub fn filter_directive(&self) -> &'static str {
        self.level.filter_directive()
    }
}

// =============================================================================
// API Configuration
// =============================================================================

/// Upstream request behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_api_timeout")]
    pub timeout: u64,

    /// Maximum concurrent upstream calls (default: 5).
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Retries for transient request failures (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout: default_api_timeout(),
            concurrency_limit: default_concurrency_limit(),
            max_retries: default_max_retries(),
        }
    }
}

// =============================================================================
// Update Intervals
// =============================================================================

/// Seconds between runs for each collector tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateIntervals {
    pub fast: u64,
    pub medium: u64,
    pub slow: u64,
}

impl Default for UpdateIntervals {
    fn default() -> Self {
        Self {
            fast: 60,
            medium: 300,
            slow: 900,
        }
    }
}

impl UpdateIntervals {
    pub fn for_tier(&self, tier: Tier) -> Duration {
        let seconds = match tier {
            Tier::Fast => self.fast,
            Tier::Medium => self.medium,
            Tier::Slow => self.slow,
        };
        Duration::from_secs(seconds)
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Exporter HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: "0.0.0.0").
    pub host: String,

    /// Listen port (default: 9099).
    pub port: u16,

    /// Prefix for the metrics and health routes, e.g. "/exporter".
    pub path_prefix: String,

    #[serde(default = "default_true")]
    pub enable_health_check: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_LISTEN_PORT,
            path_prefix: String::new(),
            enable_health_check: true,
        }
    }
}

// =============================================================================
// Monitoring Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Prefix of every exported metric name.
    pub namespace: String,

    /// Consecutive failures after which a collector stops the exporter.
    pub max_consecutive_failures: u32,

    /// Buckets of every duration histogram.
    pub histogram_buckets: Vec<f64>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_consecutive_failures: 10,
            histogram_buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

// =============================================================================
// Collectors Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    /// Collectors to run. `None` runs every collector.
    pub enabled_collectors: Option<BTreeSet<String>>,

    /// Collectors never to run, even when listed as enabled.
    pub disable_collectors: BTreeSet<String>,

    /// Per-run timeout in seconds (default: 120).
    pub collector_timeout: u64,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            enabled_collectors: None,
            disable_collectors: BTreeSet::new(),
            collector_timeout: 120,
        }
    }
}

// =============================================================================
// Cameras Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CamerasConfig {
    pub collect_motion_events: bool,

    /// Publish `camera_recording`.
    pub collect_recording_stats: bool,

    pub max_cameras: usize,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            collect_motion_events: true,
            collect_recording_stats: true,
            max_cameras: 1000,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub unifi: UnifiConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub update_intervals: UpdateIntervals,
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
    pub collectors: CollectorsConfig,
    pub cameras: CamerasConfig,
}

impl Settings {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_layered(Some(path.as_ref()), std::iter::empty::<(String, String)>())
    }

    /// Parse and validate a YAML document. `${VAR}` references are expanded
    /// first.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from defaults, an optional YAML file and
    /// `UNIFI_PROTECT_EXPORTER_*` variables, in increasing precedence.
    ///
    /// Pass `std::env::vars()` for `vars` in production.
    pub fn load_layered<I, K, V>(path: Option<&Path>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut root = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&expand_env_vars(&content))?
            }
            None => Value::Null,
        };
        if root.is_null() {
            root = Value::Mapping(Mapping::new());
        }

        let schema = serde_yaml::to_value(Self::default())?;
        let applied = apply_env_overrides(&mut root, &schema, vars);
        if !applied.is_empty() {
            tracing::debug!(overrides = ?applied, "Applied environment overrides");
        }

        let settings: Self = serde_yaml::from_value(root)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Whether the named collector should run. The disable list wins over the
    /// enable list.
    pub fn is_collector_enabled(&self, name: &str) -> bool {
        if self.collectors.disable_collectors.contains(name) {
            return false;
        }
        self.collectors
            .enabled_collectors
            .as_ref()
            .is_none_or(|enabled| enabled.contains(name))
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // UniFi connection
        if self.unifi.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "unifi.host must not be empty".to_string(),
            ));
        }
        if self.unifi.username.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "unifi.username must not be empty".to_string(),
            ));
        }
        check_range("unifi.port", self.unifi.port, 1..=u16::MAX)?;

        // API
        check_range("api.timeout", self.api.timeout, 5..=300)?;
        check_range("api.concurrency_limit", self.api.concurrency_limit, 1..=20)?;
        check_range("api.max_retries", self.api.max_retries, 0..=10)?;

        // Intervals
        check_range("update_intervals.fast", self.update_intervals.fast, 30..=300)?;
        check_range("update_intervals.medium", self.update_intervals.medium, 60..=900)?;
        check_range("update_intervals.slow", self.update_intervals.slow, 300..=3600)?;

        // Server
        self.server.host.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server host address: '{}'",
                self.server.host
            ))
        })?;
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }
        if !is_valid_path_prefix(&self.server.path_prefix) {
            return Err(ConfigError::ValidationError(format!(
                "server.path_prefix must look like '/segment', got '{}'",
                self.server.path_prefix
            )));
        }

        // Monitoring
        if !is_valid_identifier(&self.monitoring.namespace) {
            return Err(ConfigError::ValidationError(format!(
                "monitoring.namespace '{}' is not a valid metric name prefix",
                self.monitoring.namespace
            )));
        }
        check_range(
            "monitoring.max_consecutive_failures",
            self.monitoring.max_consecutive_failures,
            1..=100,
        )?;
        let buckets = &self.monitoring.histogram_buckets;
        if buckets.is_empty()
            || buckets.iter().any(|b| !b.is_finite())
            || buckets.windows(2).any(|pair| pair[0] >= pair[1])
        {
            return Err(ConfigError::ValidationError(
                "monitoring.histogram_buckets must be non-empty and strictly increasing"
                    .to_string(),
            ));
        }

        // Collectors
        check_range(
            "collectors.collector_timeout",
            self.collectors.collector_timeout,
            30..=600,
        )?;

        // Cameras
        check_range("cameras.max_cameras", self.cameras.max_cameras, 1..=10_000)?;

        Ok(())
    }
}

fn is_valid_path_prefix(prefix: &str) -> bool {
    match prefix.strip_prefix('/') {
        None => prefix.is_empty(),
        Some(rest) => rest.split('/').all(|segment| !segment.is_empty()),
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
unifi:
  host: 192.168.1.1
  username: exporter
  password: secret
"#;

    fn minimal() -> Settings {
        Settings::from_yaml_str(MINIMAL).unwrap()
    }

    fn no_env() -> std::iter::Empty<(String, String)> {
        std::iter::empty()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings = minimal();
        assert_eq!(settings.unifi.port, 443);
        assert!(!settings.unifi.verify_ssl);
        assert_eq!(settings.unifi.password.expose(), "secret");
        assert_eq!(settings.logging.level, LogLevel::Info);
        assert_eq!(settings.api.timeout, 30);
        assert_eq!(settings.api.concurrency_limit, 5);
        assert_eq!(settings.server.port, 9099);
        assert!(settings.server.enable_health_check);
        assert_eq!(settings.monitoring.namespace, "unifi_protect");
        assert_eq!(settings.monitoring.histogram_buckets.len(), 10);
        assert_eq!(settings.collectors.collector_timeout, 120);
        assert_eq!(settings.cameras.max_cameras, 1000);
        assert!(settings.cameras.collect_recording_stats);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
unifi:
  host: nvr.local
  port: 7443
  username: exporter
  password: secret
  verify_ssl: true
logging:
  level: warning
api:
  timeout: 10
  concurrency_limit: 2
  max_retries: 0
update_intervals:
  fast: 30
  medium: 120
  slow: 600
server:
  host: 127.0.0.1
  port: 9100
  path_prefix: /protect
  enable_health_check: false
monitoring:
  namespace: protect
  max_consecutive_failures: 3
  histogram_buckets: [1, 5, 10]
collectors:
  enabled_collectors: [camera, event]
  disable_collectors: [event]
  collector_timeout: 60
cameras:
  collect_motion_events: false
  collect_recording_stats: false
  max_cameras: 8
"#;
        let settings = Settings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.logging.level, LogLevel::Warning);
        assert_eq!(settings.logging.filter_directive(), "warn");
        assert_eq!(settings.update_intervals.for_tier(Tier::Medium), Duration::from_secs(120));
        assert_eq!(settings.server.path_prefix, "/protect");
        assert_eq!(settings.monitoring.histogram_buckets, vec![1.0, 5.0, 10.0]);
        assert!(!settings.cameras.collect_motion_events);
        assert!(!settings.cameras.collect_recording_stats);

        assert!(settings.is_collector_enabled("camera"));
        assert!(!settings.is_collector_enabled("event"));
        assert!(!settings.is_collector_enabled("system"));
    }

    #[test]
    fn test_all_collectors_enabled_by_default() {
        let settings = minimal();
        for name in ["system", "camera", "sensor", "event"] {
            assert!(settings.is_collector_enabled(name));
        }
    }

    #[test]
    fn test_missing_host_rejected() {
        let err = Settings::from_yaml_str("unifi:\n  username: exporter\n").unwrap_err();
        assert!(err.to_string().contains("unifi.host"));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let cases = [
            ("api:\n  timeout: 1\n", "api.timeout"),
            ("api:\n  concurrency_limit: 0\n", "api.concurrency_limit"),
            ("api:\n  max_retries: 11\n", "api.max_retries"),
            ("update_intervals:\n  fast: 10\n", "update_intervals.fast"),
            ("update_intervals:\n  slow: 7200\n", "update_intervals.slow"),
            ("monitoring:\n  max_consecutive_failures: 0\n", "max_consecutive_failures"),
            ("collectors:\n  collector_timeout: 5\n", "collector_timeout"),
            ("cameras:\n  max_cameras: 0\n", "max_cameras"),
        ];
        for (section, field) in cases {
            let err = Settings::from_yaml_str(&format!("{MINIMAL}{section}")).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "expected {field} in '{err}'"
            );
        }
    }

    #[test]
    fn test_invalid_server_settings_rejected() {
        let mut settings = minimal();
        settings.server.host = "not-an-ip".to_string();
        assert!(settings.validate().is_err());

        let mut settings = minimal();
        settings.server.port = 0;
        assert!(settings.validate().is_err());

        for prefix in ["metrics", "/", "/a/", "//a"] {
            let mut settings = minimal();
            settings.server.path_prefix = prefix.to_string();
            assert!(settings.validate().is_err(), "prefix {prefix:?} accepted");
        }
        let mut settings = minimal();
        settings.server.path_prefix = "/a/b".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_monitoring_settings_rejected() {
        let mut settings = minimal();
        settings.monitoring.histogram_buckets = vec![1.0, 1.0];
        assert!(settings.validate().is_err());

        let mut settings = minimal();
        settings.monitoring.histogram_buckets.clear();
        assert!(settings.validate().is_err());

        let mut settings = minimal();
        settings.monitoring.namespace = "9lives".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Settings::from_yaml_str(&format!("{MINIMAL}logging:\n  level: verbose\n"));
        assert!(matches!(err, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!("critical".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert_eq!(LogLevel::Critical.filter_directive(), "error");
        assert_eq!(LogLevel::Debug.filter_directive(), "debug");
        assert_eq!(LogLevel::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_secret_is_redacted() {
        let settings = minimal();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret\""));
        assert!(debug.contains("********"));

        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(!yaml.contains("password: secret"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.unifi.host, "192.168.1.1");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Settings::load("/nonexistent/protect-exporter.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = Settings::load_layered(
            Some(file.path()),
            [
                ("UNIFI_PROTECT_EXPORTER_UNIFI__PASSWORD", "0000"),
                ("UNIFI_PROTECT_EXPORTER_API__TIMEOUT", "60"),
                ("UNIFI_PROTECT_EXPORTER_SERVER__ENABLE_HEALTH_CHECK", "false"),
                ("UNIFI_PROTECT_EXPORTER_COLLECTORS__DISABLE_COLLECTORS", "[event]"),
            ],
        )
        .unwrap();

        assert_eq!(settings.unifi.host, "192.168.1.1");
        assert_eq!(settings.unifi.password.expose(), "0000");
        assert_eq!(settings.api.timeout, 60);
        assert!(!settings.server.enable_health_check);
        assert!(!settings.is_collector_enabled("event"));
    }

    #[test]
    fn test_env_only_configuration() {
        let settings = Settings::load_layered(
            None,
            [
                ("UNIFI_PROTECT_EXPORTER_UNIFI__HOST", "10.0.0.2"),
                ("UNIFI_PROTECT_EXPORTER_UNIFI__USERNAME", "exporter"),
                ("UNIFI_PROTECT_EXPORTER_LOGGING__LEVEL", "debug"),
            ],
        )
        .unwrap();
        assert_eq!(settings.unifi.host, "10.0.0.2");
        assert_eq!(settings.logging.level, LogLevel::Debug);

        assert!(Settings::load_layered(None, no_env()).is_err());
    }
}
