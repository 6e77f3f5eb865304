//! Configuration validation and override utilities.

use std::fmt::Display;
use std::ops::RangeInclusive;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "UNIFI_PROTECT_EXPORTER_";

/// Separator between nested keys in an override variable name.
pub const ENV_NESTED_DELIMITER: &str = "__";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Check that `value` lies in `range`.
pub fn check_range<T>(field: &str, value: T, range: RangeInclusive<T>) -> Result<(), ConfigError>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{field} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Overlay `UNIFI_PROTECT_EXPORTER_<SECTION>__<FIELD>` variables onto a
/// parsed YAML document.
///
/// `schema` is the serialized default settings. A field that is a string
/// there takes the raw variable text; any other field parses it as a YAML
/// scalar or flow sequence, so `false`, `443` and `[camera, event]` all work.
/// Returns the dotted paths that were applied.
pub fn apply_env_overrides<I, K, V>(root: &mut Value, schema: &Value, vars: I) -> Vec<String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut applied = Vec::new();

    for (key, raw) in vars {
        let Some(rest) = key.as_ref().strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest
            .split(ENV_NESTED_DELIMITER)
            .map(str::to_lowercase)
            .collect();
        if path.iter().any(String::is_empty) {
            tracing::warn!(variable = key.as_ref(), "Ignoring malformed override variable");
            continue;
        }

        let raw = raw.as_ref();
        let value = match lookup(schema, &path) {
            Some(Value::String(_)) => Value::String(raw.to_string()),
            _ => serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        };

        insert(root, &path, value);
        applied.push(path.join("."));
    }

    applied
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(key.as_str()))
}

fn insert(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut node = root;
    for key in parents {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = node else {
            return;
        };
        node = map
            .entry(Value::String(key.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }

    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = node {
        map.insert(Value::String(last.clone()), value);
    }
}
