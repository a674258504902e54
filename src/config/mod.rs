//! Typed configuration loading.
//!
//! The source loads a config file as executable Python and exposes
//! variables via attribute access (`examples/original_source/cleave/base/config.py::ConfigWrapper`).
//! This substitutes a declarative TOML file (`toml` + `serde`) with CLI
//! overrides (`clap`, derive feature) winning over file values, which win
//! over a defaulted fallback map — no runtime code evaluation required.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}
impl std::error::Error for ConfigError {}

/// Raw key-value namespace, as parsed from a TOML document. Values are kept
/// as strings so the same wrapper serves ints, floats, and paths alike,
/// matching the source's "just read an attribute" access pattern.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(transparent)]
struct RawTable(HashMap<String, toml::Value>);

/// Wraps access to a config file's key-value namespace, with CLI overrides
/// winning over file values, which win over defaults. Missing required keys
/// fail with [`ConfigError`].
pub struct ConfigWrapper {
    config_path: Option<String>,
    file_values: HashMap<String, toml::Value>,
    cmd_line_overrides: HashMap<String, toml::Value>,
    defaults: HashMap<String, toml::Value>,
}

impl ConfigWrapper {
    /// Loads `config_path` as a TOML document.
    pub fn from_file(
        config_path: impl AsRef<Path>,
        cmd_line_overrides: HashMap<String, toml::Value>,
        defaults: HashMap<String, toml::Value>,
    ) -> Result<Self, ConfigError> {
        let path = config_path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("reading {}: {e}", path.display())))?;
        let RawTable(file_values) =
            toml::from_str(&text).map_err(|e| ConfigError(format!("parsing {}: {e}", path.display())))?;

        Ok(Self {
            config_path: Some(path.display().to_string()),
            file_values,
            cmd_line_overrides,
            defaults,
        })
    }

    /// Builds a wrapper with no backing file — just overrides and defaults.
    /// Used by binaries that take all configuration from CLI flags.
    pub fn from_overrides(
        cmd_line_overrides: HashMap<String, toml::Value>,
        defaults: HashMap<String, toml::Value>,
    ) -> Self {
        Self {
            config_path: None,
            file_values: HashMap::new(),
            cmd_line_overrides,
            defaults,
        }
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    /// Resolves `key`: CLI override, then file value, then default, else
    /// `ConfigError`.
    pub fn get_parameter(&self, key: &str) -> Result<&toml::Value, ConfigError> {
        self.cmd_line_overrides
            .get(key)
            .or_else(|| self.file_values.get(key))
            .or_else(|| self.defaults.get(key))
            .ok_or_else(|| ConfigError(format!("missing required configuration parameter {key}")))
    }

    pub fn get_u64(&self, key: &str) -> Result<u64, ConfigError> {
        self.get_parameter(key)?
            .as_integer()
            .map(|v| v as u64)
            .ok_or_else(|| ConfigError(format!("{key} is not an integer")))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        self.get_parameter(key)?
            .as_float()
            .or_else(|| self.get_parameter(key).ok()?.as_integer().map(|v| v as f64))
            .ok_or_else(|| ConfigError(format!("{key} is not a number")))
    }

    pub fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        self.get_parameter(key)?
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ConfigError(format!("{key} is not a string")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_line_overrides_win_over_defaults() {
        let mut defaults = HashMap::new();
        defaults.insert("dt_ns".to_string(), toml::Value::Integer(10_000_000));
        let mut overrides = HashMap::new();
        overrides.insert("dt_ns".to_string(), toml::Value::Integer(5_000_000));

        let cfg = ConfigWrapper::from_overrides(overrides, defaults);
        assert_eq!(cfg.get_u64("dt_ns").unwrap(), 5_000_000);
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let cfg = ConfigWrapper::from_overrides(HashMap::new(), HashMap::new());
        assert!(cfg.get_u64("port").is_err());
    }
}
