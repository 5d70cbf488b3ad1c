//! Configuration Module
//!
//! Provides TOML-based configuration for VibeMap with support for:
//! - Logging level
//! - Processing pool size and dispatch switch
//! - Mapping definitions file
//! - Broker connectors
//! - Environment variable overrides (VIBEMAP__* prefix)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use connector::ConnectorConfig;

mod connector;

#[cfg(test)]
mod tests;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(format!("env pattern: {}", e)))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub processing: ProcessingConfig,
    /// Broker connectors
    #[serde(default)]
    pub connector: Vec<ConnectorConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Maximum concurrent platform requests and in-flight messages
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Send drafted inbound requests to the platform
    #[serde(default = "default_true")]
    pub send_inbound: bool,
    /// JSON file with an array of mapping definitions
    pub mappings_file: Option<PathBuf>,
}

fn default_workers() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            send_inbound: true,
            mappings_file: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEMAP__` prefix with double underscores for nesting:
    ///    - `VIBEMAP__LOG__LEVEL=debug` overrides `log.level`
    ///    - `VIBEMAP__PROCESSING__WORKERS=16` overrides `processing.workers`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("processing.workers", 8)?
            .set_default("processing.send_inbound", true)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::Io(e)),
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEMAP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.workers == 0 {
            return Err(ConfigError::Validation(
                "processing.workers must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for connector in &self.connector {
            if !names.insert(connector.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate connector name '{}'",
                    connector.name
                )));
            }
            if connector.address.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Connector '{}' has an empty address",
                    connector.name
                )));
            }
            if connector.max_reconnect_interval < connector.reconnect_interval {
                return Err(ConfigError::Validation(format!(
                    "Connector '{}': max_reconnect_interval is below reconnect_interval",
                    connector.name
                )));
            }
        }

        Ok(())
    }

    /// Connectors that should be started
    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfig> {
        self.connector.iter().filter(|c| c.enabled)
    }
}
