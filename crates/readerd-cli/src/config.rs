//! CLI configuration file.
//!
//! # Example
//!
//! ```toml
//! [reader]
//! endpoint = "192.168.1.50:5084"
//! command_timeout_ms = 3000
//! gpi_trigger_port = 1
//!
//! [log]
//! level = "debug"
//! format = "compact"
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;

use readerd_session::SessionConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Log level.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-field human readable lines (default)
    #[default]
    Full,
    /// Shorter single-line output
    Compact,
}

/// `[log]` section.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Unset means `RUST_LOG`, then `info`.
    pub level: Option<LogLevel>,

    /// Default: full
    pub format: LogFormat,
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub reader: SessionConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        contents.parse()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let reader = &self.reader;
        if reader.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "reader.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if reader.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "reader.command_timeout_ms must be positive".to_string(),
            ));
        }
        if reader.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "reader.event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
