//! Configuration management for tablesaver
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::export::{DEFAULT_CHUNK_CELLS, DEFAULT_WINDOW_SIZE, ExportOptions};
use crate::sink::SinkPreference;

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "TABLESAVER_";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Export pipeline configuration
    #[serde(default)]
    pub export: ExportConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Export pipeline tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Target number of cells per snapshot
    #[serde(default = "default_chunk_cells")]
    pub chunk_cells: usize,

    /// Number of snapshots in flight or waiting to be written
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Milliseconds without a pull request before a download is canceled
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,

    /// Write the column names as the first line
    #[serde(default = "default_include_column_headers")]
    pub include_column_headers: bool,

    /// Write raw values instead of formatted ones
    #[serde(default)]
    pub use_unformatted_values: bool,

    /// Sink selection (auto, buffered)
    #[serde(default)]
    pub sink: SinkPreference,
}

/// Where finished downloads go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Download directory
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_chunk_cells() -> usize {
    DEFAULT_CHUNK_CELLS
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_stream_timeout_ms() -> u64 {
    8000
}

fn default_include_column_headers() -> bool {
    true
}

fn default_output_directory() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    false
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_cells: default_chunk_cells(),
            window_size: default_window_size(),
            stream_timeout_ms: default_stream_timeout_ms(),
            include_column_headers: default_include_column_headers(),
            use_unformatted_values: false,
            sink: SinkPreference::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from the given file, or the default location
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error. Environment overrides are applied on top.
    ///
    /// # Arguments
    /// * `path` - Explicit configuration file, if any
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    ///
    /// Environment variables are prefixed with TABLESAVER_
    /// Example: TABLESAVER_WINDOW_SIZE=8
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `TABLESAVER_*` overrides from `vars`
    ///
    /// Unknown variables are ignored.
    ///
    /// # Errors
    /// * `ConfigError::InvalidValue` - A known variable could not be parsed
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "CHUNK_CELLS" => self.export.chunk_cells = parse_env(&key, &value)?,
                "WINDOW_SIZE" => self.export.window_size = parse_env(&key, &value)?,
                "STREAM_TIMEOUT_MS" => self.export.stream_timeout_ms = parse_env(&key, &value)?,
                "INCLUDE_COLUMN_HEADERS" => {
                    self.export.include_column_headers = parse_env(&key, &value)?
                }
                "USE_UNFORMATTED_VALUES" => {
                    self.export.use_unformatted_values = parse_env(&key, &value)?
                }
                "SINK" => {
                    self.export.sink = match value.to_lowercase().as_str() {
                        "auto" => SinkPreference::Auto,
                        "buffered" => SinkPreference::Buffered,
                        _ => return Err(invalid_value(&key, &value)),
                    }
                }
                "OUTPUT_DIRECTORY" => self.output.directory = PathBuf::from(&value),
                "LOG_LEVEL" => {
                    self.logging.level = LogLevel::parse(&value)
                        .ok_or_else(|| invalid_value(&key, &value))?
                }
                "LOG_TIMESTAMPS" => self.logging.timestamps = parse_env(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - `~/.tablesaver/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tablesaver")
            .join("config.toml")
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Save configuration to a file
    ///
    /// # Arguments
    /// * `path` - Path where to save the configuration
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.export.chunk_cells == 0 {
            return Err(invalid_value("export.chunk_cells", "0"));
        }
        if self.export.window_size == 0 {
            return Err(invalid_value("export.window_size", "0"));
        }
        if self.export.stream_timeout_ms == 0 {
            return Err(invalid_value("export.stream_timeout_ms", "0"));
        }
        Ok(())
    }

    /// Get stream timeout as Duration
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.export.stream_timeout_ms)
    }

    /// Export options described by this configuration
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            chunk_cells: self.export.chunk_cells,
            window_size: self.export.window_size,
            stream_timeout: self.stream_timeout(),
            include_column_headers: self.export.include_column_headers,
            use_unformatted_values: self.export.use_unformatted_values,
            sink_preference: self.export.sink,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| invalid_value(key, value))
}

fn invalid_value(field: &str, value: &str) -> crate::error::TableSaverError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    /// Parse a level name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}
