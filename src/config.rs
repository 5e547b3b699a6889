//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::report::DEFAULT_CHARTS_ENGINE;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Report defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_charts_engine")]
    pub charts_engine: String,

    /// Start of reports that set none (first day of the current year otherwise)
    #[serde(default)]
    pub default_start_date: Option<NaiveDate>,

    /// End of reports that set none (now otherwise)
    #[serde(default)]
    pub default_end_date: Option<NaiveDate>,

    #[serde(default)]
    pub show_empty_records: bool,

    #[serde(default = "default_compute_remainder")]
    pub crosstab_compute_remainder: bool,

    #[serde(default)]
    pub limit_records: Option<usize>,
}

fn default_charts_engine() -> String {
    DEFAULT_CHARTS_ENGINE.to_string()
}

fn default_compute_remainder() -> bool {
    true
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            charts_engine: default_charts_engine(),
            default_start_date: None,
            default_end_date: None,
            show_empty_records: false,
            crosstab_compute_remainder: default_compute_remainder(),
            limit_records: None,
        }
    }
}

/// Kind of data source the CLI opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A SQLite database file
    #[default]
    Sqlite,
    /// A directory of `{entity}.csv` files
    Csv,
}

/// Data source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    #[serde(default = "default_source_path")]
    pub path: String,

    /// TOML file declaring the entities
    pub schema: Option<String>,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_source_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tally").join("tally.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tally.db".to_string())
}

fn default_delimiter() -> char {
    ','
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            path: default_source_path(),
            schema: None,
            delimiter: default_delimiter(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tally").join("config.toml")),
            Some(PathBuf::from("./tally.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Source overrides
        if let Ok(kind) = std::env::var("TALLY_SOURCE_KIND") {
            match kind.to_lowercase().as_str() {
                "sqlite" => self.source.kind = SourceKind::Sqlite,
                "csv" => self.source.kind = SourceKind::Csv,
                other => tracing::warn!("Ignoring unknown TALLY_SOURCE_KIND {}", other),
            }
        }
        if let Ok(path) = std::env::var("TALLY_SOURCE_PATH") {
            self.source.path = path;
        }
        if let Ok(schema) = std::env::var("TALLY_SCHEMA") {
            self.source.schema = Some(schema);
        }

        // Report overrides
        if let Ok(engine) = std::env::var("TALLY_CHARTS_ENGINE") {
            self.report.charts_engine = engine;
        }
        if let Ok(limit) = std::env::var("TALLY_LIMIT_RECORDS") {
            if let Ok(limit) = limit.parse() {
                self.report.limit_records = Some(limit);
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TALLY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TALLY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tally Configuration
#
# Environment variables override these settings:
# - TALLY_SOURCE_KIND
# - TALLY_SOURCE_PATH
# - TALLY_SCHEMA
# - TALLY_CHARTS_ENGINE
# - TALLY_LIMIT_RECORDS
# - TALLY_LOG_LEVEL
# - TALLY_LOG_FORMAT

[report]
# Chart engine named in chart settings that set none
charts_engine = "highcharts"

# Date range of reports that set none
# default_start_date = "2024-01-01"
# default_end_date = "2025-01-01"

# List groups without matching records
show_empty_records = false

# Add a remainder bucket to cross-tabs with explicit ids
crosstab_compute_remainder = true

[source]
# "sqlite" (database file) or "csv" (directory of <entity>.csv files)
kind = "sqlite"
path = "~/.local/share/tally/tally.db"

# Entities and fields of the source
# schema = "~/.config/tally/schema.toml"

# CSV field delimiter
delimiter = ","

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty, json
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.report.charts_engine, "highcharts");
        assert!(config.report.crosstab_compute_remainder);
        assert_eq!(config.source.kind, SourceKind::Sqlite);
        assert_eq!(config.source.delimiter, ',');
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[report]
default_start_date = "2020-01-01"
show_empty_records = true

[source]
kind = "csv"
path = "/data/exports"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.report.default_start_date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert!(config.report.show_empty_records);
        assert_eq!(config.report.charts_engine, "highcharts");
        assert_eq!(config.source.kind, SourceKind::Csv);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/tally.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[source]\nkind = \"postgres\"").unwrap();
        let invalid = Config::load(file.path()).unwrap_err();
        assert!(matches!(invalid, ConfigError::Parse { .. }));
    }
}
