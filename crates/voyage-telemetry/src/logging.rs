//! Structured logging setup.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include source file and line
    pub include_location: bool,
    /// Extra filter directives (e.g. "hyper=warn,reqwest=info")
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set filter directives
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Get the tracing Level
    #[must_use]
    pub fn tracing_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn directives(&self) -> String {
        match self.filter {
            Some(ref extra) => format!("{},{extra}", self.level),
            None => self.level.clone(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
    /// Single-line human-readable output
    Compact,
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Errors
/// Returns error if the filter is invalid or a subscriber is already set
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(config.directives()).map_err(|e| LoggingError::FilterParse(e.to_string()))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    Init(String),
    /// Failed to parse filter
    #[error("Failed to parse log filter: {0}")]
    FilterParse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::new()
            .with_level("debug")
            .with_format(LogFormat::Compact)
            .with_filter("hyper=warn");

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.directives(), "debug,hyper=warn");
    }

    #[test]
    fn test_tracing_level() {
        assert_eq!(LoggingConfig::new().with_level("trace").tracing_level(), Level::TRACE);
        assert_eq!(LoggingConfig::new().with_level("WARNING").tracing_level(), Level::WARN);
        assert_eq!(LoggingConfig::new().with_level("bogus").tracing_level(), Level::INFO);
    }

    #[test]
    fn test_default_is_json() {
        assert_eq!(LoggingConfig::default().format, LogFormat::Json);
        assert_eq!(LoggingConfig::default().directives(), "info");
    }
}
