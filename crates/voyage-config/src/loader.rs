//! Configuration loading from files and environment.
//!
//! Sources are parsed into JSON values and deep-merged in order, so a later
//! source only needs to mention the keys it overrides. `${VAR}` and
//! `${VAR:-default}` references in files are substituted before parsing.

use crate::schema::{LogFormat, VoyageConfig};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The path to the file that was not found
        path: String,
    },

    /// IO error
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// Unsupported format
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// The file extension that was not supported
        extension: String,
    },

    /// Invalid environment override
    #[error("Invalid value for {name}: {value}")]
    InvalidEnvOverride {
        /// Variable name
        name: String,
        /// Rejected value
        value: String,
    },
}

/// Configuration source
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path
    File(String),
    /// Raw YAML string
    Yaml(String),
    /// Raw TOML string
    Toml(String),
    /// Raw JSON string
    Json(String),
    /// Default configuration
    Default,
}

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration source
    #[must_use]
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a file source
    #[must_use]
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.with_source(ConfigSource::File(path.into()))
    }

    /// Set environment variable prefix for overrides
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Load configuration from all sources
    ///
    /// # Errors
    /// Returns error if any source fails to load or validate
    pub async fn load(self) -> Result<VoyageConfig, ConfigError> {
        let mut merged = Value::Object(serde_json::Map::new());

        for source in &self.sources {
            let value = Self::load_source(source).await?;
            merge_values(&mut merged, value);
        }

        let mut config: VoyageConfig = serde_json::from_value(merged)?;

        if let Some(ref prefix) = self.env_prefix {
            Self::apply_env_overrides(&mut config, prefix)?;
        }

        config
            .validate_config()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load a single source as an untyped value
    async fn load_source(source: &ConfigSource) -> Result<Value, ConfigError> {
        match source {
            ConfigSource::File(path) => Self::load_file(path).await,
            ConfigSource::Yaml(content) => Self::parse_yaml(content),
            ConfigSource::Toml(content) => Self::parse_toml(content),
            ConfigSource::Json(content) => Self::parse_json(content),
            ConfigSource::Default => Ok(serde_json::to_value(VoyageConfig::default())?),
        }
    }

    /// Load configuration from a file
    async fn load_file(path: &str) -> Result<Value, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = fs::read_to_string(path).await?;
        let content = substitute_env_vars(&content);

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        debug!(path = %path.display(), format = %extension, "Loading configuration file");

        match extension.as_str() {
            "yaml" | "yml" => Self::parse_yaml(&content),
            "toml" => Self::parse_toml(&content),
            "json" => Self::parse_json(&content),
            ext => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    fn parse_yaml(content: &str) -> Result<Value, ConfigError> {
        let value: Value = serde_yaml::from_str(content)?;
        // an empty document parses as null
        Ok(if value.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            value
        })
    }

    fn parse_toml(content: &str) -> Result<Value, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn parse_json(content: &str) -> Result<Value, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `{prefix}_*` environment variable overrides
    fn apply_env_overrides(config: &mut VoyageConfig, prefix: &str) -> Result<(), ConfigError> {
        if let Some(port) = env_parse(&format!("{prefix}_SERVER_PORT"))? {
            config.server.port = port;
        }

        if let Ok(host) = std::env::var(format!("{prefix}_SERVER_HOST")) {
            config.server.host = host;
        }

        if let Some(trust_proxy) = env_parse(&format!("{prefix}_SERVER_TRUST_PROXY"))? {
            config.server.trust_proxy = trust_proxy;
        }

        if let Ok(level) = std::env::var(format!("{prefix}_LOG_LEVEL")) {
            config.observability.logging.level = level;
        }

        let format_var = format!("{prefix}_LOG_FORMAT");
        if let Ok(format) = std::env::var(&format_var) {
            config.observability.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                _ => {
                    return Err(ConfigError::InvalidEnvOverride {
                        name: format_var,
                        value: format,
                    })
                }
            };
        }

        if let Some(enabled) = env_parse(&format!("{prefix}_METRICS_ENABLED"))? {
            config.observability.metrics.enabled = enabled;
        }

        if let Some(enabled) = env_parse(&format!("{prefix}_RATE_LIMITING_ENABLED"))? {
            config.rate_limiting.enabled = enabled;
        }

        if let Ok(model) = std::env::var(format!("{prefix}_DEFAULT_MODEL")) {
            config.provider.default_model = model;
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvOverride {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else
/// is replaced
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Substitute environment variables in content
///
/// Supports `${VAR}` and `${VAR:-default}`. Unknown variables without a
/// default are left in place.
#[allow(clippy::expect_used)]
fn substitute_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid regex");

    re.replace_all(content, |caps: &regex::Captures<'_>| {
        let spec = &caps[1];
        let (name, default) = match spec.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (spec, None),
        };

        match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                warn!(variable = name, "Environment variable not found");
                caps[0].to_string()
            }
        }
    })
    .into_owned()
}

/// Load configuration from default locations
///
/// Looks for configuration in order:
/// 1. Path from CONFIG_PATH environment variable
/// 2. ./config.yaml
/// 3. ./config/default.yaml
///
/// `VOYAGE_*` environment overrides apply in every case.
///
/// # Errors
/// Returns error if the configuration cannot be parsed or is invalid
pub async fn load_config() -> Result<VoyageConfig, ConfigError> {
    let config_path = std::env::var("CONFIG_PATH").ok();

    let search_paths = if let Some(ref path) = config_path {
        vec![path.as_str()]
    } else {
        vec![
            "config.yaml",
            "config.yml",
            "config/default.yaml",
            "config/default.yml",
        ]
    };

    let loader = ConfigLoader::new()
        .with_source(ConfigSource::Default)
        .with_env_prefix("VOYAGE");

    for path in &search_paths {
        if Path::new(path).exists() {
            info!(path = %path, "Loading configuration");
            return loader.with_file(*path).load().await;
        }
    }

    warn!("No configuration file found, using defaults");
    loader.load().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("VOYAGE_LOADER_TEST_VAR", "test_value");

        let result = substitute_env_vars("key: ${VOYAGE_LOADER_TEST_VAR}");
        assert_eq!(result, "key: test_value");

        std::env::remove_var("VOYAGE_LOADER_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        let result = substitute_env_vars("key: ${VOYAGE_NONEXISTENT_VAR:-default_value}");
        assert_eq!(result, "key: default_value");

        let untouched = substitute_env_vars("key: ${VOYAGE_NONEXISTENT_VAR}");
        assert_eq!(untouched, "key: ${VOYAGE_NONEXISTENT_VAR}");
    }

    #[tokio::test]
    async fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
server:
  port: 9090
rate_limiting:
  gemini:
    max_tokens: 20
    window: 30s
resilience:
  stages:
    optimization:
      timeout: 2m
      max_retries: 1
"#;

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .with_source(ConfigSource::Yaml(yaml.to_string()))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.rate_limiting.gemini.max_tokens, 20);
        assert_eq!(config.rate_limiting.gemini.window, Duration::from_secs(30));
        assert_eq!(config.rate_limiting.global.max_tokens, 100);
        assert_eq!(
            config.resilience.stages.optimization.timeout,
            Duration::from_secs(120)
        );
        assert_eq!(config.resilience.stages.intent.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_toml_and_json_sources() {
        let toml = r#"
[cache.intent]
max_size = 10
ttl = "10m"
"#;
        let json = r#"{"provider": {"default_model": "gemini-2.5-pro"}}"#;

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Toml(toml.to_string()))
            .with_source(ConfigSource::Json(json.to_string()))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.cache.intent.max_size, 10);
        assert_eq!(config.cache.intent.ttl, Duration::from_secs(600));
        assert_eq!(config.provider.default_model, "gemini-2.5-pro");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let yaml = "server:\n  port: 0\n";
        let err = ConfigLoader::new()
            .with_source(ConfigSource::Yaml(yaml.to_string()))
            .load()
            .await
            .expect_err("port 0 is invalid");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = ConfigLoader::new()
            .with_file("/nonexistent/voyage.yaml")
            .load()
            .await
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_env_overrides() {
        std::env::set_var("VOYAGE_TEST_PREFIX_SERVER_PORT", "3000");
        std::env::set_var("VOYAGE_TEST_PREFIX_LOG_FORMAT", "pretty");
        std::env::set_var("VOYAGE_TEST_PREFIX_SERVER_TRUST_PROXY", "true");

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .with_env_prefix("VOYAGE_TEST_PREFIX")
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.observability.logging.format, LogFormat::Pretty);
        assert!(config.server.trust_proxy);

        std::env::remove_var("VOYAGE_TEST_PREFIX_SERVER_PORT");
        std::env::remove_var("VOYAGE_TEST_PREFIX_LOG_FORMAT");
        std::env::remove_var("VOYAGE_TEST_PREFIX_SERVER_TRUST_PROXY");
    }

    #[tokio::test]
    async fn test_bad_env_override_is_an_error() {
        std::env::set_var("VOYAGE_BAD_PREFIX_SERVER_PORT", "not-a-port");

        let err = ConfigLoader::new()
            .with_env_prefix("VOYAGE_BAD_PREFIX")
            .load()
            .await
            .expect_err("bad port");
        assert!(matches!(err, ConfigError::InvalidEnvOverride { .. }));

        std::env::remove_var("VOYAGE_BAD_PREFIX_SERVER_PORT");
    }

    #[test]
    fn test_merge_values() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_values(&mut base, serde_json::json!({"a": {"b": 10}, "d": [3]}));
        assert_eq!(base, serde_json::json!({"a": {"b": 10, "c": 2}, "d": [3]}));
    }
}
