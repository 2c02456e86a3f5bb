//! # Voyage Configuration
//!
//! Configuration for the voyage gateway:
//! - Schema with serde defaults and validation
//! - Loading and deep-merging YAML/TOML/JSON sources
//! - Environment variable substitution and `VOYAGE_*` overrides

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loader;
pub mod schema;

pub use loader::{load_config, ConfigError, ConfigLoader, ConfigSource};
pub use schema::{
    CacheConfig, CacheDomainConfig, CircuitBreakerConfig, CorsConfig, LimiterSettings,
    LogFormat, LoggingConfig, MetricsConfig, ObservabilityConfig, ProviderConfig,
    RateLimitingConfig, ResilienceConfig, RetryConfig, SecurityConfig, ServerConfig,
    StageConfig, StagesConfig, VoyageConfig,
};
