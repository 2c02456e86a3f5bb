//! Configuration schema definitions.
//!
//! Every section has serde defaults, so a config file only needs the values
//! it changes.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use validator::{Validate, ValidationError, ValidationErrors};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VoyageConfig {
    /// HTTP server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[validate(nested)]
    pub rate_limiting: RateLimitingConfig,

    /// Circuit breaker, retry and stage budgets
    #[validate(nested)]
    pub resilience: ResilienceConfig,

    /// Result caches
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Remote model provider
    #[validate(nested)]
    pub provider: ProviderConfig,

    /// Admin access
    pub security: SecurityConfig,

    /// Logging and metrics
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl VoyageConfig {
    /// Validate the configuration
    ///
    /// # Errors
    /// Returns validation errors if configuration is invalid
    pub fn validate_config(&self) -> Result<(), ValidationErrors> {
        self.validate()?;

        // a request deadline shorter than the stages would cut a plan off mid-stage
        let budget = self.resilience.request_budget();
        if self.server.request_timeout < budget {
            let error = ValidationError::new("request_timeout_below_stage_budget").with_message(
                Cow::Owned(format!(
                    "request_timeout of {}s is shorter than the {}s a plan may take",
                    self.server.request_timeout.as_secs(),
                    budget.as_secs()
                )),
            );
            let mut errors = ValidationErrors::new();
            errors.add("request_timeout", error);
            return Err(errors);
        }
        Ok(())
    }
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("non_zero_duration"));
    }
    Ok(())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Upper bound for a whole HTTP request; must cover the stage budgets
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Key rate limits on `X-Forwarded-For`/`X-Real-IP` instead of the peer
    /// address; only safe behind a proxy that sets them
    pub trust_proxy: bool,

    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub graceful_shutdown_timeout: Duration,

    /// Maximum declared request body size in bytes
    #[validate(range(min = 1))]
    pub max_request_body_size: usize,

    /// Maximum serialized size of generate `contents` in bytes
    #[validate(range(min = 1))]
    pub max_contents_size: usize,

    /// CORS configuration
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            request_timeout: Duration::from_secs(600),
            trust_proxy: false,
            graceful_shutdown_timeout: Duration::from_secs(30),
            max_request_body_size: 2 * 1024 * 1024,
            max_contents_size: 50 * 1024,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Whether CORS headers are sent
    pub enabled: bool,

    /// Allowed origins (`*` for any)
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache, in seconds
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            max_age: 86400,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,

    /// Limit applied to every `/api` request, keyed by client IP
    #[validate(nested)]
    pub global: LimiterSettings,

    /// Limit applied to calls that reach the remote model
    #[validate(nested)]
    pub gemini: LimiterSettings,

    /// How often idle buckets are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global: LimiterSettings::new(100, Duration::from_secs(60)),
            gemini: LimiterSettings::new(10, Duration::from_secs(60)),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// One token bucket limiter
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LimiterSettings {
    /// Bucket capacity
    #[validate(range(min = 1))]
    pub max_tokens: u32,

    /// Refill window; the bucket refills completely over one window
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub window: Duration,

    /// Explicit refill rate, overriding `max_tokens / window`
    #[serde(default)]
    pub refill_rate_per_second: Option<f64>,
}

impl LimiterSettings {
    /// `max_tokens` per `window`
    #[must_use]
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        Self {
            max_tokens,
            window,
            refill_rate_per_second: None,
        }
    }

    /// Effective refill rate in tokens per second
    #[must_use]
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate_per_second
            .unwrap_or_else(|| f64::from(self.max_tokens) / self.window.as_secs_f64().max(1e-3))
    }
}

/// Resilience configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker configuration
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration
    #[validate(nested)]
    pub retry: RetryConfig,

    /// Per-stage timeouts and retry budgets
    #[validate(nested)]
    pub stages: StagesConfig,
}

impl ResilienceConfig {
    /// Longest a single request may spend in the stages: a full plan, a
    /// refinement or a generate call, retries and backoff included
    #[must_use]
    pub fn request_budget(&self) -> Duration {
        let stages = &self.stages;
        let retry = &self.retry;
        let plan = stages
            .intent
            .worst_case(retry)
            .saturating_add(stages.discovery.worst_case(retry))
            .saturating_add(stages.optimization.worst_case(retry));

        plan.max(stages.refine.worst_case(retry))
            .max(stages.generate.worst_case(retry))
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of failures to trip the circuit
    #[validate(range(min = 1, max = 100))]
    pub failure_threshold: u32,

    /// Number of successes to close the circuit
    #[validate(range(min = 1, max = 100))]
    pub success_threshold: u32,

    /// Time to wait before testing the circuit
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, doubled for each further retry
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Jitter factor (0.0 - 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            jitter: 0.0,
        }
    }
}

/// Budgets for every planning stage and the generate proxy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StagesConfig {
    /// Direct generate proxy calls
    #[validate(nested)]
    pub generate: StageConfig,
    /// Intent extraction
    #[validate(nested)]
    pub intent: StageConfig,
    /// Candidate discovery
    #[validate(nested)]
    pub discovery: StageConfig,
    /// Itinerary optimization
    #[validate(nested)]
    pub optimization: StageConfig,
    /// Itinerary refinement
    #[validate(nested)]
    pub refine: StageConfig,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            generate: StageConfig::new(30, 2),
            intent: StageConfig::new(30, 2),
            discovery: StageConfig::new(45, 2),
            optimization: StageConfig::new(90, 2),
            refine: StageConfig::new(45, 2),
        }
    }
}

/// Timeout and retries for one stage
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StageConfig {
    /// Per-attempt deadline
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub timeout: Duration,

    /// Retries after the first attempt
    #[validate(range(max = 10))]
    pub max_retries: u32,
}

impl StageConfig {
    fn new(timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }

    /// Every attempt timing out, with the longest backoff between them
    #[must_use]
    pub fn worst_case(&self, retry: &RetryConfig) -> Duration {
        let attempts = self.timeout.saturating_mul(self.max_retries.saturating_add(1));
        let backoff = (0..self.max_retries).fold(Duration::ZERO, |total, retry_index| {
            total.saturating_add(retry.backoff_base.saturating_mul(1 << retry_index.min(16)))
        });
        let stretch = 1.0 + retry.jitter.clamp(0.0, 1.0);
        let backoff = Duration::try_from_secs_f64(backoff.as_secs_f64() * stretch)
            .unwrap_or(Duration::MAX);

        attempts.saturating_add(backoff)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Generate proxy responses
    #[validate(nested)]
    pub generate: CacheDomainConfig,
    /// Intent results keyed by normalized query
    #[validate(nested)]
    pub intent: CacheDomainConfig,
    /// Discovery results keyed by intent
    #[validate(nested)]
    pub discovery: CacheDomainConfig,
    /// How often expired entries are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            generate: CacheDomainConfig::new(100, 5 * 60),
            intent: CacheDomainConfig::new(100, 30 * 60),
            discovery: CacheDomainConfig::new(50, 30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// One cache
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CacheDomainConfig {
    /// Maximum entries
    #[validate(range(min = 1))]
    pub max_size: usize,

    /// Default time to live
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl CacheDomainConfig {
    fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            max_size,
            ttl: Duration::from_secs(ttl_secs),
        }
    }
}

/// Remote model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (can be an env var reference like `${GEMINI_API_KEY}`)
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Base URL
    #[validate(url)]
    pub base_url: String,

    /// Transport timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Model used by the planning stages
    #[validate(length(min = 1))]
    pub default_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout: Duration::from_secs(120),
            default_model: "gemini-2.5-flash".to_string(),
        }
    }
}

/// Read a secret from an explicit value, an `${ENV}` reference or a
/// fallback environment variable
fn resolve_secret(value: Option<&str>, env_var: &str) -> Option<SecretString> {
    let raw = match value {
        Some(key) if key.starts_with("${") && key.ends_with('}') => {
            std::env::var(&key[2..key.len() - 1]).ok()
        }
        Some(key) => Some(key.to_string()),
        None => std::env::var(env_var).ok(),
    };

    raw.filter(|s| !s.trim().is_empty()).map(SecretString::new)
}

impl ProviderConfig {
    /// Resolve the API key from config or environment
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        resolve_secret(self.api_key.as_deref(), &self.api_key_env)
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Token required by `/api/admin` routes
    pub admin_token: Option<String>,

    /// Environment variable holding the admin token
    pub admin_token_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_token: None,
            admin_token_env: "VOYAGE_ADMIN_TOKEN".to_string(),
        }
    }
}

impl SecurityConfig {
    /// Resolve the admin token; admin routes are closed without one
    #[must_use]
    pub fn resolve_admin_token(&self) -> Option<SecretString> {
        resolve_secret(self.admin_token.as_deref(), &self.admin_token_env)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[validate(nested)]
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,

    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs
    #[default]
    Json,
    /// Human-readable pretty logs
    Pretty,
    /// Compact single-line logs
    Compact,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are collected
    pub enabled: bool,

    /// Histogram buckets for remote call latency, in seconds
    #[validate(length(min = 1))]
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_buckets: vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = VoyageConfig::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.max_request_body_size, 2 * 1024 * 1024);
        assert_eq!(config.server.max_contents_size, 50 * 1024);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_stage_defaults() {
        let stages = StagesConfig::default();
        assert_eq!(stages.intent.timeout, Duration::from_secs(30));
        assert_eq!(stages.discovery.timeout, Duration::from_secs(45));
        assert_eq!(stages.optimization.timeout, Duration::from_secs(90));
        assert!(stages.optimization.timeout > stages.refine.timeout);
        assert_eq!(stages.refine.max_retries, 2);
    }

    #[test]
    fn test_stage_budgets() {
        let resilience = ResilienceConfig::default();
        // 30 s × 3 attempts plus 1 s and 2 s of backoff
        assert_eq!(
            resilience.stages.intent.worst_case(&resilience.retry),
            Duration::from_secs(93)
        );
        // intent 93 + discovery 138 + optimization 273
        assert_eq!(resilience.request_budget(), Duration::from_secs(504));
        assert!(ServerConfig::default().request_timeout >= resilience.request_budget());
    }

    #[test]
    fn test_request_timeout_must_cover_stages() {
        let mut config = VoyageConfig::default();
        config.server.request_timeout = Duration::from_secs(300);
        let errors = config.validate_config().expect_err("too short");
        assert!(errors.field_errors().contains_key("request_timeout"));

        config.resilience.stages.optimization.max_retries = 0;
        config.resilience.stages.discovery.max_retries = 0;
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_limiter_refill_rate() {
        let limits = RateLimitingConfig::default();
        assert!((limits.gemini.refill_rate() - 10.0 / 60.0).abs() < 1e-9);

        let explicit = LimiterSettings {
            refill_rate_per_second: Some(2.0),
            ..LimiterSettings::new(10, Duration::from_secs(60))
        };
        assert!((explicit.refill_rate() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_resolve_api_key() {
        std::env::set_var("VOYAGE_SCHEMA_TEST_KEY", "test-key-123");

        let config = ProviderConfig {
            api_key: Some("${VOYAGE_SCHEMA_TEST_KEY}".to_string()),
            ..ProviderConfig::default()
        };
        let key = config.resolve_api_key().expect("key");
        assert_eq!(key.expose_secret(), "test-key-123");

        let from_env = ProviderConfig {
            api_key_env: "VOYAGE_SCHEMA_TEST_KEY".to_string(),
            ..ProviderConfig::default()
        };
        assert!(from_env.resolve_api_key().is_some());

        std::env::remove_var("VOYAGE_SCHEMA_TEST_KEY");
    }

    #[test]
    fn test_blank_secret_is_unset() {
        let security = SecurityConfig {
            admin_token: Some("   ".to_string()),
            ..SecurityConfig::default()
        };
        assert!(security.resolve_admin_token().is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = VoyageConfig::default();
        config.resilience.stages.intent.timeout = Duration::ZERO;
        assert!(config.validate_config().is_err());

        let mut config = VoyageConfig::default();
        config.resilience.retry.jitter = 1.5;
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_yaml_serialization() {
        let config = VoyageConfig::default();
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        assert!(yaml.contains("rate_limiting:"));
        assert!(yaml.contains("port: 3001"));
    }
}
