//! Rate limiting using the token bucket algorithm.
//!
//! Each key (client IP, user id) owns a bucket holding up to `max_tokens`.
//! Buckets refill continuously at `refill_rate_per_second` and every admitted
//! request consumes one token. Buckets are created lazily and swept when idle.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use voyage_core::VoyageError;

/// How often idle buckets are swept
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity (burst size)
    pub max_tokens: f64,
    /// Tokens added per second
    pub refill_rate_per_second: f64,
    /// Nominal window; buckets idle for twice this long are swept
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_window(100, Duration::from_secs(60))
    }
}

impl RateLimiterConfig {
    /// Create a configuration from explicit capacity and refill rate
    #[must_use]
    pub fn new(max_tokens: f64, refill_rate_per_second: f64, window: Duration) -> Self {
        Self {
            max_tokens,
            refill_rate_per_second,
            window,
        }
    }

    /// `requests` per `window`, refilling evenly across the window
    #[must_use]
    pub fn per_window(requests: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let rate = if secs > 0.0 {
            f64::from(requests) / secs
        } else {
            f64::from(requests)
        };
        Self::new(f64::from(requests), rate, window)
    }

    /// Idle age after which a bucket is swept
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.window * 2
    }

    fn duration_for(&self, tokens: f64) -> Duration {
        if tokens <= 0.0 {
            return Duration::ZERO;
        }
        if self.refill_rate_per_second <= 0.0 {
            return self.window;
        }
        let secs = tokens / self.refill_rate_per_second;
        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            self.window
        }
    }
}

/// Token bucket state for a single key
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Available tokens
    tokens: f64,
    /// Last refill time
    last_refill: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimiterConfig, now: Instant) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill: now,
        }
    }

    /// Tokens the bucket would hold at `now`
    fn level_at(&self, config: &RateLimiterConfig, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * config.refill_rate_per_second).min(config.max_tokens)
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self, config: &RateLimiterConfig, now: Instant) {
        self.tokens = self.level_at(config, now);
        self.last_refill = now;
    }

    /// Refill, then try to take one token
    fn try_consume(&mut self, config: &RateLimiterConfig, now: Instant) -> RateLimitDecision {
        self.refill(config, now);

        let limit = config.max_tokens.max(0.0) as u32;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitDecision {
                allowed: true,
                remaining: self.tokens.floor().max(0.0) as u32,
                limit,
                reset_in: config.duration_for(config.max_tokens - self.tokens),
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit,
                reset_in: config.duration_for(1.0 - self.tokens),
            }
        }
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Whole tokens left after this check
    pub remaining: u32,
    /// Bucket capacity
    pub limit: u32,
    /// Until one token is available (rejected) or the bucket is full (admitted)
    pub reset_in: Duration,
}

impl RateLimitDecision {
    /// Convert a rejection into a rate limit error
    ///
    /// # Errors
    /// Returns `VoyageError::RateLimit` if the request was not admitted
    pub fn into_result(self) -> Result<Self, VoyageError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(VoyageError::rate_limit(Some(self.reset_in), Some(self.limit)))
        }
    }
}

/// Bucket statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStats {
    /// Tokens currently available
    pub tokens: f64,
    /// Bucket capacity
    pub max_tokens: f64,
}

impl BucketStats {
    /// Share of the bucket currently consumed, in percent
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_tokens <= 0.0 {
            return 0.0;
        }
        ((self.max_tokens - self.tokens) / self.max_tokens * 100.0).max(0.0)
    }
}

/// Rate limiter with one bucket per key
pub struct RateLimiter {
    /// Identifier
    id: String,
    /// Bucket configuration
    config: RateLimiterConfig,
    /// Per-key buckets; each entry is locked independently
    buckets: DashMap<String, TokenBucket>,
    /// Whether rate limiting is enabled
    enabled: bool,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(id: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            id: id.into(),
            config,
            buckets: DashMap::new(),
            enabled: true,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self::new(id, RateLimiterConfig::default())
    }

    /// Create a disabled rate limiter (always allows requests)
    #[must_use]
    pub fn disabled(id: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::with_defaults(id)
        }
    }

    /// Get the rate limiter ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check if rate limiting is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Admit or reject one request for `key`.
    ///
    /// Refill, comparison and decrement happen while holding the entry lock,
    /// so two concurrent requests for the same key cannot share a token.
    pub fn check_limit(&self, key: &str) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: self.config.max_tokens as u32,
                limit: self.config.max_tokens as u32,
                reset_in: Duration::ZERO,
            };
        }

        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(&self.config, now));
        let decision = bucket.try_consume(&self.config, now);
        drop(bucket);

        if decision.allowed {
            debug!(
                rate_limiter = %self.id,
                key = %key,
                remaining = decision.remaining,
                "Rate limit check passed"
            );
        } else {
            warn!(
                rate_limiter = %self.id,
                key = %key,
                limit = decision.limit,
                retry_after_ms = decision.reset_in.as_millis(),
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Check rate limit for a key, turning rejections into errors
    ///
    /// # Errors
    /// Returns `VoyageError::RateLimit` if the bucket is empty
    pub fn check(&self, key: &str) -> Result<RateLimitDecision, VoyageError> {
        self.check_limit(key).into_result()
    }

    /// Drop the bucket for `key`; the next request starts with a full bucket
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.buckets.remove(key).is_some();
        debug!(rate_limiter = %self.id, key = %key, removed, "Rate limit bucket reset");
        removed
    }

    /// Get statistics for a specific key
    #[must_use]
    pub fn stats(&self, key: &str) -> Option<BucketStats> {
        let now = Instant::now();
        self.buckets.get(key).map(|bucket| BucketStats {
            tokens: bucket.level_at(&self.config, now),
            max_tokens: self.config.max_tokens,
        })
    }

    /// Get all keys with their statistics
    #[must_use]
    pub fn all_stats(&self) -> HashMap<String, BucketStats> {
        let now = Instant::now();
        self.buckets
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    BucketStats {
                        tokens: entry.value().level_at(&self.config, now),
                        max_tokens: self.config.max_tokens,
                    },
                )
            })
            .collect()
    }

    /// Remove buckets that have not been checked for longer than `max_idle`
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();

        self.buckets.retain(|key, bucket| {
            let idle = now.saturating_duration_since(bucket.last_refill);
            if idle > max_idle {
                debug!(
                    rate_limiter = %self.id,
                    key = %key,
                    "Cleaned up idle rate limit bucket"
                );
                false
            } else {
                true
            }
        });

        before.saturating_sub(self.buckets.len())
    }

    /// Get number of tracked keys
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.buckets.len()
    }

    /// Sweep idle buckets every `period` until the limiter is dropped
    pub fn spawn_cleanup(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.cleanup(limiter.config.idle_ttl());
                if removed > 0 {
                    debug!(rate_limiter = %limiter.id, removed, "Rate limit sweep completed");
                }
            }
        })
    }
}
