//! # Voyage Resilience
//!
//! Resilience primitives guarding calls to the remote model:
//! - Token bucket rate limiting per client key
//! - Circuit breaker per protected dependency
//! - TTL cache with LRU eviction
//! - Retry with per-attempt timeout and exponential backoff
//! - `ResilienceChain`, composing cache → breaker → retry around a call

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod chain;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
pub mod timeout;

pub use cache::{CacheConfig, CacheStats, TtlCache, DEFAULT_SWEEP_INTERVAL};
pub use chain::ResilienceChain;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use rate_limiter::{
    BucketStats, RateLimitDecision, RateLimiter, RateLimiterConfig, DEFAULT_CLEANUP_INTERVAL,
};
pub use retry::{RetryConfig, RetryExecutor, StagePolicy};
pub use timeout::with_timeout;
