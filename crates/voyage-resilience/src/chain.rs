//! Composition of the resilience primitives around a remote call.
//!
//! Order, outermost first: cache → circuit breaker → retry (with per-attempt
//! timeout) → remote call. A cache hit never touches the breaker, an open
//! breaker rejects before the first attempt, and only successful values are
//! written back to the cache.

use crate::cache::TtlCache;
use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{RetryExecutor, StagePolicy};
use std::future::Future;
use std::sync::Arc;
use voyage_core::VoyageError;

/// Cache, breaker and retry wrapped around one kind of remote call
pub struct ResilienceChain<V> {
    cache: Option<Arc<TtlCache<String, V>>>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
}

impl<V: Clone> ResilienceChain<V> {
    /// Chain without a cache
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryExecutor) -> Self {
        Self {
            cache: None,
            breaker,
            retry,
        }
    }

    /// Put a cache in front of the breaker
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TtlCache<String, V>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The cache, if any
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<TtlCache<String, V>>> {
        self.cache.as_ref()
    }

    /// The breaker guarding the remote dependency
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `f` through the chain.
    ///
    /// Without a `cache_key` (or without a cache) the lookup is skipped.
    ///
    /// # Errors
    /// `CircuitOpen` while the breaker is open, `RetriesExhausted` after the
    /// last attempt, or the first non-retryable error
    pub async fn call<F, Fut>(
        &self,
        operation: &str,
        cache_key: Option<String>,
        policy: StagePolicy,
        f: F,
    ) -> Result<V, VoyageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, VoyageError>>,
    {
        let guarded = || {
            self.breaker
                .execute(|| self.retry.run(operation, policy, f))
        };

        match (&self.cache, cache_key) {
            (Some(cache), Some(key)) => cache.get_or_compute(key, guarded, None).await,
            _ => guarded().await,
        }
    }
}
