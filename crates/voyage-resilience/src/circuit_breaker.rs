//! Circuit breaker for a protected remote dependency.
//!
//! Closed → Open after `failure_threshold` consecutive failures. While open,
//! calls fail fast until `timeout` has elapsed; the next call then probes the
//! dependency in the half-open state. `success_threshold` consecutive probe
//! successes close the circuit, a single probe failure reopens it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use voyage_core::VoyageError;

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// Probe calls are let through to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the state gauge
    #[must_use]
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
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

/// Snapshot of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures
    pub failures: u32,
    /// Consecutive half-open successes
    pub successes: u32,
    /// Wall-clock time of the most recent failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Calls admitted or rejected since creation
    pub total_requests: u64,
    /// Failed calls since creation, rejections included
    pub total_failures: u64,
    /// Successful calls since creation
    pub total_successes: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    next_attempt_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            next_attempt_at: None,
            last_failure_time: None,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

/// Circuit breaker guarding one dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Name of the protected dependency
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Run `f` through the breaker.
    ///
    /// Any `Err` returned by `f` counts as a failure. The state lock is
    /// released while `f` runs.
    ///
    /// # Errors
    /// Returns `VoyageError::CircuitOpen` without calling `f` while the
    /// circuit is open, otherwise whatever `f` returns.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, VoyageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, VoyageError>>,
    {
        self.acquire()?;

        let result = f().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        result
    }

    /// Admit a call or reject it while open
    fn acquire(&self) -> Result<(), VoyageError> {
        let now = Instant::now();
        let mut s = self.state.lock();
        s.total_requests += 1;

        if s.state == CircuitState::Open {
            let next_attempt_at = s.next_attempt_at.unwrap_or(now);
            if now < next_attempt_at {
                s.total_failures += 1;
                let retry_after = next_attempt_at - now;
                debug!(
                    circuit_breaker = %self.name,
                    retry_after_ms = retry_after.as_millis(),
                    "Circuit open, rejecting call"
                );
                return Err(VoyageError::circuit_open(&self.name, retry_after));
            }

            s.state = CircuitState::HalfOpen;
            s.consecutive_successes = 0;
            info!(circuit_breaker = %self.name, "Circuit half-open, probing dependency");
        }

        Ok(())
    }

    fn record_success(&self) {
        let mut s = self.state.lock();
        s.total_successes += 1;

        match s.state {
            CircuitState::HalfOpen => {
                s.consecutive_successes += 1;
                if s.consecutive_successes >= self.config.success_threshold {
                    s.state = CircuitState::Closed;
                    s.consecutive_failures = 0;
                    s.consecutive_successes = 0;
                    s.next_attempt_at = None;
                    info!(circuit_breaker = %self.name, "Circuit closed");
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                s.consecutive_failures = 0;
            }
        }
    }

    fn record_failure(&self, error: &VoyageError) {
        let now = Instant::now();
        let mut s = self.state.lock();
        s.total_failures += 1;
        s.last_failure_time = Some(Utc::now());

        match s.state {
            CircuitState::HalfOpen => {
                s.state = CircuitState::Open;
                s.consecutive_successes = 0;
                s.next_attempt_at = Some(now + self.config.timeout);
                warn!(
                    circuit_breaker = %self.name,
                    error = %error,
                    "Probe failed, circuit reopened"
                );
            }
            CircuitState::Closed | CircuitState::Open => {
                s.consecutive_failures += 1;
                if s.state == CircuitState::Closed
                    && s.consecutive_failures >= self.config.failure_threshold
                {
                    s.state = CircuitState::Open;
                    s.next_attempt_at = Some(now + self.config.timeout);
                    warn!(
                        circuit_breaker = %self.name,
                        failures = s.consecutive_failures,
                        open_for_ms = self.config.timeout.as_millis(),
                        error = %error,
                        "Circuit opened"
                    );
                }
            }
        }
    }

    /// Force the circuit closed and zero every counter
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::closed();
        info!(circuit_breaker = %self.name, "Circuit breaker reset");
    }

    /// Get a snapshot of the breaker
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let s = self.state.lock();
        CircuitBreakerStats {
            state: s.state,
            failures: s.consecutive_failures,
            successes: s.consecutive_successes,
            last_failure_time: s.last_failure_time,
            total_requests: s.total_requests,
            total_failures: s.total_failures,
            total_successes: s.total_successes,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
