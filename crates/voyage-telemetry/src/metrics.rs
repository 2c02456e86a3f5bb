//! Prometheus metrics for the gateway.
//!
//! Two views of the same events:
//! - Prometheus collectors for scraping (`gather`)
//! - In-memory totals and a remote latency summary for `/api/metrics`
//!
//! The in-memory view is kept even when Prometheus export is disabled.

use parking_lot::Mutex;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

const NAMESPACE: &str = "voyage";

/// Latency samples kept for the percentile estimate
const LATENCY_WINDOW: usize = 1000;

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Export Prometheus collectors
    pub enabled: bool,
    /// Histogram buckets for remote call latency, in seconds
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

/// Remote call latency aggregate, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Calls observed
    pub count: u64,
    /// Mean latency
    pub avg_ms: f64,
    /// Fastest call
    pub min_ms: f64,
    /// Slowest call
    pub max_ms: f64,
    /// 95th percentile over the recent window
    pub p95_ms: f64,
}

/// Point-in-time copy of the in-memory counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// HTTP requests served
    pub requests: u64,
    /// HTTP responses with status >= 400
    pub errors: u64,
    /// Remote model latency
    pub remote: LatencySummary,
}

#[derive(Default)]
struct LatencyState {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
    recent: VecDeque<f64>,
}

impl LatencyState {
    fn record(&mut self, ms: f64) {
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.count += 1;
        self.total_ms += ms;

        if self.recent.len() == LATENCY_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ms);
    }

    fn summary(&self) -> LatencySummary {
        if self.count == 0 {
            return LatencySummary::default();
        }

        let mut sorted: Vec<f64> = self.recent.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        // nearest-rank
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let p95 = sorted[rank.clamp(1, sorted.len()) - 1];

        LatencySummary {
            count: self.count,
            avg_ms: self.total_ms / self.count as f64,
            min_ms: self.min_ms,
            max_ms: self.max_ms,
            p95_ms: p95,
        }
    }
}

/// Metrics registry and collectors
pub struct Metrics {
    enabled: bool,
    registry: Registry,
    requests_total: CounterVec,
    request_latency: HistogramVec,
    errors_total: CounterVec,
    remote_latency: HistogramVec,
    circuit_breaker_state: GaugeVec,
    rate_limit_rejections: CounterVec,
    cache_operations: CounterVec,
    pipeline_fallbacks: CounterVec,
    requests: AtomicU64,
    errors: AtomicU64,
    latency: Mutex<LatencyState>,
}

impl Metrics {
    /// Create a new metrics instance
    ///
    /// # Errors
    /// Returns error if metrics cannot be registered
    pub fn new(config: &MetricsConfig) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("http_requests_total", "HTTP requests served").namespace(NAMESPACE),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .namespace(NAMESPACE)
                .buckets(config.latency_buckets.clone()),
            &["method", "path"],
        )?;
        registry.register(Box::new(request_latency.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Errors by type").namespace(NAMESPACE),
            &["error_type"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let remote_latency = HistogramVec::new(
            HistogramOpts::new("remote_call_duration_seconds", "Remote model call latency")
                .namespace(NAMESPACE)
                .buckets(config.latency_buckets.clone()),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(remote_latency.clone()))?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            )
            .namespace(NAMESPACE),
            &["dependency"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let rate_limit_rejections = CounterVec::new(
            Opts::new("rate_limit_rejections_total", "Requests rejected by a limiter")
                .namespace(NAMESPACE),
            &["limiter"],
        )?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;

        let cache_operations = CounterVec::new(
            Opts::new("cache_operations_total", "Cache lookups").namespace(NAMESPACE),
            &["cache", "result"],
        )?;
        registry.register(Box::new(cache_operations.clone()))?;

        let pipeline_fallbacks = CounterVec::new(
            Opts::new(
                "pipeline_fallbacks_total",
                "Plans completed with the deterministic fallback",
            )
            .namespace(NAMESPACE),
            &["stage"],
        )?;
        registry.register(Box::new(pipeline_fallbacks.clone()))?;

        info!(enabled = config.enabled, "Metrics initialized");

        Ok(Self {
            enabled: config.enabled,
            registry,
            requests_total,
            request_latency,
            errors_total,
            remote_latency,
            circuit_breaker_state,
            rate_limit_rejections,
            cache_operations,
            pipeline_fallbacks,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency: Mutex::new(LatencyState::default()),
        })
    }

    /// Whether Prometheus export is on
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a served HTTP request
    pub fn record_request(&self, method: &str, path: &str, status: u16, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if status >= 400 {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }

        if self.enabled {
            let status = status.to_string();
            self.requests_total
                .with_label_values(&[method, path, &status])
                .inc();
            self.request_latency
                .with_label_values(&[method, path])
                .observe(latency.as_secs_f64());
        }

        debug!(method, path, status, latency_ms = latency.as_millis(), "Request metrics recorded");
    }

    /// Record an error by type
    pub fn record_error(&self, error_type: &str) {
        if self.enabled {
            self.errors_total.with_label_values(&[error_type]).inc();
        }
    }

    /// Record one remote model call as seen from outside the resilience chain
    pub fn record_remote_call(&self, operation: &str, latency: Duration, success: bool) {
        self.latency.lock().record(latency.as_secs_f64() * 1000.0);

        if self.enabled {
            let outcome = if success { "success" } else { "error" };
            self.remote_latency
                .with_label_values(&[operation, outcome])
                .observe(latency.as_secs_f64());
        }
    }

    /// Update circuit breaker state gauge (0=closed, 1=open, 2=half-open)
    pub fn update_circuit_breaker(&self, dependency: &str, state: f64) {
        if self.enabled {
            self.circuit_breaker_state
                .with_label_values(&[dependency])
                .set(state);
        }
    }

    /// Record a limiter rejection
    pub fn record_rate_limit_rejection(&self, limiter: &str) {
        if self.enabled {
            self.rate_limit_rejections.with_label_values(&[limiter]).inc();
        }
    }

    /// Record a cache lookup
    pub fn record_cache_operation(&self, cache: &str, hit: bool) {
        if self.enabled {
            let result = if hit { "hit" } else { "miss" };
            self.cache_operations.with_label_values(&[cache, result]).inc();
        }
    }

    /// Record a plan completed by the fallback generator
    pub fn record_fallback(&self, stage: &str) {
        if self.enabled {
            self.pipeline_fallbacks.with_label_values(&[stage]).inc();
        }
    }

    /// In-memory counters for the JSON view
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            remote: self.latency.lock().summary(),
        }
    }

    /// Get metrics as Prometheus text format
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get the Prometheus registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
