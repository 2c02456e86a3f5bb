//! Application state shared across handlers.
//!
//! [`AppStateBuilder`] is the composition root: it builds the breaker, caches,
//! limiters and pipeline services from configuration and hands them out as
//! `Arc` handles.

use dashmap::DashMap;
use secrecy::SecretString;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;
use voyage_config::{CacheDomainConfig, LimiterSettings, StageConfig, VoyageConfig};
use voyage_core::{
    DiscoveryResult, GenerateResponse, IntentResult, ModelBackend, ModelId, VoyageError,
};
use voyage_pipeline::{Pipeline, PipelineServices, PlanSnapshot, StagePolicies};
use voyage_resilience::{
    CacheConfig, CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig,
    ResilienceChain, RetryConfig, RetryExecutor, StagePolicy, TtlCache,
};
use voyage_telemetry::{Metrics, MetricsConfig};

use crate::metered::MeteredBackend;

/// Sessions untouched for this long are dropped by the sweeper
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<VoyageConfig>,
    /// Remote model, wrapped for latency metrics
    pub backend: Arc<dyn ModelBackend>,
    /// Breaker guarding the remote model
    pub breaker: Arc<CircuitBreaker>,
    /// Chain used by the generate proxy
    pub generate: Arc<ResilienceChain<GenerateResponse>>,
    /// Budget of one generate call
    pub generate_policy: StagePolicy,
    /// Model used by the planning stages
    pub model: ModelId,
    /// Limiter on every `/api` request
    pub global_limiter: Arc<RateLimiter>,
    /// Limiter on requests that reach the remote model
    pub gemini_limiter: Arc<RateLimiter>,
    /// Result caches
    pub caches: Caches,
    /// Shared planning services
    pub planner: Arc<PipelineServices>,
    /// Planning sessions
    pub sessions: Arc<SessionStore>,
    /// Metrics collector
    pub metrics: Arc<Metrics>,
    /// Token required by admin routes
    pub admin_token: Option<Arc<SecretString>>,
    /// Process start, for uptime
    pub started_at: Instant,
}

/// Every cache the gateway owns
#[derive(Clone)]
pub struct Caches {
    /// Generate proxy responses
    pub generate: Arc<TtlCache<String, GenerateResponse>>,
    /// Intent results
    pub intent: Arc<TtlCache<String, IntentResult>>,
    /// Discovery results
    pub discovery: Arc<TtlCache<String, DiscoveryResult>>,
}

impl AppState {
    /// Create a new application state builder
    #[must_use]
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Start the periodic sweeps: idle limiter buckets, expired cache entries
    /// and idle sessions. The tasks end once the state is dropped.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let limits = &self.config.rate_limiting;
        let sweep = self.config.cache.sweep_interval;

        vec![
            self.global_limiter.spawn_cleanup(limits.cleanup_interval),
            self.gemini_limiter.spawn_cleanup(limits.cleanup_interval),
            self.caches.generate.spawn_sweeper(sweep),
            self.caches.intent.spawn_sweeper(sweep),
            self.caches.discovery.spawn_sweeper(sweep),
            self.sessions.spawn_sweeper(limits.cleanup_interval, SESSION_IDLE_TTL),
        ]
    }
}

/// Builder for application state
pub struct AppStateBuilder {
    config: Option<VoyageConfig>,
    backend: Option<Arc<dyn ModelBackend>>,
    metrics: Option<Metrics>,
}

impl AppStateBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            metrics: None,
        }
    }

    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: VoyageConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the remote model backend
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the metrics
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the application state
    ///
    /// # Errors
    /// Returns a configuration error if no backend was set, the default
    /// model is unknown or metrics cannot be registered
    pub fn build(self) -> Result<AppState, VoyageError> {
        let config = self.config.unwrap_or_default();
        let backend = self
            .backend
            .ok_or_else(|| VoyageError::configuration("a model backend is required"))?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new(&MetricsConfig {
                enabled: config.observability.metrics.enabled,
                latency_buckets: config.observability.metrics.latency_buckets.clone(),
            })
            .map_err(|e| VoyageError::configuration(format!("metrics: {e}")))?,
        };
        let metrics = Arc::new(metrics);

        let model: ModelId = config
            .provider
            .default_model
            .parse()
            .map_err(|e: VoyageError| VoyageError::configuration(e.to_string()))?;

        let backend: Arc<dyn ModelBackend> =
            Arc::new(MeteredBackend::new(backend, Arc::clone(&metrics)));

        let resilience = &config.resilience;
        let breaker = Arc::new(CircuitBreaker::new(
            backend.id(),
            CircuitBreakerConfig {
                failure_threshold: resilience.circuit_breaker.failure_threshold,
                success_threshold: resilience.circuit_breaker.success_threshold,
                timeout: resilience.circuit_breaker.timeout,
            },
        ));
        let retry = RetryExecutor::new(RetryConfig {
            backoff_base: resilience.retry.backoff_base,
            jitter: resilience.retry.jitter,
        });

        let caches = Caches {
            generate: Arc::new(TtlCache::new("generate", cache_config(&config.cache.generate))),
            intent: Arc::new(TtlCache::new("intent", cache_config(&config.cache.intent))),
            discovery: Arc::new(TtlCache::new(
                "discovery",
                cache_config(&config.cache.discovery),
            )),
        };

        let stages = &resilience.stages;
        let policies = StagePolicies {
            intent: stage_policy(&stages.intent),
            discovery: stage_policy(&stages.discovery),
            optimization: stage_policy(&stages.optimization),
            refine: stage_policy(&stages.refine),
        };

        let planner = PipelineServices::new(Arc::clone(&backend), Arc::clone(&breaker), retry.clone())
            .with_model(model)
            .with_policies(policies)
            .with_intent_cache(Arc::clone(&caches.intent))
            .with_discovery_cache(Arc::clone(&caches.discovery));

        let generate = ResilienceChain::new(Arc::clone(&breaker), retry)
            .with_cache(Arc::clone(&caches.generate));

        let limits = &config.rate_limiting;
        let global_limiter = limiter("global", limits.enabled, &limits.global);
        let gemini_limiter = limiter("gemini", limits.enabled, &limits.gemini);

        let admin_token = config.security.resolve_admin_token().map(Arc::new);
        if admin_token.is_none() {
            info!("No admin token configured; admin endpoints are disabled");
        }

        info!(
            dependency = %backend.id(),
            model = %model,
            rate_limiting = limits.enabled,
            "Application state built"
        );

        Ok(AppState {
            generate_policy: stage_policy(&stages.generate),
            config: Arc::new(config),
            backend,
            breaker,
            generate: Arc::new(generate),
            model,
            global_limiter,
            gemini_limiter,
            caches,
            planner: Arc::new(planner),
            sessions: Arc::new(SessionStore::new()),
            metrics,
            admin_token,
            started_at: Instant::now(),
        })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_config(settings: &CacheDomainConfig) -> CacheConfig {
    CacheConfig {
        max_size: settings.max_size,
        default_ttl: settings.ttl,
    }
}

fn stage_policy(settings: &StageConfig) -> StagePolicy {
    StagePolicy::new(settings.timeout, settings.max_retries)
}

fn limiter(id: &str, enabled: bool, settings: &LimiterSettings) -> Arc<RateLimiter> {
    if !enabled {
        return Arc::new(RateLimiter::disabled(id));
    }
    Arc::new(RateLimiter::new(
        id,
        RateLimiterConfig::new(
            f64::from(settings.max_tokens),
            settings.refill_rate(),
            settings.window,
        ),
    ))
}

/// Work a request asks of a planning session
#[derive(Debug, Clone)]
pub enum PlanAction {
    /// Plan a new query
    Start(String),
    /// Accept the result under review
    Confirm,
    /// Change one itinerary of a complete plan
    Refine {
        /// Itinerary to change
        index: usize,
        /// What to change
        instruction: String,
    },
}

impl PlanAction {
    fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Confirm => "confirm",
            Self::Refine { .. } => "refine",
        }
    }

    async fn apply(self, pipeline: &mut Pipeline) -> Result<(), VoyageError> {
        match self {
            Self::Start(query) => pipeline.start(query).await.map(|_| ()),
            Self::Confirm => pipeline.confirm().await.map(|_| ()),
            Self::Refine { index, instruction } => {
                pipeline.refine(index, &instruction).await.map(|_| ())
            }
        }
    }
}

/// How a planning action ended and the session right after it
#[derive(Debug)]
pub struct PlanOutcome {
    /// What the pipeline reported
    pub result: Result<(), VoyageError>,
    /// Session view taken under the same lock
    pub snapshot: PlanSnapshot,
}

/// One planning session
pub struct Session {
    /// The session's pipeline; held across awaits while a stage runs
    pub pipeline: tokio::sync::Mutex<Pipeline>,
    tasks: parking_lot::Mutex<Vec<AbortHandle>>,
    touched: parking_lot::Mutex<Instant>,
}

impl Session {
    fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: tokio::sync::Mutex::new(pipeline),
            tasks: parking_lot::Mutex::new(Vec::new()),
            touched: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.touched.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.touched.lock().elapsed()
    }

    /// Run `action` on the pipeline in a task of its own.
    ///
    /// The task outlives the request that started it: a dropped connection or
    /// an expired request deadline never leaves a stage half done. Only
    /// [`Session::abort_planning`] stops it early.
    ///
    /// # Errors
    /// `InvalidTransition` if the plan was cancelled while the action ran,
    /// `Internal` if the task panicked
    pub async fn run(self: &Arc<Self>, action: PlanAction) -> Result<PlanOutcome, VoyageError> {
        let name = action.name();
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut pipeline = session.pipeline.lock().await;
            let result = action.apply(&mut pipeline).await;
            PlanOutcome {
                result,
                snapshot: pipeline.snapshot(),
            }
        });

        {
            let mut tasks = self.tasks.lock();
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle.abort_handle());
        }

        match handle.await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() => {
                info!(action = name, "Planning action cancelled");
                Err(VoyageError::invalid_transition("cancelled", name))
            }
            Err(e) => {
                error!(action = name, error = %e, "Planning task panicked");
                self.pipeline.lock().await.interrupt();
                Err(VoyageError::internal("Planning task failed"))
            }
        }
    }

    /// Stop planning tasks still running for this session.
    ///
    /// A stopped task releases the pipeline in whatever state it reached,
    /// so the caller must settle it.
    pub fn abort_planning(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let mut aborted = 0;
        for task in tasks.drain(..) {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

/// Planning sessions keyed by id
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session
    pub fn create(&self, pipeline: Pipeline) -> (Uuid, Arc<Session>) {
        let id = Uuid::new_v4();
        let session = Arc::new(Session::new(pipeline));
        self.sessions.insert(id, Arc::clone(&session));
        debug!(session_id = %id, "Planning session created");
        (id, session)
    }

    /// Look up a session
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id
    pub fn get(&self, id: Uuid) -> Result<Arc<Session>, VoyageError> {
        let session = self
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| VoyageError::SessionNotFound { id: id.to_string() })?;
        session.touch();
        Ok(session)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for longer than `max_idle`
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.idle_for() <= max_idle);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, "Idle planning sessions removed");
        }
        removed
    }

    /// Sweep idle sessions every `period` until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, max_idle: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.cleanup(max_idle);
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voyage_core::GenerateRequest;

    struct EchoBackend;

    #[async_trait]
    impl ModelBackend for EchoBackend {
        fn id(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, VoyageError> {
            Ok(GenerateResponse {
                text: request.contents.to_string(),
            })
        }
    }

    fn state(config: VoyageConfig) -> AppState {
        AppState::builder()
            .config(config)
            .backend(Arc::new(EchoBackend))
            .build()
            .expect("state")
    }

    #[test]
    fn test_builder_applies_config() {
        let mut config = VoyageConfig::default();
        config.cache.generate.max_size = 7;
        config.resilience.circuit_breaker.failure_threshold = 3;
        config.provider.default_model = "gemini-2.5-pro".to_string();

        let state = state(config);
        assert_eq!(state.caches.generate.stats().max_size, 7);
        assert_eq!(state.breaker.config().failure_threshold, 3);
        assert_eq!(state.breaker.name(), "echo");
        assert_eq!(state.model, ModelId::Gemini25Pro);
        assert!(state.global_limiter.is_enabled());
    }

    #[test]
    fn test_disabled_rate_limiting() {
        let mut config = VoyageConfig::default();
        config.rate_limiting.enabled = false;

        let state = state(config);
        assert!(!state.global_limiter.is_enabled());
        assert!(!state.gemini_limiter.is_enabled());
    }

    #[test]
    fn test_missing_backend_and_bad_model() {
        assert!(AppState::builder().build().is_err());

        let mut config = VoyageConfig::default();
        config.provider.default_model = "gpt-4".to_string();
        let err = AppState::builder()
            .config(config)
            .backend(Arc::new(EchoBackend))
            .build()
            .err()
            .expect("unknown model");
        assert!(matches!(err, VoyageError::Configuration { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_store_expiry() {
        let state = state(VoyageConfig::default());
        let store = SessionStore::new();
        let (id, _) = store.create(Pipeline::new(Arc::clone(&state.planner)));
        let (stale, _) = store.create(Pipeline::new(Arc::clone(&state.planner)));

        tokio::time::advance(Duration::from_secs(50 * 60)).await;
        store.get(id).expect("touch");
        tokio::time::advance(Duration::from_secs(20 * 60)).await;

        assert_eq!(store.cleanup(SESSION_IDLE_TTL), 1);
        assert!(store.get(id).is_ok());
        assert!(matches!(
            store.get(stale),
            Err(VoyageError::SessionNotFound { .. })
        ));
    }
}
