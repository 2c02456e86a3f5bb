//! Planning pipeline driver.
//!
//! [`PipelineServices`] holds what every session shares: the model backend
//! and one resilience chain per stage. [`Pipeline`] is one planning session:
//! its state and the results gathered so far.

use crate::audit::StageAudit;
use crate::fallback;
use crate::prompts;
use crate::state::{needs_confirmation, PipelineEvent, PipelineState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use voyage_core::{
    content_hash, DiscoveryResult, GenerateRequest, IntentResult, Itinerary, ModelBackend,
    ModelId, OptimizationResult, Stage, StageOutput, VoyageError,
};
use voyage_resilience::{
    CircuitBreaker, ResilienceChain, RetryExecutor, StagePolicy, TtlCache,
};

/// Timeout and retry budget per stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicies {
    /// Intent extraction
    pub intent: StagePolicy,
    /// Candidate discovery
    pub discovery: StagePolicy,
    /// Itinerary optimization
    pub optimization: StagePolicy,
    /// Itinerary refinement
    pub refine: StagePolicy,
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            intent: StagePolicy::for_stage(Stage::Intent),
            discovery: StagePolicy::for_stage(Stage::Discovery),
            optimization: StagePolicy::for_stage(Stage::Optimization),
            refine: StagePolicy::for_stage(Stage::Refine),
        }
    }
}

impl StagePolicies {
    /// Policy for one stage
    #[must_use]
    pub fn get(&self, stage: Stage) -> StagePolicy {
        match stage {
            Stage::Intent => self.intent,
            Stage::Discovery => self.discovery,
            Stage::Optimization => self.optimization,
            Stage::Refine => self.refine,
        }
    }
}

/// Backend and resilience chains shared by every planning session
pub struct PipelineServices {
    backend: Arc<dyn ModelBackend>,
    model: ModelId,
    policies: StagePolicies,
    intent: ResilienceChain<IntentResult>,
    discovery: ResilienceChain<DiscoveryResult>,
    optimization: ResilienceChain<OptimizationResult>,
    refine: ResilienceChain<Itinerary>,
}

impl PipelineServices {
    /// Create services whose stages all go through `breaker`
    #[must_use]
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            backend,
            model: ModelId::default(),
            policies: StagePolicies::default(),
            intent: ResilienceChain::new(Arc::clone(&breaker), retry.clone()),
            discovery: ResilienceChain::new(Arc::clone(&breaker), retry.clone()),
            optimization: ResilienceChain::new(Arc::clone(&breaker), retry.clone()),
            refine: ResilienceChain::new(breaker, retry),
        }
    }

    /// Cache intent results by normalized query
    #[must_use]
    pub fn with_intent_cache(mut self, cache: Arc<TtlCache<String, IntentResult>>) -> Self {
        self.intent = self.intent.with_cache(cache);
        self
    }

    /// Cache discovery results by intent
    #[must_use]
    pub fn with_discovery_cache(mut self, cache: Arc<TtlCache<String, DiscoveryResult>>) -> Self {
        self.discovery = self.discovery.with_cache(cache);
        self
    }

    /// Model used for every stage
    #[must_use]
    pub fn with_model(mut self, model: ModelId) -> Self {
        self.model = model;
        self
    }

    /// Override the stage policies
    #[must_use]
    pub fn with_policies(mut self, policies: StagePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// The model backend
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    fn cache_key(&self, stage: Stage, input: &str) -> String {
        format!("{}:{}:{:016x}", stage, self.model, content_hash(input))
    }

    async fn call_stage<T>(
        &self,
        stage: Stage,
        chain: &ResilienceChain<T>,
        cache_key: Option<String>,
        input: &impl Serialize,
        prompt: String,
    ) -> Result<T, VoyageError>
    where
        T: DeserializeOwned + Serialize + Clone + StageOutput,
    {
        let audit = StageAudit::enter(stage, input);
        let request = GenerateRequest::text(self.model, prompt).json_output();
        let backend = self.backend.as_ref();
        let request = &request;

        let outcome = chain
            .call(stage.as_str(), cache_key, self.policies.get(stage), || async move {
                let response = backend.generate(request).await?;
                prompts::parse_output::<T>(stage, &response.text)
            })
            .await;

        audit.finish(&outcome);
        outcome
    }

    /// Extract the intent from a free-form request
    ///
    /// # Errors
    /// Any error produced by the resilience chain
    pub async fn extract_intent(&self, query: &str) -> Result<IntentResult, VoyageError> {
        let normalized = query.trim().to_lowercase();
        let key = self.cache_key(Stage::Intent, &normalized);
        self.call_stage(
            Stage::Intent,
            &self.intent,
            Some(key),
            &query,
            prompts::intent_prompt(query),
        )
        .await
    }

    /// Find candidates for an intent
    ///
    /// # Errors
    /// Any error produced by the resilience chain
    pub async fn discover(&self, intent: &IntentResult) -> Result<DiscoveryResult, VoyageError> {
        let key = serde_json::to_string(intent)
            .ok()
            .map(|json| self.cache_key(Stage::Discovery, &json));
        self.call_stage(
            Stage::Discovery,
            &self.discovery,
            key,
            intent,
            prompts::discovery_prompt(intent),
        )
        .await
    }

    /// Arrange candidates into itineraries
    ///
    /// # Errors
    /// Any error produced by the resilience chain, or `MalformedOutput` if no
    /// itinerary came back
    pub async fn optimize(
        &self,
        intent: &IntentResult,
        discovery: &DiscoveryResult,
    ) -> Result<OptimizationResult, VoyageError> {
        let result: OptimizationResult = self
            .call_stage(
                Stage::Optimization,
                &self.optimization,
                None,
                &(intent, discovery),
                prompts::optimization_prompt(intent, discovery),
            )
            .await?;

        if result.itineraries.is_empty() {
            return Err(VoyageError::malformed_output(
                Stage::Optimization,
                "no itineraries returned",
            ));
        }
        Ok(result)
    }

    /// Apply an instruction to one itinerary
    ///
    /// # Errors
    /// Any error produced by the resilience chain
    pub async fn refine(
        &self,
        itinerary: &Itinerary,
        instruction: &str,
    ) -> Result<Itinerary, VoyageError> {
        self.call_stage(
            Stage::Refine,
            &self.refine,
            None,
            &(itinerary, instruction),
            prompts::refine_prompt(itinerary, instruction),
        )
        .await
    }
}

/// Results gathered by a session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanContext {
    /// The submitted request
    pub query: Option<String>,
    /// Intent stage result
    pub intent: Option<IntentResult>,
    /// Discovery stage result
    pub discovery: Option<DiscoveryResult>,
    /// Optimization result, updated in place by refinements
    pub result: Option<OptimizationResult>,
}

/// Serializable view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSnapshot {
    /// Current state
    pub state: PipelineState,
    /// Results so far
    #[serde(flatten)]
    pub context: PlanContext,
}

/// One planning session
pub struct Pipeline {
    services: Arc<PipelineServices>,
    state: PipelineState,
    context: PlanContext,
}

impl Pipeline {
    /// Create an idle session
    #[must_use]
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self {
            services,
            state: PipelineState::Idle,
            context: PlanContext::default(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Results gathered so far
    #[must_use]
    pub fn context(&self) -> &PlanContext {
        &self.context
    }

    /// Serializable view of the session
    #[must_use]
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            state: self.state.clone(),
            context: self.context.clone(),
        }
    }

    fn apply(&mut self, event: PipelineEvent) -> Result<(), VoyageError> {
        let next = self.state.transition(event)?;
        debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
        Ok(())
    }

    /// Start planning `query`, running stages until the plan is complete or a
    /// result needs confirmation.
    ///
    /// # Errors
    /// `InvalidTransition` if a plan is in progress, `Validation` for an empty
    /// query, `Pipeline` if intent or discovery fail for good
    pub async fn start(&mut self, query: impl Into<String>) -> Result<&PipelineState, VoyageError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(VoyageError::validation(
                "Query must not be empty",
                Some("query".to_string()),
                "missing_query",
            ));
        }

        self.apply(PipelineEvent::Start)?;
        self.context = PlanContext {
            query: Some(query),
            ..PlanContext::default()
        };
        self.advance().await?;
        Ok(&self.state)
    }

    /// Accept the result under review and continue
    ///
    /// # Errors
    /// `InvalidTransition` if nothing awaits confirmation, `Pipeline` if a
    /// later stage fails for good
    pub async fn confirm(&mut self) -> Result<&PipelineState, VoyageError> {
        self.apply(PipelineEvent::Confirm)?;
        self.advance().await?;
        Ok(&self.state)
    }

    /// Abandon the plan and clear its results
    ///
    /// # Errors
    /// `InvalidTransition` if there is nothing to cancel
    pub fn cancel(&mut self) -> Result<(), VoyageError> {
        self.apply(PipelineEvent::Cancel)?;
        self.context = PlanContext::default();
        info!("Plan cancelled");
        Ok(())
    }

    /// Apply `instruction` to itinerary `index` of a complete plan.
    ///
    /// On failure the plan is left untouched.
    ///
    /// # Errors
    /// `InvalidTransition` unless the plan is complete, `Validation` for an
    /// unknown index or empty instruction, otherwise the chain's error
    pub async fn refine(
        &mut self,
        index: usize,
        instruction: &str,
    ) -> Result<&Itinerary, VoyageError> {
        let next = self.state.transition(PipelineEvent::Refine)?;
        if instruction.trim().is_empty() {
            return Err(VoyageError::validation(
                "Instruction must not be empty",
                Some("instruction".to_string()),
                "missing_instruction",
            ));
        }
        let itinerary = self
            .context
            .result
            .as_ref()
            .and_then(|r| r.itineraries.get(index))
            .cloned()
            .ok_or_else(|| {
                VoyageError::validation(
                    format!("No itinerary at index {index}"),
                    Some("itinerary_index".to_string()),
                    "invalid_itinerary_index",
                )
            })?;
        self.state = next;

        let services = Arc::clone(&self.services);
        match services.refine(&itinerary, instruction).await {
            Ok(updated) => {
                self.apply(PipelineEvent::StageCompleted {
                    stage: Stage::Refine,
                    needs_review: false,
                })?;
                let result = self.context.result.as_mut().ok_or_else(|| {
                    VoyageError::internal("plan result disappeared during refinement")
                })?;
                result.itineraries[index] = updated;
                Ok(&result.itineraries[index])
            }
            Err(e) => {
                self.apply(PipelineEvent::StageFailed {
                    stage: Stage::Refine,
                    message: e.to_string(),
                })?;
                Err(e)
            }
        }
    }

    /// Settle a stage that never reported back.
    ///
    /// A session left `Running` fails with the stage's apology; an
    /// interrupted refinement returns to the complete plan.
    pub fn interrupt(&mut self) {
        let PipelineState::Running { stage } = self.state else {
            return;
        };
        warn!(stage = %stage, "Stage interrupted before finishing");
        if let Err(e) = self.apply(PipelineEvent::StageFailed {
            stage,
            message: stage.apology().to_string(),
        }) {
            error!(error = %e, "Could not settle interrupted stage");
        }
    }

    async fn advance(&mut self) -> Result<(), VoyageError> {
        let services = Arc::clone(&self.services);

        loop {
            let PipelineState::Running { stage } = self.state else {
                return Ok(());
            };

            match stage {
                Stage::Intent => {
                    let query = self.context.query.clone().unwrap_or_default();
                    match services.extract_intent(&query).await {
                        Ok(intent) => {
                            let needs_review = needs_confirmation(&intent);
                            self.context.intent = Some(intent);
                            self.apply(PipelineEvent::StageCompleted {
                                stage,
                                needs_review,
                            })?;
                        }
                        Err(e) => return Err(self.fail(stage, e)),
                    }
                }
                Stage::Discovery => {
                    let intent = self.required_intent()?;
                    match services.discover(&intent).await {
                        Ok(discovery) => {
                            let needs_review = needs_confirmation(&discovery);
                            self.context.discovery = Some(discovery);
                            self.apply(PipelineEvent::StageCompleted {
                                stage,
                                needs_review,
                            })?;
                        }
                        Err(e) => return Err(self.fail(stage, e)),
                    }
                }
                Stage::Optimization => {
                    let intent = self.required_intent()?;
                    let discovery = self.context.discovery.clone().ok_or_else(|| {
                        VoyageError::internal("optimization started without discovery result")
                    })?;

                    let result = match services.optimize(&intent, &discovery).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(error = %e, "Optimization failed, using fallback itinerary");
                            fallback::build_itinerary(&intent, &discovery)
                        }
                    };
                    self.context.result = Some(result);
                    self.apply(PipelineEvent::StageCompleted {
                        stage,
                        needs_review: false,
                    })?;
                }
                Stage::Refine => return Ok(()),
            }
        }
    }

    fn required_intent(&self) -> Result<IntentResult, VoyageError> {
        self.context
            .intent
            .clone()
            .ok_or_else(|| VoyageError::internal("stage started without intent result"))
    }

    /// Record a terminal stage failure and build the error for the caller
    fn fail(&mut self, stage: Stage, cause: VoyageError) -> VoyageError {
        error!(stage = %stage, error = %cause, "Stage failed, no fallback available");
        let err = VoyageError::pipeline(stage, cause);
        if let Err(transition_error) = self.apply(PipelineEvent::StageFailed {
            stage,
            message: err.to_string(),
        }) {
            return transition_error;
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use voyage_core::GenerateResponse;
    use voyage_resilience::{CacheConfig, CircuitBreakerConfig, RetryConfig};

    /// Backend answering from a queue; an empty queue means the remote is down
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn with(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| (*s).to_string()).collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, VoyageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().pop_front() {
                Some(text) => Ok(GenerateResponse { text }),
                None => Err(VoyageError::provider(
                    "scripted",
                    "service unavailable",
                    Some(503),
                    true,
                )),
            }
        }
    }

    const INTENT_SURE: &str = r#"{"destination":"Rome","durationDays":2,"travelers":2,
        "interests":["history"],"confidenceScore":0.95,"assumptions":[]}"#;
    const INTENT_UNSURE: &str = r#"{"destination":"Rome","durationDays":2,
        "confidenceScore":0.5,"assumptions":["budget not stated"]}"#;
    const DISCOVERY_SURE: &str = r#"{"activities":[
        {"id":"a1","name":"Colosseum","estimatedCost":18},
        {"id":"a2","name":"Pantheon","estimatedCost":0},
        {"id":"a3","name":"Vatican Museums","estimatedCost":20}],
        "dining":[{"id":"d1","name":"Trattoria","estimatedCost":35}],
        "confidenceScore":0.9,"assumptions":[]}"#;
    const OPTIMIZED: &str = r#"{"itineraries":[{"title":"Classic Rome","summary":"Two days",
        "days":[{"day":1},{"day":2}],"totalCost":146,"currency":"EUR",
        "confidenceScore":0.88,"assumptions":[]}]}"#;
    const REFINED: &str = r#"{"title":"Slow Rome","summary":"Fewer sights",
        "days":[{"day":1},{"day":2}],"totalCost":90,"currency":"EUR",
        "confidenceScore":0.85,"assumptions":[]}"#;

    fn services(backend: Arc<ScriptedBackend>) -> Arc<PipelineServices> {
        let breaker = Arc::new(CircuitBreaker::new(
            "gemini",
            CircuitBreakerConfig::default(),
        ));
        Arc::new(
            PipelineServices::new(backend, breaker, RetryExecutor::new(RetryConfig::default()))
                .with_intent_cache(Arc::new(TtlCache::new("intent", CacheConfig::default())))
                .with_discovery_cache(Arc::new(TtlCache::new(
                    "discovery",
                    CacheConfig::default(),
                ))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_confident_run_completes() {
        let backend = ScriptedBackend::with(&[INTENT_SURE, DISCOVERY_SURE, OPTIMIZED]);
        let mut pipeline = Pipeline::new(services(Arc::clone(&backend)));

        let state = pipeline.start("2 days in Rome").await.expect("plan");
        assert_eq!(*state, PipelineState::Complete);
        assert_eq!(backend.calls(), 3);

        let result = pipeline.context().result.as_ref().expect("result");
        assert!(!result.fallback_used);
        assert_eq!(result.itineraries[0].title, "Classic Rome");
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_pauses_until_confirmed() {
        let backend = ScriptedBackend::with(&[INTENT_UNSURE, DISCOVERY_SURE, OPTIMIZED]);
        let mut pipeline = Pipeline::new(services(Arc::clone(&backend)));

        let state = pipeline.start("Rome sometime").await.expect("paused");
        assert_eq!(
            *state,
            PipelineState::AwaitingConfirmation {
                stage: Stage::Intent
            }
        );
        assert_eq!(backend.calls(), 1);
        assert!(pipeline.context().intent.is_some());

        let state = pipeline.confirm().await.expect("resume");
        assert_eq!(*state, PipelineState::Complete);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimization_failure_uses_fallback() {
        let backend = ScriptedBackend::with(&[INTENT_SURE, DISCOVERY_SURE]);
        let mut pipeline = Pipeline::new(services(Arc::clone(&backend)));

        let state = pipeline.start("2 days in Rome").await.expect("fallback plan");
        assert_eq!(*state, PipelineState::Complete);
        // 2 stage calls plus 3 optimization attempts
        assert_eq!(backend.calls(), 5);

        let result = pipeline.context().result.as_ref().expect("result");
        assert!(result.fallback_used);
        let itinerary = &result.itineraries[0];
        assert!((itinerary.confidence_score - fallback::FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(itinerary.days.len(), 2);
        assert_eq!(itinerary.days[0].morning[0].id, "a1");
        assert_eq!(itinerary.days[1].morning[0].id, "a2");
        assert_eq!(itinerary.days[0].afternoon[0].id, "a3");
        assert_eq!(itinerary.days[0].evening[0].id, "d1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_intent_failure_apologizes_and_allows_restart() {
        let backend = ScriptedBackend::with(&[]);
        let mut pipeline = Pipeline::new(services(Arc::clone(&backend)));

        let err = pipeline.start("2 days in Rome").await.expect_err("intent fails");
        assert!(err.to_string().starts_with("Sorry"));
        match &err {
            VoyageError::Pipeline { stage, source, .. } => {
                assert_eq!(*stage, Stage::Intent);
                assert!(matches!(**source, VoyageError::RetriesExhausted { .. }));
            }
            other => panic!("Expected pipeline error, got {other:?}"),
        }
        assert!(matches!(
            pipeline.state(),
            PipelineState::Failed {
                stage: Stage::Intent,
                ..
            }
        ));
        assert_eq!(backend.calls(), 3);

        backend
            .replies
            .lock()
            .extend([INTENT_SURE, DISCOVERY_SURE, OPTIMIZED].map(str::to_string));
        let state = pipeline.start("2 days in Rome").await.expect("second try");
        assert_eq!(*state, PipelineState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_clears_context() {
        let backend = ScriptedBackend::with(&[INTENT_UNSURE]);
        let mut pipeline = Pipeline::new(services(backend));

        pipeline.start("Rome sometime").await.expect("paused");
        pipeline.cancel().expect("cancel");

        assert_eq!(*pipeline.state(), PipelineState::Cancelled);
        assert_eq!(*pipeline.context(), PlanContext::default());
        assert!(pipeline.confirm().await.is_err());
        assert!(pipeline.cancel().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refine_replaces_itinerary() {
        let backend = ScriptedBackend::with(&[INTENT_SURE, DISCOVERY_SURE, OPTIMIZED, REFINED]);
        let mut pipeline = Pipeline::new(services(backend));
        pipeline.start("2 days in Rome").await.expect("plan");

        let refined = pipeline.refine(0, "slower pace").await.expect("refine");
        assert_eq!(refined.title, "Slow Rome");
        assert_eq!(*pipeline.state(), PipelineState::Complete);
        let result = pipeline.context().result.as_ref().expect("result");
        assert_eq!(result.itineraries[0].title, "Slow Rome");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refine_failure_leaves_plan_untouched() {
        let backend = ScriptedBackend::with(&[INTENT_SURE, DISCOVERY_SURE, OPTIMIZED]);
        let mut pipeline = Pipeline::new(services(backend));
        pipeline.start("2 days in Rome").await.expect("plan");
        let before = pipeline.context().clone();

        let err = pipeline.refine(0, "add a cooking class").await.expect_err("remote down");
        assert!(err.client_may_retry());
        assert_eq!(*pipeline.state(), PipelineState::Complete);
        assert_eq!(*pipeline.context(), before);

        let err = pipeline.refine(7, "anything").await.expect_err("bad index");
        assert_eq!(err.error_code(), "invalid_itinerary_index");
        assert_eq!(*pipeline.state(), PipelineState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intent_results_are_cached_by_query() {
        let backend = ScriptedBackend::with(&[
            INTENT_SURE,
            DISCOVERY_SURE,
            OPTIMIZED,
            OPTIMIZED,
        ]);
        let services = services(Arc::clone(&backend));

        let mut first = Pipeline::new(Arc::clone(&services));
        first.start("2 days in Rome").await.expect("plan");
        assert_eq!(backend.calls(), 3);

        let mut second = Pipeline::new(services);
        second.start("  2 Days in ROME ").await.expect("plan");
        // intent and discovery come from the caches
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_trip_is_retried_not_planned() {
        const INTENT_HUGE: &str = r#"{"destination":"Rome","durationDays":4000000000,
            "confidenceScore":0.95,"assumptions":[]}"#;
        let backend =
            ScriptedBackend::with(&[INTENT_HUGE, INTENT_SURE, DISCOVERY_SURE, OPTIMIZED]);
        let mut pipeline = Pipeline::new(services(Arc::clone(&backend)));

        let state = pipeline.start("a very long trip to Rome").await.expect("plan");
        assert_eq!(*state, PipelineState::Complete);
        assert_eq!(backend.calls(), 4);
        let intent = pipeline.context().intent.as_ref().expect("intent");
        assert_eq!(intent.duration_days, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_stage_leaves_running() {
        let backend = ScriptedBackend::with(&[]);
        let mut pipeline = Pipeline::new(services(backend));
        pipeline.apply(PipelineEvent::Start).expect("start");

        pipeline.interrupt();
        assert!(matches!(
            pipeline.state(),
            PipelineState::Failed {
                stage: Stage::Intent,
                ..
            }
        ));
        assert!(pipeline.state().accepts_start());

        // settled sessions are left alone
        pipeline.interrupt();
        assert!(matches!(pipeline.state(), PipelineState::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_refine_keeps_plan() {
        let backend = ScriptedBackend::with(&[INTENT_SURE, DISCOVERY_SURE, OPTIMIZED]);
        let mut pipeline = Pipeline::new(services(backend));
        pipeline.start("2 days in Rome").await.expect("plan");
        pipeline.apply(PipelineEvent::Refine).expect("refine");

        pipeline.interrupt();
        assert_eq!(*pipeline.state(), PipelineState::Complete);
        assert!(pipeline.context().result.is_some());
    }

    #[test]
    fn test_snapshot_serializes_state_and_results() {
        let backend = ScriptedBackend::with(&[]);
        let pipeline = Pipeline::new(services(backend));
        let json = serde_json::to_value(pipeline.snapshot()).expect("serialize");
        assert_eq!(json["state"]["status"], "idle");
        assert!(json["intent"].is_null());
    }
}
