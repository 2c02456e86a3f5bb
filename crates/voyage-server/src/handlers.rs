//! HTTP request handlers for the gateway API.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use voyage_core::{GenerateResponse, VoyageError};
use voyage_pipeline::{Pipeline, PipelineState, PlanSnapshot};
use voyage_resilience::{BucketStats, CacheStats, CircuitBreakerStats, RateLimiter};
use voyage_telemetry::LatencySummary;

use crate::{
    error::ApiError,
    extractors::{AdminToken, JsonBody},
    state::{AppState, PlanAction, PlanOutcome},
    validation::{
        validate_generate, validate_text, GenerateBody, LimiterKind, PlanBody,
        RateLimitResetBody, RefineBody,
    },
};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Seconds since start
    pub uptime_seconds: u64,
    /// Process memory
    pub memory: MemoryUsage,
    /// Whether the remote model has credentials
    pub api_key_configured: bool,
    /// Version
    pub version: &'static str,
}

/// Process memory usage
#[derive(Debug, Serialize)]
pub struct MemoryUsage {
    /// Resident set size; absent if the platform does not report it
    pub rss_bytes: Option<u64>,
}

fn resident_memory() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = sysinfo::System::new();
    sys.refresh_process(pid);
    sys.process(pid).map(sysinfo::Process::memory)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        memory: MemoryUsage {
            rss_bytes: resident_memory(),
        },
        api_key_configured: state.backend.is_configured(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness check endpoint
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

/// Proxy one generation call through cache, breaker and retry
#[instrument(skip(state, body))]
pub async fn generate(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<GenerateBody>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request = validate_generate(body, state.config.server.max_contents_size)?;
    let key = request.cache_key();

    let hit = state.caches.generate.has(&key);
    state.metrics.record_cache_operation("generate", hit);
    debug!(model = %request.model, cache_hit = hit, "Processing generate request");

    let backend = Arc::clone(&state.backend);
    let request = &request;
    let backend = &backend;
    let response = state
        .generate
        .call("generate", Some(key), state.generate_policy, || async move {
            backend.generate(request).await
        })
        .await?;

    Ok(Json(response))
}

/// Snapshot of one limiter
#[derive(Debug, Serialize)]
pub struct LimiterView {
    /// Whether the limiter is active
    pub enabled: bool,
    /// Tracked keys
    pub keys: usize,
    /// Buckets by key
    pub buckets: HashMap<String, BucketStats>,
}

impl From<&RateLimiter> for LimiterView {
    fn from(limiter: &RateLimiter) -> Self {
        Self {
            enabled: limiter.is_enabled(),
            keys: limiter.key_count(),
            buckets: limiter.all_stats(),
        }
    }
}

/// Both limiters
#[derive(Debug, Serialize)]
pub struct RateLimitersView {
    /// `/api` limiter
    pub global: LimiterView,
    /// Remote model limiter
    pub gemini: LimiterView,
}

/// Every cache
#[derive(Debug, Serialize)]
pub struct CachesView {
    /// Generate proxy cache
    pub generate: CacheStats,
    /// Intent cache
    pub intent: CacheStats,
    /// Discovery cache
    pub discovery: CacheStats,
}

/// JSON metrics response
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    /// Requests served
    pub requests: u64,
    /// Responses with status >= 400
    pub errors: u64,
    /// Limiter snapshots
    pub rate_limiters: RateLimitersView,
    /// Remote call latency
    pub remote: LatencySummary,
    /// Breaker guarding the remote model
    pub circuit_breaker: CircuitBreakerStats,
    /// Cache statistics
    pub caches: CachesView,
    /// Live planning sessions
    pub sessions: usize,
}

/// JSON metrics endpoint
pub async fn metrics_json(State(state): State<AppState>) -> Json<MetricsResponse> {
    let snapshot = state.metrics.snapshot();

    Json(MetricsResponse {
        requests: snapshot.requests,
        errors: snapshot.errors,
        rate_limiters: RateLimitersView {
            global: LimiterView::from(state.global_limiter.as_ref()),
            gemini: LimiterView::from(state.gemini_limiter.as_ref()),
        },
        remote: snapshot.remote,
        circuit_breaker: state.breaker.stats(),
        caches: CachesView {
            generate: state.caches.generate.stats(),
            intent: state.caches.intent.stats(),
            discovery: state.caches.discovery.stats(),
        },
        sessions: state.sessions.len(),
    })
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    state
        .metrics
        .update_circuit_breaker(state.breaker.name(), state.breaker.state().as_gauge() as f64);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
}

/// Clear one client's bucket in one limiter
#[instrument(skip(state, body), fields(ip = %body.ip, limiter = ?body.limiter))]
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    _admin: AdminToken,
    JsonBody(body): JsonBody<RateLimitResetBody>,
) -> Result<Json<Value>, ApiError> {
    let ip = body.ip.trim();
    if ip.is_empty() {
        return Err(ApiError::bad_request("ip is required", Some("ip"), "missing_ip"));
    }

    let (name, limiter) = match body.limiter {
        LimiterKind::Global => ("global", &state.global_limiter),
        LimiterKind::Gemini => ("gemini", &state.gemini_limiter),
    };
    let removed = limiter.reset(ip);

    info!(ip = %ip, limiter = name, removed, "Rate limit reset by admin");

    Ok(Json(json!({
        "success": true,
        "ip": ip,
        "limiter": name,
        "removed": removed,
    })))
}

/// A planning session as returned to clients
#[derive(Debug, Serialize)]
pub struct PlanView {
    /// Session id
    pub id: Uuid,
    /// State and results
    #[serde(flatten)]
    pub plan: PlanSnapshot,
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        VoyageError::SessionNotFound {
            id: raw.to_string(),
        }
        .into()
    })
}

/// Respond with the session view; a terminal stage failure keeps the view
/// (its state carries the apology) but uses the failure's status
fn plan_response(
    state: &AppState,
    id: Uuid,
    outcome: PlanOutcome,
    success: StatusCode,
) -> Result<Response, ApiError> {
    let PlanOutcome { result, snapshot } = outcome;
    let status = match result {
        Ok(()) => success,
        Err(e @ VoyageError::Pipeline { .. }) => e.status_code(),
        Err(e) => return Err(e.into()),
    };

    if matches!(snapshot.state, PipelineState::Complete)
        && snapshot
            .context
            .result
            .as_ref()
            .is_some_and(|r| r.fallback_used)
    {
        state.metrics.record_fallback("optimization");
    }

    let view = PlanView { id, plan: snapshot };
    Ok((status, Json(view)).into_response())
}

/// Start a planning session; runs until the plan is complete or a result
/// needs confirmation
#[instrument(skip(state, body))]
pub async fn create_plan(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<PlanBody>,
) -> Result<Response, ApiError> {
    let query = validate_text("query", &body.query, state.config.server.max_contents_size)?;

    let (id, session) = state
        .sessions
        .create(Pipeline::new(Arc::clone(&state.planner)));
    info!(session_id = %id, "Planning session started");

    let outcome = session.run(PlanAction::Start(query)).await?;
    plan_response(&state, id, outcome, StatusCode::CREATED)
}

/// Current view of a session
pub async fn get_plan(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<PlanView>, ApiError> {
    let id = parse_session_id(&raw_id)?;
    let session = state.sessions.get(id)?;
    let pipeline = session.pipeline.lock().await;

    Ok(Json(PlanView {
        id,
        plan: pipeline.snapshot(),
    }))
}

/// Accept the result awaiting review and continue
#[instrument(skip(state))]
pub async fn confirm_plan(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_session_id(&raw_id)?;
    let session = state.sessions.get(id)?;

    let outcome = session.run(PlanAction::Confirm).await?;
    plan_response(&state, id, outcome, StatusCode::OK)
}

/// Abandon a session's plan, stopping any stage still running for it
#[instrument(skip(state))]
pub async fn cancel_plan(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<PlanView>, ApiError> {
    let id = parse_session_id(&raw_id)?;
    let session = state.sessions.get(id)?;

    let aborted = session.abort_planning();
    if aborted > 0 {
        info!(session_id = %id, aborted, "Stopped running planning stages");
    }

    let mut pipeline = session.pipeline.lock().await;
    pipeline.cancel()?;
    Ok(Json(PlanView {
        id,
        plan: pipeline.snapshot(),
    }))
}

/// Apply an instruction to one itinerary of a complete plan
#[instrument(skip(state, body))]
pub async fn refine_plan(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    JsonBody(body): JsonBody<RefineBody>,
) -> Result<Json<PlanView>, ApiError> {
    let id = parse_session_id(&raw_id)?;
    let instruction = validate_text(
        "instruction",
        &body.instruction,
        state.config.server.max_contents_size,
    )?;
    let session = state.sessions.get(id)?;

    let PlanOutcome { result, snapshot } = session
        .run(PlanAction::Refine {
            index: body.itinerary_index,
            instruction,
        })
        .await?;
    result?;
    Ok(Json(PlanView { id, plan: snapshot }))
}
