//! Route definitions for the gateway.

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};

use crate::{
    handlers,
    middleware::{
        cors_layer, global_rate_limit, json_body_middleware, logging_middleware,
        metrics_middleware, model_rate_limit, request_id_middleware, security_headers_middleware,
    },
    state::AppState,
};

/// Create the main router.
///
/// Every `/api` route passes the global limiter. Routes that reach the
/// remote model also pass the model limiter, and routes with a body are
/// checked for a JSON content type and size first.
pub fn create_router(state: AppState) -> Router {
    let json_body = from_fn_with_state(state.clone(), json_body_middleware);
    let model_limit = from_fn_with_state(state.clone(), model_rate_limit);

    // model limiter runs before the body checks
    let model_with_body = Router::new()
        .route("/gemini/generate", post(handlers::generate))
        .route("/plans", post(handlers::create_plan))
        .route("/plans/:id/refine", post(handlers::refine_plan))
        .route_layer(json_body.clone())
        .route_layer(model_limit.clone());

    let model_only = Router::new()
        .route("/plans/:id/confirm", post(handlers::confirm_plan))
        .route_layer(model_limit);

    let admin = Router::new()
        .route("/admin/rate-limit/reset", post(handlers::reset_rate_limit))
        .route_layer(json_body);

    let api = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics_json))
        .route("/plans/:id", get(handlers::get_plan))
        .route("/plans/:id/cancel", post(handlers::cancel_plan))
        .merge(model_with_body)
        .merge(model_only)
        .merge(admin)
        .layer(from_fn_with_state(state.clone(), global_rate_limit));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/metrics", get(handlers::metrics_prometheus));

    if state.config.server.cors.enabled {
        router = router.layer(cors_layer(&state.config.server.cors));
    }

    router
        .layer(from_fn_with_state(state.clone(), metrics_middleware))
        .layer(DefaultBodyLimit::max(state.config.server.max_request_body_size))
        // planning runs in session tasks that outlive this deadline
        .layer(TimeoutLayer::new(state.config.server.request_timeout))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(logging_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
