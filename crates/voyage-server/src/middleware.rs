//! HTTP middleware for the gateway.
//!
//! Provides middleware for:
//! - Request ID injection and request logging
//! - Security headers and CORS
//! - Request metrics
//! - JSON body checks (415 / 413)
//! - Token bucket rate limiting with `X-RateLimit-*` headers

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use voyage_config::CorsConfig;
use voyage_core::VoyageError;
use voyage_resilience::{RateLimitDecision, RateLimiter};

use crate::{error::ApiError, extractors::client_ip, state::AppState};

/// Header carrying the bucket capacity
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the tokens left
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the RFC 3339 reset time
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Create CORS middleware layer
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-admin-token"),
        ])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static(RATE_LIMIT_LIMIT),
            HeaderName::from_static(RATE_LIMIT_REMAINING),
            HeaderName::from_static(RATE_LIMIT_RESET),
        ])
        .max_age(Duration::from_secs(config.max_age))
}

/// Request ID extension for sharing across handlers
#[derive(Clone, Debug)]
pub struct RequestIdExt(pub String);

/// Request ID middleware - adds request ID to request and response
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    request
        .extensions_mut()
        .insert(RequestIdExt(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestIdExt>()
        .map_or_else(|| "unknown".to_string(), |r| r.0.clone());

    let span = info_span!(
        "http_request",
        method = %method,
        uri = %uri,
        request_id = %request_id,
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis(),
        request_id = %request_id,
        "Request completed"
    );

    response
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    response
}

/// Request counter and latency middleware.
///
/// Labels use the route template, not the raw path, so session ids do not
/// create new series.
pub async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    state.metrics.record_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}

/// Reject bodies that are not JSON (415) or declare more than the configured
/// maximum (413)
pub async fn json_body_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = check_json_body(request.headers(), state.config.server.max_request_body_size) {
        return ApiError::from(e).into_response();
    }
    next.run(request).await
}

fn check_json_body(headers: &HeaderMap, max_size: usize) -> Result<(), VoyageError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_json = content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Err(VoyageError::UnsupportedMediaType {
            content_type: if content_type.is_empty() {
                "none".to_string()
            } else {
                content_type.to_string()
            },
        });
    }

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(size) = declared {
        if size > max_size {
            return Err(VoyageError::PayloadTooLarge {
                size,
                limit: max_size,
            });
        }
    }

    Ok(())
}

/// Global limiter on every `/api` route, keyed by client IP
pub async fn global_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit(&state, &state.global_limiter, request, next).await
}

/// Limiter on routes that call the remote model, keyed by client IP
pub async fn model_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    rate_limit(&state, &state.gemini_limiter, request, next).await
}

async fn rate_limit(
    state: &AppState,
    limiter: &RateLimiter,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let key = client_ip(
        request.headers(),
        request.extensions(),
        state.config.server.trust_proxy,
    );
    let decision = limiter.check_limit(&key);

    let mut response = match decision.into_result() {
        Ok(_) => next.run(request).await,
        Err(e) => {
            warn!(limiter = %limiter.id(), client = %key, "Request rejected by rate limiter");
            state.metrics.record_rate_limit_rejection(limiter.id());
            ApiError::from(e).into_response()
        }
    };

    // an inner limiter has already described the tighter bucket
    if !response.headers().contains_key(RATE_LIMIT_LIMIT) || !decision.allowed {
        apply_rate_limit_headers(response.headers_mut(), &decision);
    }
    response
}

/// Set `X-RateLimit-*` headers for a decision
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    let reset_at = chrono::Utc::now()
        + chrono::Duration::from_std(decision.reset_in).unwrap_or_else(|_| chrono::Duration::zero());

    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Ok(value) = HeaderValue::from_str(&reset_at.to_rfc3339()) {
        headers.insert(RATE_LIMIT_RESET, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "OK"
    }

    #[tokio::test]
    async fn test_request_id_generation_and_passthrough() {
        let app = Router::new()
            .route("/", get(ok_handler))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert!(response.headers().contains_key("x-request-id"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "test-id-123")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("test-id-123")
        );
    }

    #[tokio::test]
    async fn test_security_headers() {
        let app = Router::new()
            .route("/", get(ok_handler))
            .layer(axum::middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(
            response.headers().get("x-content-type-options").and_then(|v| v.to_str().ok()),
            Some("nosniff")
        );
        assert!(response.headers().contains_key("x-frame-options"));
    }

    #[test]
    fn test_check_json_body() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            check_json_body(&headers, 100),
            Err(VoyageError::UnsupportedMediaType { .. })
        ));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(matches!(
            check_json_body(&headers, 100),
            Err(VoyageError::UnsupportedMediaType { .. })
        ));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(check_json_body(&headers, 100).is_ok());

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("101"));
        assert!(matches!(
            check_json_body(&headers, 100),
            Err(VoyageError::PayloadTooLarge { size: 101, limit: 100 })
        ));
    }

    #[test]
    fn test_rate_limit_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            remaining: 4,
            limit: 10,
            reset_in: Duration::from_secs(30),
        };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &decision);

        assert_eq!(headers.get(RATE_LIMIT_LIMIT).and_then(|v| v.to_str().ok()), Some("10"));
        assert_eq!(headers.get(RATE_LIMIT_REMAINING).and_then(|v| v.to_str().ok()), Some("4"));
        let reset = headers
            .get(RATE_LIMIT_RESET)
            .and_then(|v| v.to_str().ok())
            .expect("reset header");
        assert!(chrono::DateTime::parse_from_rfc3339(reset).is_ok());
    }
}
