//! Custom Axum extractors for the gateway.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{request::Parts, Extensions, HeaderMap},
};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tracing::{debug, warn};
use voyage_core::VoyageError;

use crate::{error::ApiError, state::AppState};

/// Client address used as the rate limit key.
///
/// The peer address is used unless `trust_proxy` is set, in which case
/// proxy headers win. Requests with no usable address share the `unknown`
/// bucket.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    headers
                        .get("x-real-ip")
                        .and_then(|v| v.to_str().ok())
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                })
        })
        .flatten();

    forwarded
        .map(String::from)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Proof that the request carried the configured `x-admin-token`
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

/// Compare without exiting early on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl FromRequestParts<AppState> for AdminToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_ref() else {
            warn!("Admin request rejected: no admin token configured");
            return Err(ApiError::unauthorized("Admin endpoints are disabled"));
        };

        let provided = parts
            .headers
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing x-admin-token header"))?;

        if constant_time_eq(provided.as_bytes(), expected.expose_secret().as_bytes()) {
            Ok(Self)
        } else {
            warn!("Admin request rejected: invalid token");
            Err(ApiError::unauthorized("Invalid admin token"))
        }
    }
}

/// JSON body extractor that reports parse failures as validation errors
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError {
                // keeps 413 when the streamed body exceeds the limit
                status: e.status(),
                error: VoyageError::validation(
                    format!("Failed to read request body: {}", e.body_text()),
                    None,
                    "invalid_body",
                ),
            })?;

        let value: T = serde_json::from_slice(&bytes).map_err(|e| {
            debug!(error = %e, "JSON parse error");
            ApiError::bad_request(format!("Invalid JSON: {e}"), None, "invalid_json")
        })?;

        Ok(Self(value))
    }
}
