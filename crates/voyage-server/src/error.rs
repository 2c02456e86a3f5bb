//! API error handling.
//!
//! Every handler returns [`ApiError`], built from a [`VoyageError`]. Errors
//! use the structured `{"error": {...}}` body; rate limit rejections use the
//! flat `{error, message, retryAfter}` body clients already parse.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};
use voyage_core::{ApiErrorResponse, VoyageError};

/// Body of a 429 response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitBody {
    /// Short error name
    pub error: String,
    /// Human-readable message
    pub message: String,
    /// Seconds until a request may succeed
    pub retry_after: u64,
}

/// API error wrapper
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    pub status: StatusCode,
    /// The underlying error
    pub error: VoyageError,
}

impl ApiError {
    /// Bad request error
    pub fn bad_request(message: impl Into<String>, field: Option<&str>, code: &str) -> Self {
        VoyageError::validation(message, field.map(String::from), code).into()
    }

    /// Unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        VoyageError::authentication(message).into()
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        VoyageError::internal(message).into()
    }

    /// Message shown to the client.
    ///
    /// Remote failures pass the remote's own message through; pipeline
    /// failures show their apology.
    fn client_message(&self) -> String {
        match &self.error {
            VoyageError::Pipeline { message, .. } => message.clone(),
            VoyageError::RetriesExhausted { source, .. } => match source.root_cause() {
                VoyageError::Provider {
                    message,
                    status_code: Some(_),
                    ..
                } => message.clone(),
                _ => self.error.to_string(),
            },
            VoyageError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<VoyageError> for ApiError {
    fn from(error: VoyageError) -> Self {
        Self {
            status: error.status_code(),
            error,
        }
    }
}

fn retry_after_secs(retry_after: Option<Duration>) -> u64 {
    retry_after.map_or(1, |d| d.as_secs_f64().ceil().max(1.0) as u64)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.client_message();

        if let VoyageError::RateLimit { retry_after, .. } = &self.error {
            let retry_after = retry_after_secs(*retry_after);
            warn!(retry_after, "Rate limit exceeded");

            let body = RateLimitBody {
                error: "Too Many Requests".to_string(),
                message: format!("Rate limit exceeded. Try again in {retry_after} seconds."),
                retry_after,
            };
            let mut response = (self.status, Json(body)).into_response();
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(retry_after));
            return response;
        }

        if self.status.is_server_error() {
            error!(
                status = %self.status,
                error = %self.error,
                cause = %self.error.root_cause(),
                "API error response"
            );
        } else {
            warn!(status = %self.status, error = %self.error, "API error response");
        }

        let mut body = ApiErrorResponse::from(&self.error);
        body.error.message = message;

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voyage_core::Stage;

    #[test]
    fn test_validation_error() {
        let err = ApiError::bad_request("Model is required", Some("model"), "missing_model");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.client_message(), "Validation error: Model is required");
    }

    #[test]
    fn test_remote_status_and_message_pass_through() {
        let remote = VoyageError::provider("gemini", "API key not valid.", Some(400), false);
        let err = ApiError::from(remote);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.client_message(), "API key not valid.");

        let exhausted = VoyageError::retries_exhausted(
            "generate",
            3,
            VoyageError::provider("gemini", "overloaded", Some(503), true),
        );
        let err = ApiError::from(exhausted);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.client_message(), "overloaded");
    }

    #[test]
    fn test_pipeline_error_shows_apology() {
        let err = ApiError::from(VoyageError::pipeline(
            Stage::Intent,
            VoyageError::timeout("intent", Duration::from_secs(30)),
        ));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.client_message(), Stage::Intent.apology());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Some(Duration::from_millis(5400))), 6);
        assert_eq!(retry_after_secs(Some(Duration::ZERO)), 1);
        assert_eq!(retry_after_secs(None), 1);
    }
}
