//! Error types and handling for the planner.
//!
//! This module provides the error hierarchy shared by every crate. Each variant
//! maps to an HTTP status code and carries enough structure for the resilience
//! layer to decide whether another attempt is worthwhile.

use crate::plan::Stage;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `VoyageError`
pub type VoyageResult<T> = Result<T, VoyageError>;

/// Error type covering every failure path of the gateway and the pipeline
#[derive(Debug, Error)]
pub enum VoyageError {
    /// Request validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// Field that failed validation (if applicable)
        field: Option<String>,
        /// Error code for programmatic handling
        code: String,
    },

    /// Request payload too large
    #[error("Request payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Actual size of the payload
        size: usize,
        /// Maximum allowed size
        limit: usize,
    },

    /// Content type other than JSON
    #[error("Unsupported content type: {content_type}")]
    UnsupportedMediaType {
        /// The content type that was sent
        content_type: String,
    },

    /// Administrative authentication failed
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Error message
        message: String,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit {
        /// Duration to wait before retrying
        retry_after: Option<Duration>,
        /// Rate limit that was exceeded
        limit: Option<u32>,
    },

    /// Circuit breaker is open for a dependency
    #[error("Circuit breaker open for dependency: {dependency}")]
    CircuitOpen {
        /// Protected dependency
        dependency: String,
        /// Time until the breaker admits a trial call
        retry_after: Duration,
    },

    /// A single attempt timed out
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which the attempt was abandoned
        duration: Duration,
    },

    /// Remote model returned an error
    #[error("Provider error: {provider} - {message}")]
    Provider {
        /// Provider that returned the error
        provider: String,
        /// Error message
        message: String,
        /// HTTP status code from provider (if applicable)
        status_code: Option<u16>,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Remote model answered but the output could not be parsed
    #[error("Malformed output from {stage} stage: {message}")]
    MalformedOutput {
        /// Stage whose output was malformed
        stage: Stage,
        /// Parser message
        message: String,
    },

    /// All attempts for an operation failed
    #[error("The {operation} service is experiencing high traffic. Please try again in a moment.")]
    RetriesExhausted {
        /// Operation name
        operation: String,
        /// Attempts made, including the first
        attempts: u32,
        /// Error of the last attempt
        #[source]
        source: Box<VoyageError>,
    },

    /// A pipeline stage failed with no fallback available
    #[error("{message}")]
    Pipeline {
        /// Stage that failed
        stage: Stage,
        /// User-presentable message
        message: String,
        /// Underlying cause
        #[source]
        source: Box<VoyageError>,
    },

    /// A pipeline action is not valid in the current state
    #[error("Cannot {action} while pipeline is {state}")]
    InvalidTransition {
        /// Current state name
        state: String,
        /// Attempted action
        action: String,
    },

    /// Planning session does not exist
    #[error("Planning session not found: {id}")]
    SessionNotFound {
        /// Session identifier
        id: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Internal server error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl VoyageError {
    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Provider { status_code, .. } => status_code
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::MalformedOutput { .. } | Self::Pipeline { .. } => StatusCode::BAD_GATEWAY,
            Self::RetriesExhausted { source, .. } => source.status_code(),
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if another attempt at the same operation may succeed.
    ///
    /// This drives the retry executor: only transient remote failures qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::MalformedOutput { .. } => true,
            _ => false,
        }
    }

    /// Check if the caller should be told to try again later
    #[must_use]
    pub fn client_may_retry(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } | Self::RateLimit { .. } | Self::CircuitOpen { .. } => {
                true
            }
            other => other.is_retryable(),
        }
    }

    /// Get the error type string for API responses
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. }
            | Self::PayloadTooLarge { .. }
            | Self::UnsupportedMediaType { .. } => "invalid_request_error",
            Self::Authentication { .. } => "authentication_error",
            Self::RateLimit { .. } => "rate_limit_error",
            Self::CircuitOpen { .. } => "service_unavailable_error",
            Self::Timeout { .. } => "timeout_error",
            Self::Provider { .. } | Self::MalformedOutput { .. } => "provider_error",
            Self::RetriesExhausted { .. } => "retries_exhausted_error",
            Self::Pipeline { .. } => "pipeline_error",
            Self::InvalidTransition { .. } => "conflict_error",
            Self::SessionNotFound { .. } => "not_found_error",
            Self::Configuration { .. } | Self::Internal { .. } => "internal_error",
        }
    }

    /// Get the error code for programmatic handling
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UnsupportedMediaType { .. } => "unsupported_media_type",
            Self::Authentication { .. } => "authentication_failed",
            Self::RateLimit { .. } => "rate_limit_exceeded",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Provider { .. } => "provider_error",
            Self::MalformedOutput { .. } => "malformed_output",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Pipeline { .. } => "pipeline_failed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Walk through wrapping errors to the innermost cause
    #[must_use]
    pub fn root_cause(&self) -> &VoyageError {
        match self {
            Self::RetriesExhausted { source, .. } | Self::Pipeline { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Create a validation error
    #[must_use]
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create an authentication error
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a provider error
    #[must_use]
    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a malformed output error
    #[must_use]
    pub fn malformed_output(stage: Stage, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            stage,
            message: message.into(),
        }
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a circuit open error
    #[must_use]
    pub fn circuit_open(dependency: impl Into<String>, retry_after: Duration) -> Self {
        Self::CircuitOpen {
            dependency: dependency.into(),
            retry_after,
        }
    }

    /// Create a rate limit error
    #[must_use]
    pub fn rate_limit(retry_after: Option<Duration>, limit: Option<u32>) -> Self {
        Self::RateLimit { retry_after, limit }
    }

    /// Create a retries exhausted error wrapping the last failure
    #[must_use]
    pub fn retries_exhausted(operation: impl Into<String>, attempts: u32, last: VoyageError) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Create a terminal pipeline error with an apology for the user
    #[must_use]
    pub fn pipeline(stage: Stage, cause: VoyageError) -> Self {
        Self::Pipeline {
            stage,
            message: stage.apology().to_string(),
            source: Box::new(cause),
        }
    }

    /// Create an invalid transition error
    #[must_use]
    pub fn invalid_transition(state: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            state: state.into(),
            action: action.into(),
        }
    }
}

/// API error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details
    pub error: ApiErrorBody,
}

/// API error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message
    pub message: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Parameter that caused the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Whether the client may try again later
    pub retryable: bool,
}

impl From<&VoyageError> for ApiErrorResponse {
    fn from(err: &VoyageError) -> Self {
        let param = match err {
            VoyageError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        Self {
            error: ApiErrorBody {
                error_type: err.error_type().to_string(),
                message: err.to_string(),
                code: Some(err.error_code().to_string()),
                param,
                retryable: err.client_may_retry(),
            },
        }
    }
}

impl fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            VoyageError::validation("test", None, "test_code").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            VoyageError::PayloadTooLarge { size: 10, limit: 5 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            VoyageError::UnsupportedMediaType {
                content_type: "text/plain".to_string()
            }
            .status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            VoyageError::rate_limit(None, None).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            VoyageError::circuit_open("gemini", Duration::from_secs(5)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            VoyageError::timeout("intent", Duration::from_secs(30)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(!VoyageError::validation("test", None, "test").is_retryable());
        assert!(!VoyageError::rate_limit(None, None).is_retryable());
        assert!(!VoyageError::circuit_open("gemini", Duration::ZERO).is_retryable());
        assert!(VoyageError::timeout("intent", Duration::from_secs(30)).is_retryable());
        assert!(VoyageError::provider("gemini", "error", Some(503), true).is_retryable());
        assert!(!VoyageError::provider("gemini", "error", Some(400), false).is_retryable());
        assert!(VoyageError::malformed_output(Stage::Intent, "not json").is_retryable());
    }

    #[test]
    fn test_retries_exhausted_keeps_remote_status() {
        let last = VoyageError::provider("gemini", "quota exceeded", Some(429), true);
        let err = VoyageError::retries_exhausted("discovery", 3, last);

        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.to_string().contains("discovery"));
        assert!(err.to_string().contains("high traffic"));
        assert!(err.client_may_retry());
        assert!(!err.is_retryable());
        assert!(matches!(err.root_cause(), VoyageError::Provider { .. }));
    }

    #[test]
    fn test_pipeline_error_is_apology() {
        let cause = VoyageError::retries_exhausted(
            "intent",
            3,
            VoyageError::malformed_output(Stage::Intent, "expected value at line 1"),
        );
        let err = VoyageError::pipeline(Stage::Intent, cause);

        assert!(err.to_string().starts_with("Sorry"));
        assert!(!err.to_string().contains("line 1"));
        assert!(matches!(err.root_cause(), VoyageError::MalformedOutput { .. }));
    }

    #[test]
    fn test_api_error_response() {
        let err = VoyageError::validation(
            "model is required",
            Some("model".to_string()),
            "missing_model",
        );
        let response = ApiErrorResponse::from(&err);

        assert_eq!(response.error.error_type, "invalid_request_error");
        assert_eq!(response.error.param, Some("model".to_string()));
        assert_eq!(response.error.code, Some("missing_model".to_string()));
        assert!(!response.error.retryable);
    }
}
