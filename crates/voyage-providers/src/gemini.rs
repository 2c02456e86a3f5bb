//! Google Gemini `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};
use voyage_core::{GenerateRequest, GenerateResponse, ModelBackend, VoyageError};

/// Gemini client configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Dependency ID used for breakers, logs and metrics
    pub id: String,
    /// API key
    pub api_key: SecretString,
    /// Base URL (default: https://generativelanguage.googleapis.com)
    pub base_url: String,
    /// Transport timeout; per-stage deadlines are enforced above this client
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Create a new Gemini configuration
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            id: "gemini".to_string(),
            api_key: SecretString::new(api_key.into()),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Gemini model backend
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: GeminiConfig) -> Result<Self, VoyageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| VoyageError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

/// Request body of `generateContent`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
}

impl GeminiRequest {
    fn from_generate(request: &GenerateRequest) -> Self {
        let contents = match &request.contents {
            Value::String(text) => json!([{ "role": "user", "parts": [{ "text": text }] }]),
            Value::Array(_) => request.contents.clone(),
            other => json!([other]),
        };

        Self {
            contents,
            generation_config: request.config.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        Some(text)
    }
}

/// Pull the human-readable message out of a Gemini error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<GeminiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// Map a failed send into a provider error
///
/// Only a request that could not be built or followed is final. Timeouts,
/// refused connections, resets and body errors are all worth another attempt.
fn transport_error(provider: &str, e: &reqwest::Error) -> VoyageError {
    let retryable = !(e.is_builder() || e.is_redirect());
    VoyageError::provider(provider, format!("Request failed: {e}"), None, retryable)
}

#[async_trait]
impl ModelBackend for GeminiClient {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, VoyageError> {
        if !self.is_configured() {
            return Err(VoyageError::configuration("GEMINI_API_KEY is not configured"));
        }

        debug!(
            provider = %self.config.id,
            model = %request.model,
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.generate_url(request.model.as_str()))
            .header("x-goog-api-key", self.config.api_key.expose_secret())
            .json(&GeminiRequest::from_generate(request))
            .send()
            .await
            .map_err(|e| transport_error(&self.config.id, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() >= 500 || status.as_u16() == 429;

            error!(
                provider = %self.config.id,
                status = %status,
                error = %error_body,
                "Gemini API error"
            );

            return Err(VoyageError::provider(
                &self.config.id,
                error_message(&error_body),
                Some(status.as_u16()),
                retryable,
            ));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            VoyageError::provider(
                &self.config.id,
                format!("Failed to parse response: {e}"),
                None,
                true,
            )
        })?;

        let block_reason = gemini_response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone());

        match gemini_response.into_text() {
            Some(text) => Ok(GenerateResponse { text }),
            None => Err(VoyageError::provider(
                &self.config.id,
                match block_reason {
                    Some(reason) => format!("Prompt blocked: {reason}"),
                    None => "No candidates returned".to_string(),
                },
                None,
                false,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voyage_core::ModelId;

    #[test]
    fn test_string_contents_wrapped_as_user_turn() {
        let request = GenerateRequest::text(ModelId::Gemini25Flash, "Plan 3 days in Paris")
            .json_output();
        let body = serde_json::to_value(GeminiRequest::from_generate(&request)).expect("json");

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Plan 3 days in Paris");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_structured_contents_passed_through() {
        let contents = json!([{ "role": "user", "parts": [{ "text": "hi" }] }]);
        let request = GenerateRequest {
            model: ModelId::Gemini25Pro,
            contents: contents.clone(),
            config: None,
        };
        let body = serde_json::to_value(GeminiRequest::from_generate(&request)).expect("json");

        assert_eq!(body["contents"], contents);
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_text_concatenates_parts_of_first_candidate() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .expect("parse");

        assert_eq!(response.into_text().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "API key not valid.");
        assert_eq!(error_message("upstream connect error"), "upstream connect error");
    }

    #[test]
    fn test_builder_errors_are_final() {
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .expect_err("invalid url");
        assert!(err.is_builder());
        assert!(!transport_error("gemini", &err).is_retryable());
    }

    #[tokio::test]
    async fn test_connection_failures_are_retryable() {
        // nothing listens on the discard port
        let client = reqwest::Client::builder().no_proxy().build().expect("client");
        let err = client
            .post("http://127.0.0.1:9/v1beta/models/x:generateContent")
            .send()
            .await
            .expect_err("connection refused");
        let mapped = transport_error("gemini", &err);

        assert!(mapped.is_retryable());
        assert!(mapped.to_string().contains("Request failed"));
    }

    #[test]
    fn test_url_and_configuration() {
        let client = GeminiClient::new(GeminiConfig::new("key").with_base_url("http://localhost:9000/"))
            .expect("client");
        assert_eq!(
            client.generate_url("gemini-2.5-flash"),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(client.is_configured());

        let unconfigured = GeminiClient::new(GeminiConfig::new("")).expect("client");
        assert!(!unconfigured.is_configured());
    }
}
