//! Remote model request and response types.

use crate::error::VoyageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Models the gateway is allowed to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelId {
    /// Fast general-purpose model
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    Gemini25Flash,
    /// Higher quality, slower model
    #[serde(rename = "gemini-2.5-pro")]
    Gemini25Pro,
    /// Previous generation fast model
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
}

impl ModelId {
    /// Every accepted model
    pub const ALL: [Self; 3] = [Self::Gemini25Flash, Self::Gemini25Pro, Self::Gemini20Flash];

    /// Wire name of the model
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini25Flash => "gemini-2.5-flash",
            Self::Gemini25Pro => "gemini-2.5-pro",
            Self::Gemini20Flash => "gemini-2.0-flash",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = VoyageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                VoyageError::validation(
                    format!("Unknown model '{s}'. Allowed models: {}", allowed.join(", ")),
                    Some("model".to_string()),
                    "invalid_model",
                )
            })
    }
}

/// A single generation call against the remote model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model to call
    pub model: ModelId,
    /// Prompt: either a plain string or the provider's structured contents
    pub contents: Value,
    /// Generation options passed through to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl GenerateRequest {
    /// Plain-text prompt for the given model
    #[must_use]
    pub fn text(model: ModelId, prompt: impl Into<String>) -> Self {
        Self {
            model,
            contents: Value::String(prompt.into()),
            config: None,
        }
    }

    /// Attach generation options
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Ask the model to answer with JSON only
    #[must_use]
    pub fn json_output(self) -> Self {
        self.with_config(serde_json::json!({ "responseMimeType": "application/json" }))
    }

    /// Deterministic key for caching identical calls
    #[must_use]
    pub fn cache_key(&self) -> String {
        let config = self
            .config
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        format!(
            "{}:{:016x}",
            self.model,
            crate::content_hash(&format!("{}|{}", self.contents, config))
        )
    }
}

/// Text produced by the remote model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Concatenated text parts of the first candidate
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_parsing() {
        assert_eq!(
            "gemini-2.5-flash".parse::<ModelId>().expect("known model"),
            ModelId::Gemini25Flash
        );

        let err = "gpt-4o".parse::<ModelId>().expect_err("unknown model");
        assert_eq!(err.error_code(), "invalid_model");
    }

    #[test]
    fn test_request_deserializes_string_contents() {
        let request: GenerateRequest =
            serde_json::from_str(r#"{"model":"gemini-2.5-pro","contents":"Plan a trip"}"#)
                .expect("parse request");

        assert_eq!(request.model, ModelId::Gemini25Pro);
        assert_eq!(request.contents, Value::String("Plan a trip".to_string()));
        assert!(request.config.is_none());
    }

    #[test]
    fn test_cache_key_stability() {
        let a = GenerateRequest::text(ModelId::Gemini25Flash, "Hello").json_output();
        let b = GenerateRequest::text(ModelId::Gemini25Flash, "Hello").json_output();
        let c = GenerateRequest::text(ModelId::Gemini25Flash, "Hello");

        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }
}
