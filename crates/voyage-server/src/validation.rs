//! Request body validation and sanitization.
//!
//! Text that ends up in a prompt has control characters stripped (newlines
//! and tabs are kept) and surrounding whitespace trimmed.

use serde::Deserialize;
use serde_json::Value;
use voyage_core::{GenerateRequest, ModelId, VoyageError};

/// Raw body of `POST /api/gemini/generate`
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    /// Model name
    pub model: Option<String>,
    /// Prompt text or structured contents
    pub contents: Option<Value>,
    /// Generation options
    pub config: Option<Value>,
}

/// Body of `POST /api/plans`
#[derive(Debug, Deserialize)]
pub struct PlanBody {
    /// Free-form travel request
    pub query: String,
}

/// Body of `POST /api/plans/{id}/refine`
#[derive(Debug, Deserialize)]
pub struct RefineBody {
    /// Which itinerary of the plan to change
    #[serde(alias = "itineraryIndex")]
    pub itinerary_index: usize,
    /// What to change
    pub instruction: String,
}

/// Limiter named in an admin reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterKind {
    /// The `/api` limiter
    Global,
    /// The remote model limiter
    Gemini,
}

/// Body of `POST /api/admin/rate-limit/reset`
#[derive(Debug, Deserialize)]
pub struct RateLimitResetBody {
    /// Client address whose bucket is cleared
    pub ip: String,
    /// Limiter to reset
    pub limiter: LimiterKind,
}

/// Strip control characters other than newline and tab, then trim
#[must_use]
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Apply [`sanitize_text`] to every string inside a JSON value
#[must_use]
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Validate a generate body and turn it into a request
///
/// # Errors
/// Returns `Validation` if the model is missing or unknown, the contents are
/// missing or empty, or the serialized contents exceed `max_contents_size`
pub fn validate_generate(
    body: GenerateBody,
    max_contents_size: usize,
) -> Result<GenerateRequest, VoyageError> {
    let model: ModelId = match body.model.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(VoyageError::validation(
                "Model is required",
                Some("model".to_string()),
                "missing_model",
            ))
        }
        Some(name) => name.parse()?,
    };

    let contents = match body.contents {
        None | Some(Value::Null) => None,
        Some(value @ (Value::String(_) | Value::Object(_) | Value::Array(_))) => {
            Some(sanitize_value(value))
        }
        Some(_) => {
            return Err(VoyageError::validation(
                "Contents must be a string or an object",
                Some("contents".to_string()),
                "invalid_contents",
            ))
        }
    };
    let contents = contents
        .filter(|c| !matches!(c, Value::String(s) if s.is_empty()))
        .ok_or_else(|| {
            VoyageError::validation(
                "Contents are required",
                Some("contents".to_string()),
                "missing_contents",
            )
        })?;

    let size = serde_json::to_vec(&contents)
        .map_err(|e| VoyageError::internal(format!("Failed to serialize contents: {e}")))?
        .len();
    if size > max_contents_size {
        return Err(VoyageError::validation(
            format!("Contents too large: {size} bytes exceeds limit of {max_contents_size} bytes"),
            Some("contents".to_string()),
            "contents_too_large",
        ));
    }

    Ok(GenerateRequest {
        model,
        contents,
        config: body.config,
    })
}

/// Sanitize free text and require it to be non-empty and bounded
///
/// # Errors
/// Returns `Validation` naming `field` otherwise
pub fn validate_text(field: &str, input: &str, max_len: usize) -> Result<String, VoyageError> {
    let text = sanitize_text(input);
    if text.is_empty() {
        return Err(VoyageError::validation(
            format!("{field} must not be empty"),
            Some(field.to_string()),
            "missing_field",
        ));
    }
    if text.len() > max_len {
        return Err(VoyageError::validation(
            format!("{field} exceeds {max_len} bytes"),
            Some(field.to_string()),
            "field_too_large",
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> GenerateBody {
        serde_json::from_value(value).expect("body")
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("  3 days\u{0}\u{7} in Rome\n "), "3 days in Rome");
        assert_eq!(sanitize_text("line one\nline\ttwo"), "line one\nline\ttwo");
    }

    #[test]
    fn test_sanitize_nested_value() {
        let cleaned = sanitize_value(json!({"parts": [{"text": " hi\u{1b} "}], "n": 1}));
        assert_eq!(cleaned, json!({"parts": [{"text": "hi"}], "n": 1}));
    }

    #[test]
    fn test_valid_generate() {
        let request = validate_generate(
            body(json!({"model": "gemini-2.5-flash", "contents": "Plan Lisbon", "config": {"temperature": 0.2}})),
            50 * 1024,
        )
        .expect("valid");
        assert_eq!(request.model, ModelId::Gemini25Flash);
        assert_eq!(request.contents, json!("Plan Lisbon"));
        assert!(request.config.is_some());
    }

    #[test]
    fn test_generate_rejections() {
        let missing_model = validate_generate(body(json!({"contents": "x"})), 1024).expect_err("model");
        assert_eq!(missing_model.error_code(), "missing_model");

        let bad_model = validate_generate(body(json!({"model": "gpt-4", "contents": "x"})), 1024)
            .expect_err("enum");
        assert_eq!(bad_model.error_code(), "invalid_model");

        let no_contents =
            validate_generate(body(json!({"model": "gemini-2.5-pro"})), 1024).expect_err("contents");
        assert_eq!(no_contents.error_code(), "missing_contents");

        let blank = validate_generate(body(json!({"model": "gemini-2.5-pro", "contents": " \u{0} "})), 1024)
            .expect_err("blank");
        assert_eq!(blank.error_code(), "missing_contents");

        let number = validate_generate(body(json!({"model": "gemini-2.5-pro", "contents": 5})), 1024)
            .expect_err("number");
        assert_eq!(number.error_code(), "invalid_contents");
    }

    #[test]
    fn test_contents_size_limit() {
        let big = "a".repeat(200);
        let err = validate_generate(body(json!({"model": "gemini-2.5-flash", "contents": big})), 100)
            .expect_err("too large");
        assert_eq!(err.error_code(), "contents_too_large");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_validate_text() {
        assert_eq!(validate_text("query", " Oslo ", 10).expect("ok"), "Oslo");
        assert!(validate_text("query", "   ", 10).is_err());
        assert!(validate_text("query", "far too long", 5).is_err());
    }

    #[test]
    fn test_reset_body() {
        let reset: RateLimitResetBody =
            serde_json::from_value(json!({"ip": "203.0.113.7", "limiter": "gemini"})).expect("body");
        assert_eq!(reset.limiter, LimiterKind::Gemini);
        assert!(serde_json::from_value::<RateLimitResetBody>(json!({"ip": "x", "limiter": "other"})).is_err());
    }
}
