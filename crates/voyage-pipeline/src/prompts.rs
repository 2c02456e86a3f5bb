//! Stage prompts and model output parsing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use voyage_core::{DiscoveryResult, IntentResult, Itinerary, Stage, StageOutput, VoyageError};

fn to_json(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Prompt turning a free-form request into an intent
#[must_use]
pub fn intent_prompt(query: &str) -> String {
    format!(
        "Extract the travel intent from the request below. Answer with JSON: \
         {{\"destination\", \"durationDays\", \"budget\": {{\"amount\", \"currency\"}}, \
         \"travelers\", \"interests\", \"pace\", \"confidenceScore\" (0 to 1), \
         \"assumptions\" (list anything you had to guess)}}.\n\nRequest: {query}"
    )
}

/// Prompt asking for candidate activities and dining
#[must_use]
pub fn discovery_prompt(intent: &IntentResult) -> String {
    format!(
        "Suggest activities and dining for this trip. Answer with JSON: \
         {{\"activities\": [...], \"dining\": [...], \"confidenceScore\", \"assumptions\"}} \
         where each entry has \"id\", \"name\", \"category\", \"estimatedCost\", \
         \"durationMinutes\", \"location\": {{\"lat\", \"lng\"}}, \"description\".\n\n\
         Trip: {}",
        to_json(intent)
    )
}

/// Prompt arranging candidates into itineraries
#[must_use]
pub fn optimization_prompt(intent: &IntentResult, discovery: &DiscoveryResult) -> String {
    format!(
        "Arrange the candidates into day-by-day itineraries within budget, grouping nearby \
         places. Answer with JSON: {{\"itineraries\": [{{\"title\", \"summary\", \
         \"days\": [{{\"day\", \"morning\", \"afternoon\", \"evening\"}}], \"totalCost\", \
         \"currency\", \"confidenceScore\", \"assumptions\"}}]}}.\n\n\
         Trip: {}\n\nCandidates: {}",
        to_json(intent),
        to_json(discovery)
    )
}

/// Prompt applying an instruction to one itinerary
#[must_use]
pub fn refine_prompt(itinerary: &Itinerary, instruction: &str) -> String {
    format!(
        "Apply the instruction to the itinerary and return the full updated itinerary as JSON \
         with the same shape.\n\nInstruction: {instruction}\n\nItinerary: {}",
        to_json(itinerary)
    )
}

/// Strip a Markdown code fence the model may wrap around its JSON
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.strip_prefix("json").unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a stage's JSON output
///
/// # Errors
/// Returns `VoyageError::MalformedOutput` if the text is not the expected JSON
pub fn parse_output<T: DeserializeOwned + StageOutput>(
    stage: Stage,
    text: &str,
) -> Result<T, VoyageError> {
    let output: T = serde_json::from_str(strip_fence(text))
        .map_err(|e| VoyageError::malformed_output(stage, e.to_string()))?;
    output
        .check()
        .map_err(|reason| VoyageError::malformed_output(stage, reason))?;
    Ok(output)
}
