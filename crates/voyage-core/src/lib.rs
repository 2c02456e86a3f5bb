//! # Voyage Core
//!
//! Shared building blocks for the itinerary gateway:
//! - Error taxonomy with HTTP status mapping
//! - Remote model request/response types and the backend trait
//! - Stage payloads exchanged by the planning pipeline

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod model;
pub mod plan;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub use backend::ModelBackend;
pub use error::{ApiErrorBody, ApiErrorResponse, VoyageError, VoyageResult};
pub use model::{GenerateRequest, GenerateResponse, ModelId};
pub use plan::{
    Assessed, Budget, Candidate, DayPlan, DiscoveryResult, IntentResult, Itinerary, Location,
    OptimizationResult, Stage, StageOutput, MAX_TRIP_DAYS,
};

/// Stable 64-bit hash of some content, for cache keys and log correlation
#[must_use]
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
