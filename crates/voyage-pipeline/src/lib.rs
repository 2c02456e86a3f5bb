//! # Voyage Pipeline
//!
//! Orchestrates the planning stages Intent → Discovery → Optimization, plus
//! Refine on a finished plan. Low-confidence results pause the session until
//! the user confirms them, and a failed optimization falls back to a
//! deterministic itinerary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod fallback;
pub mod pipeline;
pub mod prompts;
pub mod state;

pub use fallback::{build_itinerary, FALLBACK_ASSUMPTION, FALLBACK_CONFIDENCE};
pub use pipeline::{Pipeline, PipelineServices, PlanContext, PlanSnapshot, StagePolicies};
pub use state::{needs_confirmation, PipelineEvent, PipelineState, CONFIDENCE_THRESHOLD};
