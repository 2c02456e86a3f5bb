//! Stage payloads exchanged between the planning stages.
//!
//! The payloads are produced by the remote model as JSON. Only the confidence
//! score and the assumptions influence pipeline control flow; the remaining
//! fields are carried through untouched, except for the fallback generator
//! which needs the discovered candidates and the trip length.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Planning stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Parse the free-form request into structured intent
    Intent,
    /// Find candidate activities and dining
    Discovery,
    /// Arrange candidates into day-by-day itineraries
    Optimization,
    /// Apply a follow-up instruction to one itinerary
    Refine,
}

impl Stage {
    /// Stable name used for logging, metrics and cache namespaces
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Discovery => "discovery",
            Self::Optimization => "optimization",
            Self::Refine => "refine",
        }
    }

    /// Message shown to the user when this stage fails for good
    #[must_use]
    pub fn apology(self) -> &'static str {
        match self {
            Self::Intent => {
                "Sorry, I couldn't understand that travel request right now. \
                 Could you rephrase it or try again in a moment?"
            }
            Self::Discovery => {
                "Sorry, I couldn't find places to visit for this trip right now. \
                 Please try again in a moment."
            }
            Self::Optimization => {
                "Sorry, I couldn't build an itinerary right now. Please try again in a moment."
            }
            Self::Refine => {
                "Sorry, I couldn't apply that change to your itinerary. Please try again."
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest trip, in days, the planner will lay out
pub const MAX_TRIP_DAYS: u32 = 60;

/// Bounds a parsed stage output must satisfy before the pipeline uses it
pub trait StageOutput {
    /// Describe the first violated bound
    ///
    /// # Errors
    /// Returns a human-readable reason when the output is out of range
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Output that carries a self-reported confidence
pub trait Assessed {
    /// Confidence in `[0, 1]` that no human review is needed
    fn confidence_score(&self) -> f64;

    /// Assumptions the model made while producing the output
    fn assumptions(&self) -> &[String];
}

/// Trip budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Total amount
    pub amount: f64,
    /// ISO currency code
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Structured reading of the user's request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    /// Destination city or region
    pub destination: String,
    /// Number of days requested
    pub duration_days: u32,
    /// Budget if one was stated
    #[serde(default)]
    pub budget: Option<Budget>,
    /// Number of travellers
    #[serde(default = "default_travelers")]
    pub travelers: u32,
    /// Interests and themes
    #[serde(default)]
    pub interests: Vec<String>,
    /// Preferred pace (relaxed, moderate, packed)
    #[serde(default)]
    pub pace: Option<String>,
    /// Model confidence
    #[serde(default)]
    pub confidence_score: f64,
    /// Assumptions made while interpreting the request
    #[serde(default)]
    pub assumptions: Vec<String>,
}

fn default_travelers() -> u32 {
    1
}

impl StageOutput for IntentResult {
    fn check(&self) -> Result<(), String> {
        if self.duration_days > MAX_TRIP_DAYS {
            return Err(format!(
                "durationDays {} exceeds the limit of {MAX_TRIP_DAYS}",
                self.duration_days
            ));
        }
        Ok(())
    }
}

impl Assessed for IntentResult {
    fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    fn assumptions(&self) -> &[String] {
        &self.assumptions
    }
}

/// Geographic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lng: f64,
}

/// A place that could appear in an itinerary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Identifier assigned by the model
    pub id: String,
    /// Display name
    pub name: String,
    /// Category (museum, park, restaurant...)
    #[serde(default)]
    pub category: Option<String>,
    /// Estimated cost per person
    #[serde(default)]
    pub estimated_cost: f64,
    /// Expected visit length
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    /// Where it is
    #[serde(default)]
    pub location: Option<Location>,
    /// Short description
    #[serde(default)]
    pub description: Option<String>,
}

/// Candidates found for the trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Activities and sights
    #[serde(default)]
    pub activities: Vec<Candidate>,
    /// Restaurants and food experiences
    #[serde(default)]
    pub dining: Vec<Candidate>,
    /// Model confidence
    #[serde(default)]
    pub confidence_score: f64,
    /// Assumptions made during discovery
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl StageOutput for DiscoveryResult {}

impl Assessed for DiscoveryResult {
    fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    fn assumptions(&self) -> &[String] {
        &self.assumptions
    }
}

/// One day of an itinerary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPlan {
    /// Day number starting at 1
    pub day: u32,
    /// Morning slot
    #[serde(default)]
    pub morning: Vec<Candidate>,
    /// Afternoon slot
    #[serde(default)]
    pub afternoon: Vec<Candidate>,
    /// Evening slot
    #[serde(default)]
    pub evening: Vec<Candidate>,
}

impl DayPlan {
    /// Empty day with the given number
    #[must_use]
    pub fn new(day: u32) -> Self {
        Self {
            day,
            morning: Vec::new(),
            afternoon: Vec::new(),
            evening: Vec::new(),
        }
    }

    /// Sum of estimated costs across all slots
    #[must_use]
    pub fn estimated_cost(&self) -> f64 {
        self.morning
            .iter()
            .chain(&self.afternoon)
            .chain(&self.evening)
            .map(|c| c.estimated_cost)
            .sum()
    }
}

/// A costed, day-by-day plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    /// Short title
    pub title: String,
    /// Summary paragraph
    #[serde(default)]
    pub summary: String,
    /// Days in order
    #[serde(default)]
    pub days: Vec<DayPlan>,
    /// Total estimated cost
    #[serde(default)]
    pub total_cost: f64,
    /// ISO currency code
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Model confidence
    #[serde(default)]
    pub confidence_score: f64,
    /// Assumptions made while planning
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl StageOutput for Itinerary {}

impl Assessed for Itinerary {
    fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    fn assumptions(&self) -> &[String] {
        &self.assumptions
    }
}

/// Output of the optimization stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    /// Alternative itineraries, best first
    pub itineraries: Vec<Itinerary>,
    /// Whether the deterministic fallback produced this result
    #[serde(default)]
    pub fallback_used: bool,
}

impl StageOutput for OptimizationResult {}
