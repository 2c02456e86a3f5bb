//! Deterministic itinerary built without the remote model.
//!
//! Used when the optimization stage has exhausted its retries. The output is a
//! pure function of the intent and the discovered candidates.

use voyage_core::{
    DayPlan, DiscoveryResult, IntentResult, Itinerary, OptimizationResult, MAX_TRIP_DAYS,
};

/// Confidence reported for fallback itineraries
pub const FALLBACK_CONFIDENCE: f64 = 0.2;

/// Assumption attached to fallback itineraries
pub const FALLBACK_ASSUMPTION: &str = "fallback used";

/// Spread the discovered candidates over the trip.
///
/// Activity `i` goes to day `i mod n`; the activities landing on one day
/// alternate between morning and afternoon. Dining `j` goes to the evening of
/// day `j mod n`. The trip length is clamped to `1..=MAX_TRIP_DAYS`.
#[must_use]
pub fn build_itinerary(intent: &IntentResult, discovery: &DiscoveryResult) -> OptimizationResult {
    let n = intent.duration_days.clamp(1, MAX_TRIP_DAYS) as usize;
    let mut days: Vec<DayPlan> = (1..=n as u32).map(DayPlan::new).collect();

    for (i, activity) in discovery.activities.iter().enumerate() {
        let day = &mut days[i % n];
        if (i / n) % 2 == 0 {
            day.morning.push(activity.clone());
        } else {
            day.afternoon.push(activity.clone());
        }
    }

    for (j, dining) in discovery.dining.iter().enumerate() {
        days[j % n].evening.push(dining.clone());
    }

    let travelers = f64::from(intent.travelers.max(1));
    let total_cost = days.iter().map(DayPlan::estimated_cost).sum::<f64>() * travelers;
    let currency = intent
        .budget
        .as_ref()
        .map_or_else(|| "USD".to_string(), |b| b.currency.clone());

    let itinerary = Itinerary {
        title: format!("{n}-day trip to {}", intent.destination),
        summary: format!(
            "A simple plan spreading {} activities and {} dining options across {n} days.",
            discovery.activities.len(),
            discovery.dining.len()
        ),
        days,
        total_cost,
        currency,
        confidence_score: FALLBACK_CONFIDENCE,
        assumptions: vec![FALLBACK_ASSUMPTION.to_string()],
    };

    OptimizationResult {
        itineraries: vec![itinerary],
        fallback_used: true,
    }
}
