//! Stage entry/exit logging.
//!
//! Inputs and outputs are logged as content hashes so that identical runs can
//! be correlated without writing user data to the logs.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use voyage_core::{content_hash, Stage, VoyageError};

/// Hash of a value's JSON form, `None` if it cannot be serialized
#[must_use]
pub fn payload_hash(value: &impl Serialize) -> Option<String> {
    serde_json::to_string(value)
        .ok()
        .map(|json| format!("{:016x}", content_hash(&json)))
}

/// An in-flight stage
#[derive(Debug)]
pub struct StageAudit {
    stage: Stage,
    input_hash: Option<String>,
    started: Instant,
}

impl StageAudit {
    /// Log stage entry
    pub fn enter(stage: Stage, input: &impl Serialize) -> Self {
        let input_hash = payload_hash(input);
        debug!(
            stage = %stage,
            input_hash = input_hash.as_deref().unwrap_or("unavailable"),
            "Stage started"
        );
        Self {
            stage,
            input_hash,
            started: Instant::now(),
        }
    }

    /// Log stage exit and return the elapsed time
    pub fn finish<T: Serialize>(self, outcome: &Result<T, VoyageError>) -> Duration {
        let elapsed = self.started.elapsed();
        let input_hash = self.input_hash.as_deref().unwrap_or("unavailable");

        match outcome {
            Ok(output) => {
                let output_hash = payload_hash(output);
                info!(
                    stage = %self.stage,
                    status = "success",
                    input_hash,
                    output_hash = output_hash.as_deref().unwrap_or("unavailable"),
                    duration_ms = elapsed.as_millis(),
                    "Stage finished"
                );
            }
            Err(error) => {
                warn!(
                    stage = %self.stage,
                    status = "error",
                    input_hash,
                    error = %error,
                    error_type = error.error_type(),
                    duration_ms = elapsed.as_millis(),
                    "Stage finished"
                );
            }
        }

        elapsed
    }
}
