//! Pipeline state machine.
//!
//! Transitions are pure: [`PipelineState::transition`] computes the next
//! state from the current one and an event, and never performs I/O.

use serde::Serialize;
use std::fmt;
use voyage_core::{Assessed, Stage, VoyageError};

/// Below this confidence a stage result is shown to the user before
/// the pipeline continues
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Whether a stage result must be confirmed before the next stage runs
#[must_use]
pub fn needs_confirmation(output: &impl Assessed) -> bool {
    let score = output.confidence_score();
    score.is_nan() || score < CONFIDENCE_THRESHOLD || !output.assumptions().is_empty()
}

/// Where a planning session is
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing started yet
    #[default]
    Idle,
    /// A stage is running
    Running {
        /// Running stage
        stage: Stage,
    },
    /// A stage result waits for the user
    AwaitingConfirmation {
        /// Stage whose result needs review
        stage: Stage,
    },
    /// Itineraries are available
    Complete,
    /// The user abandoned the plan; a new one may be started
    Cancelled,
    /// A stage failed with no fallback
    Failed {
        /// Failed stage
        stage: Stage,
        /// Message shown to the user
        message: String,
    },
}

/// Something that happened to a session
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A new query was submitted
    Start,
    /// A stage produced a result
    StageCompleted {
        /// Finished stage
        stage: Stage,
        /// Whether the result must be confirmed first
        needs_review: bool,
    },
    /// A stage gave up
    StageFailed {
        /// Failed stage
        stage: Stage,
        /// Message shown to the user
        message: String,
    },
    /// The user accepted the result under review
    Confirm,
    /// The user abandoned the plan
    Cancel,
    /// The user asked to change a finished itinerary
    Refine,
}

impl PipelineEvent {
    fn action(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StageCompleted { .. } => "complete a stage",
            Self::StageFailed { .. } => "fail a stage",
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
            Self::Refine => "refine",
        }
    }
}

impl PipelineState {
    /// Short state name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running { .. } => "running",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether a new query may be started from here
    #[must_use]
    pub fn accepts_start(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Cancelled | Self::Complete | Self::Failed { .. }
        )
    }

    /// Compute the next state.
    ///
    /// # Errors
    /// Returns `VoyageError::InvalidTransition` if `event` is not allowed in
    /// the current state
    pub fn transition(&self, event: PipelineEvent) -> Result<Self, VoyageError> {
        let next = match (self, &event) {
            (state, PipelineEvent::Start) if state.accepts_start() => Self::Running {
                stage: Stage::Intent,
            },

            (
                Self::Running { stage },
                PipelineEvent::StageCompleted {
                    stage: done,
                    needs_review,
                },
            ) if stage == done => match (*done, *needs_review) {
                (Stage::Intent | Stage::Discovery, true) => {
                    Self::AwaitingConfirmation { stage: *done }
                }
                (Stage::Intent, false) => Self::Running {
                    stage: Stage::Discovery,
                },
                (Stage::Discovery, false) => Self::Running {
                    stage: Stage::Optimization,
                },
                (Stage::Optimization | Stage::Refine, _) => Self::Complete,
            },

            (Self::Running { stage }, PipelineEvent::StageFailed { stage: failed, .. })
                if stage == failed && *failed == Stage::Refine =>
            {
                Self::Complete
            }
            (Self::Running { stage }, PipelineEvent::StageFailed { stage: failed, message })
                if stage == failed =>
            {
                Self::Failed {
                    stage: *failed,
                    message: message.clone(),
                }
            }

            (Self::AwaitingConfirmation { stage: Stage::Intent }, PipelineEvent::Confirm) => {
                Self::Running {
                    stage: Stage::Discovery,
                }
            }
            (Self::AwaitingConfirmation { stage: Stage::Discovery }, PipelineEvent::Confirm) => {
                Self::Running {
                    stage: Stage::Optimization,
                }
            }

            (Self::Idle | Self::Cancelled, PipelineEvent::Cancel) => {
                return Err(VoyageError::invalid_transition(self.name(), event.action()));
            }
            (_, PipelineEvent::Cancel) => Self::Cancelled,

            (Self::Complete, PipelineEvent::Refine) => Self::Running {
                stage: Stage::Refine,
            },

            _ => return Err(VoyageError::invalid_transition(self.name(), event.action())),
        };

        Ok(next)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { stage } => write!(f, "running {stage}"),
            Self::AwaitingConfirmation { stage } => write!(f, "awaiting confirmation of {stage}"),
            Self::Failed { stage, .. } => write!(f, "failed at {stage}"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voyage_core::IntentResult;

    fn intent(confidence: f64, assumptions: &[&str]) -> IntentResult {
        IntentResult {
            destination: "Kyoto".to_string(),
            duration_days: 3,
            budget: None,
            travelers: 2,
            interests: vec![],
            pace: None,
            confidence_score: confidence,
            assumptions: assumptions.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn running(stage: Stage) -> PipelineState {
        PipelineState::Running { stage }
    }

    #[test]
    fn test_confirmation_gate() {
        assert!(needs_confirmation(&intent(0.5, &[])));
        assert!(!needs_confirmation(&intent(0.95, &[])));
        assert!(needs_confirmation(&intent(0.95, &["assumed 2 travellers"])));
        assert!(!needs_confirmation(&intent(0.7, &[])));
        assert!(needs_confirmation(&intent(f64::NAN, &[])));
    }

    #[test]
    fn test_happy_path_without_review() {
        let state = PipelineState::Idle
            .transition(PipelineEvent::Start)
            .and_then(|s| {
                s.transition(PipelineEvent::StageCompleted {
                    stage: Stage::Intent,
                    needs_review: false,
                })
            })
            .and_then(|s| {
                s.transition(PipelineEvent::StageCompleted {
                    stage: Stage::Discovery,
                    needs_review: false,
                })
            })
            .and_then(|s| {
                s.transition(PipelineEvent::StageCompleted {
                    stage: Stage::Optimization,
                    needs_review: false,
                })
            })
            .expect("valid transitions");

        assert_eq!(state, PipelineState::Complete);
    }

    #[test]
    fn test_review_pauses_and_confirm_resumes() {
        let paused = running(Stage::Intent)
            .transition(PipelineEvent::StageCompleted {
                stage: Stage::Intent,
                needs_review: true,
            })
            .expect("pause");
        assert_eq!(
            paused,
            PipelineState::AwaitingConfirmation {
                stage: Stage::Intent
            }
        );

        let resumed = paused.transition(PipelineEvent::Confirm).expect("confirm");
        assert_eq!(resumed, running(Stage::Discovery));

        let paused = running(Stage::Discovery)
            .transition(PipelineEvent::StageCompleted {
                stage: Stage::Discovery,
                needs_review: true,
            })
            .expect("pause");
        assert_eq!(
            paused.transition(PipelineEvent::Confirm).expect("confirm"),
            running(Stage::Optimization)
        );
    }

    #[test]
    fn test_cancel_resets_and_allows_restart() {
        let paused = PipelineState::AwaitingConfirmation {
            stage: Stage::Discovery,
        };
        let cancelled = paused.transition(PipelineEvent::Cancel).expect("cancel");
        assert_eq!(cancelled, PipelineState::Cancelled);

        assert_eq!(
            cancelled.transition(PipelineEvent::Start).expect("restart"),
            running(Stage::Intent)
        );
        assert!(cancelled.transition(PipelineEvent::Cancel).is_err());
    }

    #[test]
    fn test_failure_and_refine_transitions() {
        let failed = running(Stage::Discovery)
            .transition(PipelineEvent::StageFailed {
                stage: Stage::Discovery,
                message: Stage::Discovery.apology().to_string(),
            })
            .expect("fail");
        assert!(matches!(failed, PipelineState::Failed { stage: Stage::Discovery, .. }));

        let refining = PipelineState::Complete
            .transition(PipelineEvent::Refine)
            .expect("refine");
        assert_eq!(refining, running(Stage::Refine));

        let after_failure = refining
            .transition(PipelineEvent::StageFailed {
                stage: Stage::Refine,
                message: "timeout".to_string(),
            })
            .expect("refine failure keeps plan");
        assert_eq!(after_failure, PipelineState::Complete);
    }

    #[test]
    fn test_invalid_transitions() {
        let err = PipelineState::Idle
            .transition(PipelineEvent::Confirm)
            .expect_err("nothing to confirm");
        assert!(matches!(err, VoyageError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Cannot confirm while pipeline is idle");

        assert!(running(Stage::Intent).transition(PipelineEvent::Start).is_err());
        assert!(PipelineState::Idle.transition(PipelineEvent::Refine).is_err());
        assert!(running(Stage::Intent)
            .transition(PipelineEvent::StageCompleted {
                stage: Stage::Discovery,
                needs_review: false,
            })
            .is_err());
    }

    #[test]
    fn test_state_serializes_with_status_tag() {
        let json = serde_json::to_value(PipelineState::AwaitingConfirmation {
            stage: Stage::Intent,
        })
        .expect("serialize");
        assert_eq!(json["status"], "awaiting_confirmation");
        assert_eq!(json["stage"], "intent");
    }
}
