//! # Voyage Server
//!
//! HTTP gateway in front of the itinerary planner: the Gemini generate proxy,
//! planning sessions with a confirmation gate, health and metrics, and the
//! admin rate limit reset. Every `/api` request passes a per-client token
//! bucket; calls to the remote model go through the cache, the circuit
//! breaker and the retry executor.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metered;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

pub use error::ApiError;
pub use routes::create_router;
pub use server::{Server, ServerConfig, ServerError};
pub use state::{AppState, AppStateBuilder, PlanAction, PlanOutcome, Session, SessionStore};
