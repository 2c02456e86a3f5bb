//! # Voyage Telemetry
//!
//! Observability for the voyage gateway:
//! - Structured logging via `tracing-subscriber`
//! - Prometheus metrics plus in-memory aggregates for the JSON metrics view

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use metrics::{LatencySummary, Metrics, MetricsConfig, MetricsSnapshot};
