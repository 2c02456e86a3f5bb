//! # Voyage Providers
//!
//! Remote model clients implementing [`voyage_core::ModelBackend`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gemini;

pub use gemini::{GeminiClient, GeminiConfig};
