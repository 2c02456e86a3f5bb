//! Remote model abstraction.
//!
//! Everything that talks to an AI model goes through [`ModelBackend`], so the
//! resilience chain and the pipeline can be exercised against scripted
//! backends in tests.

use crate::error::VoyageError;
use crate::model::{GenerateRequest, GenerateResponse};
use async_trait::async_trait;

/// Core trait for remote model clients
#[async_trait]
pub trait ModelBackend: Send + Sync + 'static {
    /// Identifier of the protected dependency (used for breakers and metrics)
    fn id(&self) -> &str;

    /// Execute one generation call
    ///
    /// # Errors
    /// Returns `VoyageError::Provider` on remote or transport failures
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, VoyageError>;

    /// Whether credentials are configured
    fn is_configured(&self) -> bool {
        true
    }
}
