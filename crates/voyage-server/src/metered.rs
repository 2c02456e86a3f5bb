//! Latency recording around the remote model.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use voyage_core::{GenerateRequest, GenerateResponse, ModelBackend, VoyageError};
use voyage_telemetry::Metrics;

/// Backend decorator recording every remote attempt in [`Metrics`].
///
/// It sits inside the resilience chain, so cache hits and circuit-open
/// rejections are not counted as remote calls.
pub struct MeteredBackend {
    inner: Arc<dyn ModelBackend>,
    metrics: Arc<Metrics>,
}

impl MeteredBackend {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Arc<dyn ModelBackend>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl ModelBackend for MeteredBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, VoyageError> {
        let start = Instant::now();
        let result = self.inner.generate(request).await;

        self.metrics
            .record_remote_call(request.model.as_str(), start.elapsed(), result.is_ok());
        if let Err(ref e) = result {
            self.metrics.record_error(e.error_type());
        }

        result
    }
}
