//! Generative model abstraction
//!
//! Provides a common streaming interface over the model provider.

mod error;
mod gemini;
mod registry;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::GeminiService;
pub use registry::{LlmConfig, ModelRegistry, ModelRole};
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Common interface for streaming model providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Open a streamed generation for the request.
    ///
    /// Errors returned here happen before any text is produced; errors inside
    /// the stream happen mid-response.
    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.stream(request).await;
        let duration = start.elapsed();

        match result {
            Ok(stream) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    images = request.image_count(),
                    "LLM stream opened"
                );
                let model_id = self.model_id.clone();
                Ok(Box::pin(stream.inspect(move |item| {
                    if let Err(e) = item {
                        tracing::error!(
                            model = %model_id,
                            error = %e.message,
                            transient = e.kind.is_transient(),
                            "LLM stream failed"
                        );
                    }
                })))
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    transient = e.kind.is_transient(),
                    "LLM request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
