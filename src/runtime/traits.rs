//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::attachments::{AttachmentError, FsImageResolver};
use crate::llm::{LlmError, LlmRequest, ModelRegistry, ModelRole, TextStream};
use crate::state_machine::ImageData;
use async_trait::async_trait;
use std::sync::Arc;

/// Client for streamed generations
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Open a text-only generation
    async fn stream_text(&self, prompt: &str) -> Result<TextStream, LlmError>;

    /// Open a generation over a prompt and images
    async fn stream_multimodal(
        &self,
        prompt: &str,
        images: &[ImageData],
    ) -> Result<TextStream, LlmError>;
}

/// Turns an attachment reference into image data
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, source: &str) -> Result<ImageData, AttachmentError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn stream_text(&self, prompt: &str) -> Result<TextStream, LlmError> {
        (**self).stream_text(prompt).await
    }

    async fn stream_multimodal(
        &self,
        prompt: &str,
        images: &[ImageData],
    ) -> Result<TextStream, LlmError> {
        (**self).stream_multimodal(prompt, images).await
    }
}

#[async_trait]
impl<T: ImageResolver + ?Sized> ImageResolver for Arc<T> {
    async fn resolve(&self, source: &str) -> Result<ImageData, AttachmentError> {
        (**self).resolve(source).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use `ModelRegistry` as `ChatModel`, routing by content
pub struct RegistryChatModel {
    registry: Arc<ModelRegistry>,
}

impl RegistryChatModel {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChatModel for RegistryChatModel {
    async fn stream_text(&self, prompt: &str) -> Result<TextStream, LlmError> {
        let request = LlmRequest::text(prompt, self.registry.generation());
        self.registry.get(ModelRole::Text).stream(&request).await
    }

    async fn stream_multimodal(
        &self,
        prompt: &str,
        images: &[ImageData],
    ) -> Result<TextStream, LlmError> {
        let request = LlmRequest::multimodal(
            prompt,
            images.iter().map(ImageData::to_image_source),
            self.registry.generation(),
        );
        self.registry.get(ModelRole::Vision).stream(&request).await
    }
}

#[async_trait]
impl ImageResolver for FsImageResolver {
    async fn resolve(&self, source: &str) -> Result<ImageData, AttachmentError> {
        self.load(source).await
    }
}
