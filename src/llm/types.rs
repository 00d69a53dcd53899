//! Common types for LLM interactions

use super::LlmError;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Ordered, finite stream of generated text fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM request: a single user turn
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub content: Vec<ContentBlock>,
    pub generation: GenerationConfig,
}

impl LlmRequest {
    /// Text-only prompt
    pub fn text(prompt: impl Into<String>, generation: GenerationConfig) -> Self {
        Self {
            content: vec![ContentBlock::text(prompt)],
            generation,
        }
    }

    /// Prompt with images; images precede the text
    pub fn multimodal(
        prompt: impl Into<String>,
        images: impl IntoIterator<Item = ImageSource>,
        generation: GenerationConfig,
    ) -> Self {
        let mut content: Vec<ContentBlock> = images
            .into_iter()
            .map(|source| ContentBlock::Image { source })
            .collect();
        content.push(ContentBlock::text(prompt));
        Self {
            content,
            generation,
        }
    }

    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|block| matches!(block, ContentBlock::Image { .. }))
            .count()
    }
}

/// Content block in a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text { text: s.into() }
    }
}

/// Image source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
}

/// Sampling parameters forwarded to the model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}
