//! Model registry for the text and vision models
//!
//! Text-only prompts and prompts with images are served by separately
//! configured models.

use super::{GeminiService, GenerationConfig, LlmError, LlmService, LoggingService};
use crate::config::env_parsed;
use std::sync::Arc;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.5-flash";

/// Configuration for the model provider
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub gemini_api_key: Option<String>,
    /// Gateway base URL; when set the gateway supplies credentials
    pub gateway: Option<String>,
    pub text_model: Option<String>,
    pub vision_model: Option<String>,
    pub generation: GenerationConfig,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            text_model: std::env::var("GEMINI_TEXT_MODEL").ok(),
            vision_model: std::env::var("GEMINI_VISION_MODEL").ok(),
            generation: GenerationConfig {
                temperature: env_parsed("GEMINI_TEMPERATURE"),
                max_output_tokens: env_parsed("GEMINI_MAX_OUTPUT_TOKENS"),
            },
        }
    }

    pub fn text_model(&self) -> &str {
        self.text_model.as_deref().unwrap_or(DEFAULT_TEXT_MODEL)
    }

    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(DEFAULT_VISION_MODEL)
    }
}

/// Which model a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Text,
    Vision,
}

/// Registry holding one service per role
pub struct ModelRegistry {
    text: Arc<dyn LlmService>,
    vision: Arc<dyn LlmService>,
    generation: GenerationConfig,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        // In gateway mode, use "implicit" as the API key
        // The gateway will handle the actual authentication
        let api_key = if config.gateway.is_some() {
            "implicit".to_string()
        } else {
            config
                .gemini_api_key
                .clone()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| LlmError::auth("GEMINI_API_KEY is not set"))?
        };
        let gateway = config.gateway.as_deref();

        let text = Self::create(&api_key, config.text_model(), gateway)?;
        let vision = if config.vision_model() == config.text_model() {
            Arc::clone(&text)
        } else {
            Self::create(&api_key, config.vision_model(), gateway)?
        };

        Ok(Self::from_services(text, vision, config.generation))
    }

    pub fn from_services(
        text: Arc<dyn LlmService>,
        vision: Arc<dyn LlmService>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            text,
            vision,
            generation,
        }
    }

    fn create(
        api_key: &str,
        model: &str,
        gateway: Option<&str>,
    ) -> Result<Arc<dyn LlmService>, LlmError> {
        let service = GeminiService::new(api_key.to_string(), model, gateway)?;
        // Wrap with logging
        Ok(Arc::new(LoggingService::new(Arc::new(service))))
    }

    pub fn get(&self, role: ModelRole) -> Arc<dyn LlmService> {
        match role {
            ModelRole::Text => Arc::clone(&self.text),
            ModelRole::Vision => Arc::clone(&self.vision),
        }
    }

    pub fn generation(&self) -> GenerationConfig {
        self.generation
    }
}
