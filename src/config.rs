//! Process configuration from environment variables

use crate::llm::LlmConfig;
use crate::state_machine::AttachmentPolicy;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 8000;

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub llm: LlmConfig,
    pub attachment_policy: AttachmentPolicy,
    /// Base directory for relative attachment references
    pub attachment_root: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let attachment_root = std::env::var("CHAT_ATTACHMENT_ROOT")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            port: env_parsed("CHAT_PORT").unwrap_or(DEFAULT_PORT),
            llm: LlmConfig::from_env(),
            attachment_policy: env_parsed("CHAT_ATTACHMENT_POLICY").unwrap_or_default(),
            attachment_root,
        }
    }
}

/// Read and parse an environment variable.
///
/// Unset variables are `None`; unparsable ones are logged and treated as unset.
pub fn env_parsed<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment value");
            None
        }
    }
}
