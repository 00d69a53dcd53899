//! Effects produced by state transitions

use super::event::ImageData;
use super::state::ChatError;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a streamed generation feeding the placeholder `message_id`.
    /// Empty `images` means a text-only request.
    RequestStream {
        message_id: u64,
        prompt: String,
        images: Vec<ImageData>,
    },

    /// Cancel the in-flight stream, if any
    AbortStream,

    /// Resolve attachment references, in order
    ResolveAttachments { sources: Vec<String> },

    /// Publish the new state to observers
    PublishState,

    /// Log and surface an error to observers
    ReportError { error: ChatError },
}

impl Effect {
    pub fn request_text(message_id: u64, prompt: impl Into<String>) -> Self {
        Effect::RequestStream {
            message_id,
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }

    pub fn report(error: ChatError) -> Self {
        Effect::ReportError { error }
    }
}
