//! Events that can occur in a chat session

use crate::attachments::AttachmentError;
use crate::llm::{ImageSource, LlmErrorKind};
use serde::{Deserialize, Serialize};

/// Actions a rendering layer may dispatch
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatAction {
    SendText {
        text: String,
    },
    /// `attachments: None` sends whatever is pending
    SendMultiMedia {
        text: String,
        #[serde(default)]
        attachments: Option<Vec<ImageData>>,
    },
    AddAttachments {
        sources: Vec<String>,
    },
    Cancel,
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    SendText {
        text: String,
    },
    SendMultiMedia {
        text: String,
        attachments: Option<Vec<ImageData>>,
    },
    AddAttachments {
        sources: Vec<String>,
    },
    UserCancel,

    // Attachment resolver events
    AttachmentsResolved {
        /// One entry per requested source, in request order
        results: Vec<Result<ImageData, AttachmentError>>,
    },

    // Stream consumer events
    StreamChunk {
        message_id: u64,
        text: String,
    },
    StreamComplete {
        message_id: u64,
    },
    StreamFailed {
        message_id: u64,
        message: String,
        error_kind: LlmErrorKind,
    },
}

impl From<ChatAction> for Event {
    fn from(action: ChatAction) -> Self {
        match action {
            ChatAction::SendText { text } => Event::SendText { text },
            ChatAction::SendMultiMedia { text, attachments } => {
                Event::SendMultiMedia { text, attachments }
            }
            ChatAction::AddAttachments { sources } => Event::AddAttachments { sources },
            ChatAction::Cancel => Event::UserCancel,
        }
    }
}

/// Image data for attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub data: String,
    pub media_type: String,
}

impl ImageData {
    pub fn to_image_source(&self) -> ImageSource {
        ImageSource::Base64 {
            media_type: self.media_type.clone(),
            data: self.data.clone(),
        }
    }
}
