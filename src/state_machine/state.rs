//! Chat session state types

use super::event::ImageData;
use crate::attachments::AttachmentError;
use crate::llm::LlmErrorKind;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

/// Lifecycle of a message.
///
/// Assistant replies move `Pending -> Streaming -> Complete | Failed | Cancelled`.
/// User messages are created `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Placeholder created, no text yet
    #[default]
    Pending,
    /// Chunks arriving
    Streaming,
    /// Stream closed normally
    Complete,
    /// Stream errored; text frozen at the last received chunk
    Failed,
    /// Stream cancelled; text frozen at the last received chunk
    Cancelled,
}

impl MessageStatus {
    /// Terminal statuses never change again
    pub fn is_finalized(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// One entry in the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub text: String,
    pub attachments: Option<Vec<ImageData>>,
    pub sender: Sender,
    pub status: MessageStatus,
}

impl ChatMessage {
    pub fn user(id: u64, text: impl Into<String>, attachments: Option<Vec<ImageData>>) -> Self {
        Self {
            id,
            text: text.into(),
            attachments,
            sender: Sender::User,
            status: MessageStatus::Complete,
        }
    }

    /// Empty assistant reply, filled as chunks arrive
    pub fn placeholder(id: u64) -> Self {
        Self {
            id,
            text: String::new(),
            attachments: None,
            sender: Sender::Assistant,
            status: MessageStatus::Pending,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.sender == Sender::Assistant && !self.status.is_finalized()
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Everything the rendering layer sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatState {
    /// Transcript, append-only
    pub messages: Vec<ChatMessage>,
    /// Images awaiting the next multi-media send
    pub pending_attachments: Option<Vec<ImageData>>,
    /// Concatenated chunks of the most recent reply
    pub last_response_fragment: String,
    /// True iff an assistant reply is still streaming
    pub loading: bool,
    #[serde(skip)]
    next_message_id: u64,
}

impl ChatState {
    /// The assistant reply still receiving chunks, if any
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.is_streaming())
    }

    pub(crate) fn streaming_message_mut(&mut self, id: u64) -> Option<&mut ChatMessage> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.id == id && m.is_streaming())
    }

    #[cfg(test)]
    pub fn message(&self, id: u64) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    pub fn pending_attachment_count(&self) -> usize {
        self.pending_attachments.as_ref().map_or(0, Vec::len)
    }
}

// ============================================================================
// Errors surfaced to the UI
// ============================================================================

/// Typed failure reported to subscribers instead of being swallowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatError {
    /// The model failed before or during a streamed reply
    Stream {
        message_id: u64,
        kind: LlmErrorKind,
        message: String,
    },
    /// An attachment reference could not be read
    AttachmentResolution {
        error: AttachmentError,
        /// True when the policy discarded the whole batch
        batch_aborted: bool,
    },
}

// ============================================================================
// Session Context
// ============================================================================

/// What to do with a batch of attachments when one of them fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentPolicy {
    /// Keep every image that resolved, report the rest
    #[default]
    SkipFailed,
    /// Discard the whole batch on the first failure
    AbortBatch,
}

impl FromStr for AttachmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" | "skip_failed" => Ok(Self::SkipFailed),
            "abort" | "abort_batch" => Ok(Self::AbortBatch),
            other => Err(format!("unknown attachment policy '{other}' (expected skip or abort)")),
        }
    }
}

/// Context for a session (immutable configuration)
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub attachment_policy: AttachmentPolicy,
}

impl ChatContext {
    pub fn new(attachment_policy: AttachmentPolicy) -> Self {
        Self { attachment_policy }
    }
}
