//! Pure state transition function

use super::event::ImageData;
use super::state::{AttachmentPolicy, ChatError, ChatMessage, MessageStatus};
use super::{ChatContext, ChatState, Effect, Event};
use crate::attachments::AttachmentError;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ChatState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ChatState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A response is still streaming (cancel it first)")]
    ResponseInFlight,
    #[error("Message text is empty")]
    EmptyMessage,
    #[error("No streaming reply with id {0}")]
    StaleStream(u64),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &ChatState,
    context: &ChatContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Sending
        // ============================================================
        Event::SendText { .. } | Event::SendMultiMedia { .. } if state.loading => {
            Err(TransitionError::ResponseInFlight)
        }

        Event::SendText { text } => {
            ensure_not_blank(&text)?;
            let mut new_state = state.clone();
            let reply_id = begin_exchange(&mut new_state, &text, None);

            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::request_text(reply_id, text))
                .with_effect(Effect::PublishState))
        }

        Event::SendMultiMedia { text, attachments } => {
            ensure_not_blank(&text)?;
            let mut new_state = state.clone();
            let pending = new_state.pending_attachments.take();
            let images = attachments.or(pending).unwrap_or_default();

            let user_attachments = (!images.is_empty()).then(|| images.clone());
            let reply_id = begin_exchange(&mut new_state, &text, user_attachments);

            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::RequestStream {
                    message_id: reply_id,
                    prompt: text,
                    images,
                })
                .with_effect(Effect::PublishState))
        }

        // ============================================================
        // Attachments
        // ============================================================
        Event::AddAttachments { sources } => {
            if sources.is_empty() {
                return Ok(TransitionResult::new(state.clone()));
            }
            Ok(TransitionResult::new(state.clone())
                .with_effect(Effect::ResolveAttachments { sources }))
        }

        Event::AttachmentsResolved { results } => Ok(apply_attachments(
            state,
            context.attachment_policy,
            results,
        )),

        // ============================================================
        // Streaming
        // ============================================================
        Event::StreamChunk { message_id, text } => {
            let mut new_state = state.clone();
            let message = new_state
                .streaming_message_mut(message_id)
                .ok_or(TransitionError::StaleStream(message_id))?;
            message.text.push_str(&text);
            message.status = MessageStatus::Streaming;
            new_state.last_response_fragment.push_str(&text);

            Ok(TransitionResult::new(new_state).with_effect(Effect::PublishState))
        }

        Event::StreamComplete { message_id } => {
            let new_state = finish_stream(state, message_id, MessageStatus::Complete)?;
            Ok(TransitionResult::new(new_state).with_effect(Effect::PublishState))
        }

        Event::StreamFailed {
            message_id,
            message,
            error_kind,
        } => {
            // Partial text is kept as-is
            let new_state = finish_stream(state, message_id, MessageStatus::Failed)?;
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::PublishState)
                .with_effect(Effect::report(ChatError::Stream {
                    message_id,
                    kind: error_kind,
                    message,
                })))
        }

        // ============================================================
        // Cancellation
        // ============================================================
        Event::UserCancel => match state.streaming_message() {
            Some(message) => {
                let new_state = finish_stream(state, message.id, MessageStatus::Cancelled)?;
                Ok(TransitionResult::new(new_state)
                    .with_effect(Effect::AbortStream)
                    .with_effect(Effect::PublishState))
            }
            // Nothing in flight
            None => Ok(TransitionResult::new(state.clone())),
        },
    }
}

// Helper functions

fn ensure_not_blank(text: &str) -> Result<(), TransitionError> {
    if text.trim().is_empty() {
        Err(TransitionError::EmptyMessage)
    } else {
        Ok(())
    }
}

/// Append the user message and an empty reply; returns the reply id
fn begin_exchange(state: &mut ChatState, text: &str, attachments: Option<Vec<ImageData>>) -> u64 {
    let user_id = state.allocate_id();
    let reply_id = state.allocate_id();
    state
        .messages
        .push(ChatMessage::user(user_id, text, attachments));
    state.messages.push(ChatMessage::placeholder(reply_id));
    state.last_response_fragment.clear();
    state.loading = true;
    reply_id
}

fn finish_stream(
    state: &ChatState,
    message_id: u64,
    status: MessageStatus,
) -> Result<ChatState, TransitionError> {
    let mut new_state = state.clone();
    let message = new_state
        .streaming_message_mut(message_id)
        .ok_or(TransitionError::StaleStream(message_id))?;
    message.status = status;
    new_state.loading = false;
    Ok(new_state)
}

fn apply_attachments(
    state: &ChatState,
    policy: AttachmentPolicy,
    results: Vec<Result<ImageData, AttachmentError>>,
) -> TransitionResult {
    let (images, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let images: Vec<ImageData> = images.into_iter().filter_map(Result::ok).collect();
    let failures: Vec<AttachmentError> = failures.into_iter().filter_map(Result::err).collect();

    match policy {
        AttachmentPolicy::AbortBatch if !failures.is_empty() => {
            let first = failures.into_iter().next().map(|error| {
                Effect::report(ChatError::AttachmentResolution {
                    error,
                    batch_aborted: true,
                })
            });
            TransitionResult::new(state.clone()).with_effects(first)
        }
        _ => {
            let mut new_state = state.clone();
            let changed = !images.is_empty();
            if changed {
                new_state
                    .pending_attachments
                    .get_or_insert_with(Vec::new)
                    .extend(images);
            }
            let reports = failures.into_iter().map(|error| {
                Effect::report(ChatError::AttachmentResolution {
                    error,
                    batch_aborted: false,
                })
            });
            let publish = changed.then_some(Effect::PublishState);
            TransitionResult::new(new_state)
                .with_effects(publish)
                .with_effects(reports)
        }
    }
}
