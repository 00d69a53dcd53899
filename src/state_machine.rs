//! Core chat session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{ChatAction, Event, ImageData};
pub use state::{
    AttachmentPolicy, ChatContext, ChatError, ChatMessage, ChatState, MessageStatus, Sender,
};
pub use transition::{transition, TransitionError};
