//! API request and response types

use crate::state_machine::ChatState;
use serde::Serialize;

/// Response for an accepted action
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub accepted: bool,
    /// Whether a reply is streaming after the action was applied
    pub loading: bool,
}

/// Response with the current session state
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: ChatState,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
