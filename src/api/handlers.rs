//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{ActionResponse, ErrorResponse, StateResponse};
use super::AppState;
use crate::runtime::DispatchError;
use crate::state_machine::{ChatAction, TransitionError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session actions
        .route("/api/events", post(dispatch_action))
        .route("/api/cancel", post(cancel_reply))
        // Observation
        .route("/api/state", get(get_state))
        .route("/api/stream", get(stream_session))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// User Actions
// ============================================================

async fn dispatch_action(
    State(state): State<AppState>,
    Json(action): Json<ChatAction>,
) -> Result<Json<ActionResponse>, AppError> {
    state.session.dispatch(action).await?;
    Ok(Json(ActionResponse {
        accepted: true,
        loading: state.session.snapshot().loading,
    }))
}

async fn cancel_reply(State(state): State<AppState>) -> Result<Json<ActionResponse>, AppError> {
    state.session.dispatch(ChatAction::Cancel).await?;
    Ok(Json(ActionResponse {
        accepted: true,
        loading: state.session.snapshot().loading,
    }))
}

// ============================================================
// Observation
// ============================================================

async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse {
        state: state.session.snapshot(),
    })
}

async fn stream_session(State(state): State<AppState>) -> impl IntoResponse {
    // Subscribe first so nothing published after the snapshot is missed
    let broadcast_rx = state.session.subscribe();
    sse_stream(state.session.snapshot(), broadcast_rx, state.session.closed())
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("gemini-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        let message = e.to_string();
        match e {
            DispatchError::Rejected(TransitionError::ResponseInFlight) => AppError::Conflict(message),
            DispatchError::Rejected(_) => AppError::BadRequest(message),
            DispatchError::SessionClosed => AppError::Unavailable(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
