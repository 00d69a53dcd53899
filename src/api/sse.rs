//! Server-Sent Events support

use crate::runtime::SessionEvent;
use crate::state_machine::ChatState;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream, starting with the current state.
///
/// The stream ends when `closed` resolves.
pub fn sse_stream(
    init_state: ChatState,
    broadcast_rx: tokio::sync::broadcast::Receiver<SessionEvent>,
    closed: impl Future<Output = ()> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move {
        let data = json!({ "type": "init", "state": init_state });
        Ok(Event::default().event("init").data(data.to_string()))
    });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(session_event_to_axum(&event))),
        Err(_) => None, // Skip lagged messages
    });

    let combined = futures::StreamExt::take_until(init.chain(broadcasts), closed);

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn session_event_to_axum(event: &SessionEvent) -> Event {
    let event_type = match event {
        SessionEvent::StateChange { .. } => "state_change",
        SessionEvent::Error { .. } => "error",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        json!({ "type": "error", "error": { "type": "encoding", "message": e.to_string() } })
            .to_string()
    });

    Event::default().event(event_type).data(data)
}
