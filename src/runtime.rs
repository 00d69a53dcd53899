//! Runtime for executing a chat session
//!
//! One background task owns the state and applies events in arrival order.
//! Callers talk to it through a cloneable [`SessionHandle`].

mod executor;
pub mod traits;


pub use executor::ChatRuntime;
pub use traits::*;

use crate::state_machine::{ChatAction, ChatContext, ChatError, ChatState, Event, TransitionError};
use executor::Envelope;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

const EVENT_QUEUE_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 256;

/// Events pushed to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChange { state: ChatState },
    Error { error: ChatError },
}

/// Why a dispatched action did not take effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("Chat session has shut down")]
    SessionClosed,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::Sender<Envelope>,
    snapshot_rx: watch::Receiver<ChatState>,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Queue a user action and wait for its transition to be applied.
    ///
    /// Returns once the state reflects the action; streaming and attachment
    /// resolution continue in the background.
    pub async fn dispatch(&self, action: ChatAction) -> Result<(), DispatchError> {
        self.send(action.into()).await
    }

    async fn send(&self, event: Event) -> Result<(), DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.event_tx
            .send(Envelope {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| DispatchError::SessionClosed)?;
        reply_rx.await.map_err(|_| DispatchError::SessionClosed)??;
        Ok(())
    }

    /// Latest published state
    pub fn snapshot(&self) -> ChatState {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that always holds the latest published state
    #[cfg(test)]
    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to state changes and errors
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Stop the session, cancelling any in-flight stream
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once the session has been told to shut down
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.shutdown.clone().cancelled_owned()
    }
}

/// Start a session runtime on the current tokio runtime
pub fn spawn_session<M, R>(context: ChatContext, model: M, resolver: R) -> SessionHandle
where
    M: ChatModel + 'static,
    R: ImageResolver + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(ChatState::default());
    let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    let shutdown = CancellationToken::new();

    let runtime = ChatRuntime::new(
        context,
        model,
        resolver,
        event_rx,
        event_tx.downgrade(),
        snapshot_tx,
        broadcast_tx.clone(),
        shutdown.clone(),
    );
    tokio::spawn(runtime.run());

    SessionHandle {
        event_tx,
        snapshot_rx,
        broadcast_tx,
        shutdown,
    }
}
