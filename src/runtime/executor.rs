//! Chat session runtime executor

use super::traits::{ChatModel, ImageResolver};
use super::SessionEvent;

use crate::attachments::AttachmentError;
use crate::state_machine::{
    transition, AttachmentPolicy, ChatContext, ChatState, Effect, Event, ImageData,
    TransitionError,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// An event plus an optional channel for the transition outcome
#[derive(Debug)]
pub(super) struct Envelope {
    pub event: Event,
    pub reply: Option<oneshot::Sender<Result<(), TransitionError>>>,
}

impl Envelope {
    /// Internal event from a background task; nobody waits on the outcome
    fn internal(event: Event) -> Self {
        Self { event, reply: None }
    }
}

/// Generic chat runtime that can work with any model and resolver implementations
pub struct ChatRuntime<M, R>
where
    M: ChatModel + 'static,
    R: ImageResolver + 'static,
{
    context: ChatContext,
    state: ChatState,
    model: Arc<M>,
    resolver: Arc<R>,
    event_rx: mpsc::Receiver<Envelope>,
    /// Weak so the loop ends once every handle and task is gone
    event_tx: mpsc::WeakSender<Envelope>,
    snapshot_tx: watch::Sender<ChatState>,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    /// Token to cancel the in-flight stream
    stream_cancel_token: Option<CancellationToken>,
    /// Queue feeding the attachment worker; batches resolve in arrival order
    attachment_tx: Option<mpsc::UnboundedSender<Vec<String>>>,
    shutdown: CancellationToken,
}

impl<M, R> ChatRuntime<M, R>
where
    M: ChatModel + 'static,
    R: ImageResolver + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        context: ChatContext,
        model: M,
        resolver: R,
        event_rx: mpsc::Receiver<Envelope>,
        event_tx: mpsc::WeakSender<Envelope>,
        snapshot_tx: watch::Sender<ChatState>,
        broadcast_tx: broadcast::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            state: ChatState::default(),
            model: Arc::new(model),
            resolver: Arc::new(resolver),
            event_rx,
            event_tx,
            snapshot_tx,
            broadcast_tx,
            stream_cancel_token: None,
            attachment_tx: None,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            policy = ?self.context.attachment_policy,
            "Starting chat session runtime"
        );

        self.attachment_tx = Some(self.spawn_attachment_worker());

        // Process events in a loop, one at a time
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                Some(envelope) = self.event_rx.recv() => {
                    self.process_event(envelope);
                }

                else => break,
            }
        }

        self.abort_stream();
        tracing::info!(
            messages = self.state.messages.len(),
            "Chat session runtime stopped"
        );
    }

    fn process_event(&mut self, envelope: Envelope) {
        let Envelope { event, reply } = envelope;

        // Pure state transition
        let outcome = match transition(&self.state, &self.context, event) {
            Ok(result) => {
                self.state = result.new_state;
                for effect in result.effects {
                    self.execute_effect(effect);
                }
                if !self.state.loading {
                    // Stream ended on its own; the token has nothing left to cancel
                    self.stream_cancel_token = None;
                }
                Ok(())
            }
            Err(e @ TransitionError::StaleStream(_)) => {
                // Leftover output from a stream that was already finalized
                tracing::warn!(error = %e, "Ignoring stale stream event");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected event");
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    /// Execute an effect; anything slow runs as a background task
    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::RequestStream {
                message_id,
                prompt,
                images,
            } => {
                let Some(event_tx) = self.event_tx.upgrade() else {
                    tracing::warn!("Session closing, not opening stream");
                    return;
                };

                // A new stream replaces any previous one
                self.abort_stream();
                let cancel_token = self.shutdown.child_token();
                self.stream_cancel_token = Some(cancel_token.clone());

                let model = self.model.clone();
                tokio::spawn(async move {
                    Self::consume_stream(model, event_tx, message_id, prompt, images, cancel_token)
                        .await;
                });
            }

            Effect::AbortStream => self.abort_stream(),

            Effect::ResolveAttachments { sources } => {
                let queued = self
                    .attachment_tx
                    .as_ref()
                    .is_some_and(|tx| tx.send(sources).is_ok());
                if !queued {
                    tracing::warn!("Attachment worker gone, dropping batch");
                }
            }

            Effect::PublishState => {
                tracing::debug!(
                    messages = self.state.messages.len(),
                    pending_attachments = self.state.pending_attachment_count(),
                    loading = self.state.loading,
                    "Publishing state"
                );
                self.snapshot_tx.send_replace(self.state.clone());
                let _ = self.broadcast_tx.send(SessionEvent::StateChange {
                    state: self.state.clone(),
                });
            }

            Effect::ReportError { error } => {
                tracing::warn!(error = ?error, "Chat session error");
                let _ = self.broadcast_tx.send(SessionEvent::Error { error });
            }
        }
    }

    /// Start the task that resolves attachment batches one at a time.
    ///
    /// Results come back in the order the batches were queued, whatever each
    /// resolution takes. The worker stops on shutdown or once the runtime
    /// drops the queue.
    fn spawn_attachment_worker(&self) -> mpsc::UnboundedSender<Vec<String>> {
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<String>>();
        let resolver = self.resolver.clone();
        let event_tx = self.event_tx.clone();
        let stop_on_failure = self.context.attachment_policy == AttachmentPolicy::AbortBatch;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let sources = tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,

                    batch = batch_rx.recv() => match batch {
                        Some(sources) => sources,
                        None => break,
                    },
                };

                let results = tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,

                    results = Self::resolve_all(resolver.clone(), &sources, stop_on_failure) => results,
                };

                let Some(event_tx) = event_tx.upgrade() else {
                    break;
                };
                let event = Event::AttachmentsResolved { results };
                if event_tx.send(Envelope::internal(event)).await.is_err() {
                    break;
                }
            }
            tracing::debug!("Attachment worker stopped");
        });

        batch_tx
    }

    fn abort_stream(&mut self) {
        if let Some(token) = self.stream_cancel_token.take() {
            tracing::info!("Aborting in-flight stream");
            token.cancel();
        }
    }

    /// Open the stream and forward its fragments as events until it ends or
    /// the token fires. Nothing is sent after cancellation.
    async fn consume_stream(
        model: Arc<M>,
        event_tx: mpsc::Sender<Envelope>,
        message_id: u64,
        prompt: String,
        images: Vec<ImageData>,
        cancel_token: CancellationToken,
    ) {
        tracing::info!(message_id, images = images.len(), "Requesting streamed reply");

        let opened = tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                tracing::info!(message_id, "Stream cancelled before it opened");
                return;
            }

            result = async {
                if images.is_empty() {
                    model.stream_text(&prompt).await
                } else {
                    model.stream_multimodal(&prompt, &images).await
                }
            } => result,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                let event = Event::StreamFailed {
                    message_id,
                    message: e.message,
                    error_kind: e.kind,
                };
                let _ = event_tx.send(Envelope::internal(event)).await;
                return;
            }
        };

        let mut fragments = 0usize;
        loop {
            let event = tokio::select! {
                biased;

                () = cancel_token.cancelled() => {
                    tracing::info!(message_id, fragments, "Stream cancelled");
                    return;
                }

                item = stream.next() => match item {
                    Some(Ok(text)) if text.is_empty() => continue,
                    Some(Ok(text)) => {
                        fragments += 1;
                        tracing::debug!(message_id, bytes = text.len(), "Stream fragment");
                        Event::StreamChunk { message_id, text }
                    }
                    Some(Err(e)) => Event::StreamFailed {
                        message_id,
                        message: e.message,
                        error_kind: e.kind,
                    },
                    None => {
                        tracing::info!(message_id, fragments, "Stream finished");
                        Event::StreamComplete { message_id }
                    }
                },
            };

            let terminal = !matches!(event, Event::StreamChunk { .. });
            if event_tx.send(Envelope::internal(event)).await.is_err() || terminal {
                return;
            }
        }
    }

    /// Resolve sources in order; with `stop_on_failure` nothing after the
    /// first failure is attempted
    async fn resolve_all(
        resolver: Arc<R>,
        sources: &[String],
        stop_on_failure: bool,
    ) -> Vec<Result<ImageData, AttachmentError>> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let result = resolver.resolve(source).await;
            let failed = result.is_err();
            if let Err(e) = &result {
                tracing::warn!(source = %e.source_ref(), error = %e, "Attachment failed to resolve");
            }
            results.push(result);
            if failed && stop_on_failure {
                break;
            }
        }
        results
    }
}
