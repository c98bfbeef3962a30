//! Per-channel state shared by the caller and the link driver.
//!
//! All folding happens under one lock, and events are published while it is
//! held, so subscribers observe deltas in exactly the order frames arrived.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::assembler::{Applied, Delta, Message, StreamAssembler, TurnOutcome};
use crate::codec::{self, Frame};
use crate::error::{Result, StreamError};
use crate::events::{
    ChannelEvent, ConnectionState, Diagnostic, DiagnosticKind, EventHub, GenerationState,
    Subscription, SubscriptionId, TurnHandle, TurnStatus,
};

#[derive(Debug, Default)]
struct SessionState {
    connection: ConnectionState,
    generation: GenerationState,
    assembler: StreamAssembler,
    turn: Option<watch::Sender<TurnStatus>>,
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    state: Mutex<SessionState>,
    events: EventHub,
}

impl Session {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub(crate) fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub(crate) fn generation(&self) -> GenerationState {
        self.state.lock().generation
    }

    pub(crate) fn messages(&self) -> Vec<Arc<Message>> {
        self.state.lock().assembler.messages().to_vec()
    }

    pub(crate) fn current_message(&self) -> Option<Arc<Message>> {
        self.state.lock().assembler.current().cloned()
    }

    pub(crate) fn set_connection(&self, connection: ConnectionState) {
        let mut state = self.state.lock();
        if state.connection == connection {
            return;
        }
        state.connection = connection;
        self.events.publish(ChannelEvent::Connection(connection));
    }

    /// Move from `Disconnected` to `Connecting`; false if a link is already up
    /// or being opened.
    pub(crate) fn try_begin_connect(&self) -> bool {
        let mut state = self.state.lock();
        if state.connection != ConnectionState::Disconnected {
            return false;
        }
        state.connection = ConnectionState::Connecting;
        self.events
            .publish(ChannelEvent::Connection(ConnectionState::Connecting));
        true
    }

    /// Record the user message and open the assistant message for a new turn.
    pub(crate) fn begin_turn(&self, text: &str, attachments: Vec<String>) -> Result<TurnHandle> {
        let mut state = self.state.lock();
        if state.generation == GenerationState::Generating {
            return Err(StreamError::TurnInFlight);
        }

        state.assembler.push_user(text, attachments);
        let message = state.assembler.begin_turn()?;
        let (tx, handle) = TurnHandle::new(message.id.clone());
        state.turn = Some(tx);
        state.generation = GenerationState::Generating;
        self.events
            .publish(ChannelEvent::Generation(GenerationState::Generating));
        Ok(handle)
    }

    /// Decode and fold one raw JSON frame. Decode failures cost only this frame.
    pub(crate) fn receive(&self, raw: &str) {
        match codec::decode(raw) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                self.report(DiagnosticKind::Decode, e.to_string());
            }
        }
    }

    pub(crate) fn dispatch(&self, frame: Frame) {
        match &frame {
            Frame::Pong => {
                trace!("Keep-alive acknowledged");
                return;
            }
            Frame::Alarm { message } => {
                debug!(?message, "Server idle warning");
                self.events.publish(ChannelEvent::IdleWarning {
                    message: message.clone(),
                });
                return;
            }
            Frame::Unhandled { kind, payload } => {
                self.events.publish(ChannelEvent::Unhandled {
                    kind: kind.clone(),
                    payload: payload.clone(),
                });
            }
            _ => {}
        }

        let mut state = self.state.lock();
        let kind = frame.kind().to_string();
        match state.assembler.fold(frame) {
            Ok(Some(applied)) => self.publish_applied(&mut state, applied),
            Ok(None) => {}
            Err(e) => {
                warn!(kind = %kind, error = %e, "Frame dropped");
                self.events.publish(ChannelEvent::Diagnostic(Diagnostic {
                    kind: DiagnosticKind::Protocol,
                    detail: e.to_string(),
                }));
            }
        }
    }

    /// Mark the link gone and interrupt any in-flight turn under one lock.
    pub(crate) fn disconnect(&self) {
        let mut state = self.state.lock();
        if state.connection != ConnectionState::Disconnected {
            state.connection = ConnectionState::Disconnected;
            self.events
                .publish(ChannelEvent::Connection(ConnectionState::Disconnected));
        }
        if let Some(applied) = state.assembler.finish_locally(TurnOutcome::Interrupted) {
            self.publish_applied(&mut state, applied);
        }
    }

    /// End the in-flight turn without a server terminal frame.
    pub(crate) fn finish_locally(&self, outcome: TurnOutcome) {
        let mut state = self.state.lock();
        if let Some(applied) = state.assembler.finish_locally(outcome) {
            self.publish_applied(&mut state, applied);
        }
    }

    pub(crate) fn report(&self, kind: DiagnosticKind, detail: String) {
        self.events
            .publish(ChannelEvent::Diagnostic(Diagnostic { kind, detail }));
    }

    fn publish_applied(&self, state: &mut SessionState, applied: Applied) {
        let Applied { deltas, message } = applied;
        let mut outcome = None;

        for delta in deltas {
            if let Delta::Finished(finished) = &delta {
                outcome = Some(finished.clone());
            }
            self.events.publish(ChannelEvent::Delta {
                delta,
                message: Arc::clone(&message),
            });
        }

        let Some(outcome) = outcome else {
            return;
        };

        if let TurnOutcome::Failed(error) = &outcome {
            warn!(error = %error, "Generation failed");
            self.events.publish(ChannelEvent::GenerationFailed {
                error: error.clone(),
                message: Arc::clone(&message),
            });
        }

        if let Some(turn) = state.turn.take() {
            turn.send_replace(TurnStatus::Finished(outcome));
        }
        state.generation = GenerationState::Idle;
        self.events
            .publish(ChannelEvent::Generation(GenerationState::Idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_disconnect_settles_connection_and_turn_together() {
        let session = Session::new();
        assert!(session.try_begin_connect());
        session.set_connection(ConnectionState::Connected);
        let mut turn = session.begin_turn("hello", Vec::new()).unwrap();
        session.receive(&json!({"type": "content", "content": "Hal"}).to_string());

        let mut sub = session.subscribe();
        session.disconnect();

        assert_eq!(session.connection(), ConnectionState::Disconnected);
        assert_eq!(session.generation(), GenerationState::Idle);
        assert_eq!(turn.finished().await, TurnOutcome::Interrupted);
        assert_eq!(session.messages()[1].content, "Hal");
        assert!(matches!(
            sub.try_recv(),
            Some(ChannelEvent::Connection(ConnectionState::Disconnected))
        ));

        // Repeating it neither republishes nor touches the transcript.
        session.disconnect();
        let remaining: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert!(remaining.iter().all(|event| !matches!(
            event,
            ChannelEvent::Connection(_)
        )));
    }

    #[test]
    fn test_try_begin_connect_only_from_disconnected() {
        let session = Session::new();
        assert!(session.try_begin_connect());
        assert!(!session.try_begin_connect());
        session.disconnect();
        assert!(session.try_begin_connect());
    }
}
