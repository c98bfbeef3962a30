//! Channel events, subscriptions and per-turn completion handles.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};

use crate::assembler::{Delta, Message, TurnOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Generating,
}

/// Recoverable faults reported alongside the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Decode,
    Protocol,
    Transport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connection(ConnectionState),
    Generation(GenerationState),
    /// A change folded into the in-flight message, with the resulting snapshot.
    Delta {
        delta: Delta,
        message: Arc<Message>,
    },
    /// The server ended the turn with an `error` frame.
    GenerationFailed {
        error: String,
        message: Arc<Message>,
    },
    /// Server warning that the idle timeout will close the channel.
    IdleWarning { message: Option<String> },
    /// A frame kind this client does not understand.
    Unhandled { kind: String, payload: Value },
    Diagnostic(Diagnostic),
}

pub type SubscriptionId = u64;

/// Receiving end of a channel subscription.
///
/// Dropping it unsubscribes on the next published event.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event; `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Default)]
pub(crate) struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<ChannelEvent>>>,
}

impl EventHub {
    pub(crate) fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, tx);
        Subscription { id, rx }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    pub(crate) fn publish(&self, event: ChannelEvent) {
        self.subscribers
            .lock()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Streaming,
    Finished(TurnOutcome),
}

/// Completion signal for one turn, returned by `send`.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    message_id: String,
    status: watch::Receiver<TurnStatus>,
}

impl TurnHandle {
    pub(crate) fn new(message_id: String) -> (watch::Sender<TurnStatus>, Self) {
        let (tx, status) = watch::channel(TurnStatus::Streaming);
        (tx, Self { message_id, status })
    }

    /// Id of the assistant message this turn streams into.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn status(&self) -> TurnStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        matches!(*self.status.borrow(), TurnStatus::Finished(_))
    }

    /// Wait for the terminal outcome of this turn.
    pub async fn finished(&mut self) -> TurnOutcome {
        loop {
            let status = self.status.borrow_and_update().clone();
            if let TurnStatus::Finished(outcome) = status {
                return outcome;
            }
            if self.status.changed().await.is_err() {
                return match self.status() {
                    TurnStatus::Finished(outcome) => outcome,
                    TurnStatus::Streaming => TurnOutcome::Interrupted,
                };
            }
        }
    }
}
