//! One-shot chat turns over the chunked HTTP stream.

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ChannelTarget, Session};
use crate::assembler::{Message, TurnOutcome};
use crate::chunk_buffer::ChunkBuffer;
use crate::codec::{self, Frame, StreamRequest};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{
    DiagnosticKind, GenerationState, Subscription, SubscriptionId, TurnStatus,
};

/// Chat client for the streaming endpoint.
///
/// Each `send` is a single POST whose response body is folded as it arrives.
/// There is no persistent connection, so no keep-alive either.
pub struct SseChannel {
    client: Client,
    url: String,
    target: ChannelTarget,
    session: Arc<Session>,
    inflight: Mutex<Option<CancellationToken>>,
}

impl SseChannel {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            client: Client::new(),
            url: config.stream_url(),
            target: ChannelTarget::from_config(config),
            session: Session::new(),
            inflight: Mutex::new(None),
        }
    }

    pub fn with_target(mut self, target: ChannelTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Run one turn to completion and return how it ended.
    ///
    /// Request and HTTP failures end the turn as failed and are returned as
    /// `Transport` errors; the partial message stays in the transcript.
    pub async fn send(&self, text: &str) -> Result<TurnOutcome> {
        // The turn starts and its token is armed under the `inflight` lock,
        // which `cancel` also takes.
        let token = CancellationToken::new();
        let handle = {
            let mut inflight = self.inflight.lock();
            let handle = self.session.begin_turn(text, Vec::new())?;
            *inflight = Some(token.clone());
            handle
        };

        let result = self.stream_turn(text, &token).await;
        self.inflight.lock().take();

        if let Err(e) = result {
            let e = match e {
                StreamError::Http(e) => StreamError::Transport(e.to_string()),
                other => other,
            };
            warn!(error = %e, "Chat stream failed");
            self.session
                .report(DiagnosticKind::Transport, e.to_string());
            self.session
                .finish_locally(TurnOutcome::Failed(e.to_string()));
            return Err(e);
        }

        if token.is_cancelled() {
            self.session.finish_locally(TurnOutcome::Cancelled);
        } else if self.session.generation() == GenerationState::Generating {
            debug!("Chat stream ended without a terminal record");
            self.session.dispatch(Frame::Done);
        }

        Ok(match handle.status() {
            TurnStatus::Finished(outcome) => outcome,
            TurnStatus::Streaming => TurnOutcome::Interrupted,
        })
    }

    /// Abort the in-flight request, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.inflight.lock().as_ref() {
            token.cancel();
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.session.unsubscribe(id)
    }

    pub fn generation_state(&self) -> GenerationState {
        self.session.generation()
    }

    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.session.messages()
    }

    pub fn current_message(&self) -> Option<Arc<Message>> {
        self.session.current_message()
    }

    async fn stream_turn(&self, text: &str, token: &CancellationToken) -> Result<()> {
        let body = codec::encode_stream_request(&StreamRequest {
            message: text,
            session_id: self.target.session_id.as_deref(),
            agent_id: self.target.agent_id.as_deref(),
        })?;

        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .body(body)
            .send();

        let response = tokio::select! {
            response = request => response?,
            _ = token.cancelled() => return Ok(()),
        };

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(StreamError::Transport(format!(
                "Stream request failed ({}): {}",
                status, error
            )));
        }

        let mut byte_stream = response.bytes_stream();
        let mut buffer = ChunkBuffer::new();

        while self.session.generation() == GenerationState::Generating {
            let chunk = tokio::select! {
                chunk = byte_stream.next() => chunk,
                _ = token.cancelled() => break,
            };
            let Some(chunk) = chunk else {
                break;
            };
            for record in buffer.push(&chunk?) {
                self.session.receive(&record);
            }
        }

        buffer.finish();
        Ok(())
    }
}
