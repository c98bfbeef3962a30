//! Chat channel controllers.
//!
//! [`ChannelController`] runs a turn-based conversation over the persistent
//! WebSocket channel. [`SseChannel`] runs the same protocol one request at a
//! time over the chunked HTTP stream. Both fold frames through the same
//! [`Session`] so observers see identical events whichever transport is used.

mod session;
mod sse;

pub(crate) use session::Session;
pub use sse::SseChannel;

use parking_lot::Mutex;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{Message, TurnOutcome};
use crate::codec::ClientIntent;
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::events::{
    ConnectionState, GenerationState, Subscription, SubscriptionId, TurnHandle,
};
use crate::liveness::{self, LivenessConfig};
use crate::preferences::{MemoryPreferences, PreferenceStore};
use crate::transport::{Connector, WebSocketConnector};

/// Which agent and session a channel talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTarget {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

impl ChannelTarget {
    pub fn new(agent_id: Option<String>, session_id: Option<String>) -> Self {
        Self {
            agent_id,
            session_id,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.agent_id.clone(), config.session_id.clone())
    }
}

/// Per-open overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Idle timeout to negotiate, ahead of the stored preference.
    pub idle_timeout_secs: Option<u64>,
}

struct Link {
    outgoing: mpsc::UnboundedSender<ClientIntent>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ChannelController {
    config: StreamConfig,
    liveness: LivenessConfig,
    connector: Arc<dyn Connector>,
    preferences: Arc<dyn PreferenceStore>,
    session: Arc<Session>,
    link: Mutex<Option<Link>>,
    last_open: Mutex<Option<(ChannelTarget, OpenOptions)>>,
}

impl ChannelController {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            liveness: config.liveness(),
            config,
            connector: Arc::new(WebSocketConnector::new()),
            preferences: Arc::new(MemoryPreferences::new()),
            session: Session::new(),
            link: Mutex::new(None),
            last_open: Mutex::new(None),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = preferences;
        self
    }

    /// Open the channel. A no-op while already connecting or connected.
    pub async fn open(&self, target: ChannelTarget, options: OpenOptions) -> Result<()> {
        if !self.session.try_begin_connect() {
            debug!("Chat channel already open");
            return Ok(());
        }
        *self.last_open.lock() = Some((target.clone(), options));

        // A link that ended on its own still holds its task.
        let stale = self.link.lock().take();
        if let Some(stale) = stale {
            stale.shutdown.cancel();
            if let Err(e) = stale.task.await {
                warn!(error = %e, "Previous chat channel driver ended abnormally");
            }
        }

        let url = match self.channel_url(&target) {
            Ok(url) => url,
            Err(e) => {
                self.session.set_connection(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (sink, source) = match self.connector.connect(&url).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to open chat channel");
                self.session.set_connection(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let idle_timeout = liveness::resolve_idle_timeout(
            options.idle_timeout_secs,
            self.preferences.as_ref(),
            self.config.idle_timeout_secs,
        );
        if let Some(timeout) = idle_timeout {
            let _ = outgoing.send(ClientIntent::Config { timeout });
        }

        let shutdown = CancellationToken::new();
        self.session.set_connection(ConnectionState::Connected);
        let task = tokio::spawn(liveness::run_link(
            Arc::clone(&self.session),
            sink,
            source,
            outgoing_rx,
            shutdown.clone(),
            self.liveness,
        ));

        *self.link.lock() = Some(Link {
            outgoing,
            shutdown,
            task,
        });
        info!(url = %url, idle_timeout = ?idle_timeout, "Chat channel connected");
        Ok(())
    }

    /// Start a turn. Returns as soon as the chat intent is queued.
    pub fn send(&self, text: &str, attachments: Vec<String>) -> Result<TurnHandle> {
        if self.session.connection() != ConnectionState::Connected {
            return Err(StreamError::NotConnected);
        }

        let handle = self.session.begin_turn(text, attachments.clone())?;
        if !self.queue(ClientIntent::chat(text, attachments)) {
            self.session.finish_locally(TurnOutcome::Interrupted);
            return Err(StreamError::NotConnected);
        }
        debug!(message_id = %handle.message_id(), "Turn started");
        Ok(handle)
    }

    /// Ask the server to stop the current turn. The turn ends when the
    /// server's `cancelled` or `error` frame arrives.
    pub fn cancel(&self) {
        if self.session.generation() == GenerationState::Idle {
            return;
        }
        if !self.queue(ClientIntent::Cancel) {
            debug!("Cancel dropped: chat channel is closed");
        }
    }

    /// Change the idle timeout for this and future opens.
    pub fn update_config(&self, idle_timeout_secs: u64) {
        self.preferences.set_idle_timeout_secs(idle_timeout_secs);
        if self.session.connection() == ConnectionState::Connected {
            self.queue(ClientIntent::Config {
                timeout: idle_timeout_secs,
            });
        }
    }

    /// Tear the link down and open it again with the last target.
    pub async fn reconnect(&self) -> Result<()> {
        self.close().await;
        tokio::time::sleep(self.liveness.reconnect_delay).await;

        let (target, options) = self
            .last_open
            .lock()
            .clone()
            .unwrap_or_else(|| (ChannelTarget::from_config(&self.config), OpenOptions::default()));
        self.open(target, options).await
    }

    /// Close the link. Safe to call at any time and any number of times.
    pub async fn close(&self) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            link.shutdown.cancel();
            if let Err(e) = link.task.await {
                warn!(error = %e, "Chat channel driver ended abnormally");
            }
        }
        self.session.disconnect();
    }

    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.session.unsubscribe(id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection()
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

    fn queue(&self, intent: ClientIntent) -> bool {
        match self.link.lock().as_ref() {
            Some(link) => link.outgoing.send(intent).is_ok(),
            None => false,
        }
    }

    fn channel_url(&self, target: &ChannelTarget) -> Result<String> {
        let ws_url = self.config.ws_url();
        let mut url = Url::parse(&ws_url)
            .map_err(|e| StreamError::Config(format!("Invalid channel URL {}: {}", ws_url, e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(agent_id) = &target.agent_id {
                query.append_pair("agent_id", agent_id);
            }
            if let Some(session_id) = &target.session_id {
                query.append_pair("session_id", session_id);
            }
        }
        let mut url = url.to_string();
        if url.ends_with('?') {
            url.pop();
        }
        Ok(url)
    }
}

impl Drop for ChannelController {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.shutdown.cancel();
        }
    }
}
