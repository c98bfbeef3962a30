//! Liveness management for the persistent chat channel.
//!
//! Every open link is driven by a single task running [`run_link`]. The task
//! owns both transport halves, the keep-alive timer and the outgoing intent
//! queue, so nothing outlives the link once the task returns.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::Session;
use crate::codec::{self, ClientIntent};
use crate::error::Result;
use crate::events::DiagnosticKind;
use crate::preferences::PreferenceStore;
use crate::transport::{WireSink, WireSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Period between keep-alive pings. Zero disables them.
    pub keepalive_interval: Duration,
    /// Pause between teardown and re-open on `reconnect`.
    pub reconnect_delay: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

impl LivenessConfig {
    /// Keep-alive timer whose first tick fires one full period after open.
    pub fn keepalive_timer(&self) -> Option<Interval> {
        if self.keepalive_interval.is_zero() {
            return None;
        }
        let period = self.keepalive_interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(timer)
    }
}

/// Pick the idle timeout to negotiate: explicit override, then the stored
/// preference, then the configured fallback.
pub fn resolve_idle_timeout(
    requested: Option<u64>,
    preferences: &dyn PreferenceStore,
    fallback: Option<u64>,
) -> Option<u64> {
    requested
        .or_else(|| preferences.idle_timeout_secs())
        .or(fallback)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn send_intent(sink: &mut WireSink, intent: &ClientIntent) -> Result<()> {
    let text = codec::encode(intent)?;
    sink.send(text).await
}

/// Drive one link until it closes, then settle the session.
///
/// On exit the session is marked disconnected and any in-flight turn ends
/// with [`TurnOutcome::Interrupted`](crate::assembler::TurnOutcome::Interrupted).
pub(crate) async fn run_link(
    session: Arc<Session>,
    mut sink: WireSink,
    mut source: WireSource,
    mut outgoing: mpsc::UnboundedReceiver<ClientIntent>,
    shutdown: CancellationToken,
    config: LivenessConfig,
) {
    let mut keepalive = config.keepalive_timer();

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break "closed locally",
            intent = outgoing.recv() => {
                let Some(intent) = intent else {
                    break "controller dropped";
                };
                if let Err(e) = send_intent(&mut sink, &intent).await {
                    warn!(error = %e, "Failed to send frame");
                    session.report(DiagnosticKind::Transport, e.to_string());
                    break "send failed";
                }
            }
            _ = next_tick(&mut keepalive) => {
                trace!("Sending keep-alive ping");
                if let Err(e) = send_intent(&mut sink, &ClientIntent::Ping).await {
                    warn!(error = %e, "Keep-alive ping failed");
                    session.report(DiagnosticKind::Transport, e.to_string());
                    break "keep-alive failed";
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(text)) => session.receive(&text),
                Some(Err(e)) if e.is_recoverable() => {
                    warn!(error = %e, "Dropping unreadable frame");
                    session.report(DiagnosticKind::Decode, e.to_string());
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Chat channel transport failed");
                    session.report(DiagnosticKind::Transport, e.to_string());
                    break "transport error";
                }
                None => break "closed by server",
            },
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Closing chat channel sink failed");
    }
    info!(reason, "Chat channel link stopped");

    session.disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferences;

    #[test]
    fn test_resolve_idle_timeout_precedence() {
        let empty = MemoryPreferences::new();
        let stored = MemoryPreferences::with_idle_timeout(600);

        assert_eq!(resolve_idle_timeout(Some(60), &stored, Some(1800)), Some(60));
        assert_eq!(resolve_idle_timeout(None, &stored, Some(1800)), Some(600));
        assert_eq!(resolve_idle_timeout(None, &empty, Some(1800)), Some(1800));
        assert_eq!(resolve_idle_timeout(None, &empty, None), None);
    }

    #[test]
    fn test_default_config() {
        let config = LivenessConfig::default();
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_interval_disables_keepalive() {
        let config = LivenessConfig {
            keepalive_interval: Duration::ZERO,
            ..LivenessConfig::default()
        };
        assert!(config.keepalive_timer().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_keepalive_after_one_period() {
        let config = LivenessConfig {
            keepalive_interval: Duration::from_secs(30),
            ..LivenessConfig::default()
        };
        let start = Instant::now();
        let mut timer = config.keepalive_timer();

        next_tick(&mut timer).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));

        next_tick(&mut timer).await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }
}
