//! Stream client configuration.
//!
//! Loaded from `$RESTFLOW_STREAM_CONFIG`, then `~/.config/restflow/stream.toml`,
//! then environment variables, then defaults.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::liveness::LivenessConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// HTTP(S) base URL of the RestFlow server.
    pub base_url: String,
    /// Path of the persistent chat channel.
    pub ws_path: String,
    /// Path of the chunked streaming endpoint.
    pub stream_path: String,
    pub keepalive_interval: Duration,
    pub reconnect_delay: Duration,
    /// Idle timeout negotiated on open when neither the caller nor the
    /// preference store provide one.
    pub idle_timeout_secs: Option<u64>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_path: default_ws_path(),
            stream_path: default_stream_path(),
            keepalive_interval: Duration::from_secs(default_keepalive_secs()),
            reconnect_delay: Duration::from_millis(default_reconnect_delay_ms()),
            idle_timeout_secs: None,
            agent_id: None,
            session_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    liveness: LivenessSection,
    #[serde(default)]
    target: TargetSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_ws_path")]
    ws_path: String,
    #[serde(default = "default_stream_path")]
    stream_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_path: default_ws_path(),
            stream_path: default_stream_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LivenessSection {
    #[serde(default = "default_keepalive_secs")]
    keepalive_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    reconnect_delay_ms: u64,
    #[serde(default)]
    idle_timeout_secs: Option<u64>,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            idle_timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TargetSection {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_ws_path() -> String {
    "/api/chat/ws".to_string()
}

fn default_stream_path() -> String {
    "/api/chat/stream".to_string()
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

impl StreamConfig {
    /// Load configuration from the first available source.
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            return Self::load_from_path(&path);
        }
        Ok(Self::from_env())
    }

    /// Load configuration from a specific TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            StreamError::Config(format!("Failed to read config {}: {}", path.display(), err))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(contents)?;
        Ok(Self {
            base_url: file.server.base_url.trim_end_matches('/').to_string(),
            ws_path: file.server.ws_path,
            stream_path: file.server.stream_path,
            keepalive_interval: Duration::from_secs(file.liveness.keepalive_secs),
            reconnect_delay: Duration::from_millis(file.liveness.reconnect_delay_ms),
            idle_timeout_secs: file.liveness.idle_timeout_secs,
            agent_id: file.target.agent_id,
            session_id: file.target.session_id,
        })
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = env::var("RESTFLOW_SERVER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        let keepalive_interval = env::var("RESTFLOW_KEEPALIVE_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.keepalive_interval);
        let idle_timeout_secs = env::var("RESTFLOW_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok());

        Self {
            base_url,
            keepalive_interval,
            idle_timeout_secs,
            ..defaults
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            keepalive_interval: self.keepalive_interval,
            reconnect_delay: self.reconnect_delay,
        }
    }

    /// WebSocket URL of the persistent channel, `http(s)` mapped to `ws(s)`.
    pub fn ws_url(&self) -> String {
        let base = &self.base_url;
        if let Some(host) = base.strip_prefix("https://") {
            format!("wss://{}{}", host, self.ws_path)
        } else if let Some(host) = base.strip_prefix("http://") {
            format!("ws://{}{}", host, self.ws_path)
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            format!("{}{}", base, self.ws_path)
        } else {
            format!("ws://{}{}", base, self.ws_path)
        }
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("RESTFLOW_STREAM_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("restflow").join("stream.toml"))
        .filter(|path| path.exists())
}
