//! Error types for the streaming transport

use thiserror::Error;

/// Streaming transport error types
#[derive(Error, Debug)]
pub enum StreamError {
    /// Connect or send failure on the underlying transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single incoming frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A frame was well-formed but made no sense in the current turn state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel is not connected")]
    NotConnected,

    /// The server reported an `error` frame for the current turn.
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("A turn is already in flight on this channel")]
    TurnInFlight,

    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl StreamError {
    /// Whether the channel keeps running after this error.
    ///
    /// Decode and protocol faults only cost the offending frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Protocol(_))
    }
}

/// Result type alias for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;
