//! Transport seam for the persistent chat channel.
//!
//! A [`Connector`] opens one link and hands back its two halves as JSON text
//! sink and source. The channel controller never touches sockets directly.

mod websocket;

pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

use crate::error::{Result, StreamError};

/// Outgoing half of a link: JSON text frames.
pub type WireSink = Pin<Box<dyn Sink<String, Error = StreamError> + Send>>;

/// Incoming half of a link; ends when the link closes.
pub type WireSource = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to `url`.
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource)>;
}
