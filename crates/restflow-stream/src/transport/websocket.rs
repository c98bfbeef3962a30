//! WebSocket connector built on tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Connector, WireSink, WireSource};
use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource)> {
        tracing::debug!("Connecting to chat channel: {}", url);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| StreamError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .sink_map_err(|e| StreamError::Transport(format!("WebSocket send failed: {}", e)))
            .with(|text: String| future::ready(Ok::<_, StreamError>(WsMessage::Text(text.into()))));

        // Control frames are answered by tungstenite itself; only text reaches the codec.
        let source = ws_read.filter_map(|msg| {
            future::ready(match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => Some(Err(StreamError::Decode(
                        "binary frame is not UTF-8".to_string(),
                    ))),
                },
                Ok(WsMessage::Close(frame)) => {
                    tracing::info!(?frame, "Chat channel closed by server");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(StreamError::Transport(format!(
                    "WebSocket read error: {}",
                    e
                )))),
            })
        });

        Ok((Box::pin(sink), Box::pin(source)))
    }
}
