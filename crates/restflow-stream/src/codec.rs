//! Wire codec for the chat stream protocol.
//!
//! Outgoing traffic is a small set of control and chat intents serialized as
//! `type`-tagged JSON. Incoming traffic is decoded in two stages: the `type`
//! tag is read first, then the payload is validated against the shape for that
//! tag. Unknown tags are preserved as [`Frame::Unhandled`] so newer server
//! events reach the caller instead of disappearing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StreamError};

/// Control or chat intent sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientIntent {
    /// Start a turn.
    Chat {
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
    },
    /// Cancel the current turn.
    Cancel,
    /// Keep-alive probe.
    Ping,
    /// Update the server-side idle timeout (seconds).
    Config { timeout: u64 },
}

impl ClientIntent {
    pub fn chat(message: impl Into<String>, images: Vec<String>) -> Self {
        Self::Chat {
            message: message.into(),
            images,
        }
    }
}

/// Request body for the chunked HTTP transport.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest<'a> {
    pub message: &'a str,
    pub session_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
}

/// Canonical tool-call announcement, whatever shape the server sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallAnnouncement {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// One decoded protocol event.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keep-alive acknowledgment.
    Pong,
    /// Server warning that the idle timeout is about to close the channel.
    Alarm { message: Option<String> },
    Content { content: String },
    Thinking { content: String },
    ToolCall(ToolCallAnnouncement),
    ToolStart {
        id: Option<String>,
        name: String,
    },
    ToolResult {
        id: Option<String>,
        name: String,
        result: Value,
        success: bool,
    },
    Done,
    Error { error: String },
    Cancelled { content: Option<String> },
    /// A frame whose `type` this client does not know.
    Unhandled { kind: String, payload: Value },
}

impl Frame {
    /// Wire `type` tag of this frame.
    pub fn kind(&self) -> &str {
        match self {
            Self::Pong => "pong",
            Self::Alarm { .. } => "alarm",
            Self::Content { .. } => "content",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall(_) => "tool_call",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Cancelled { .. } => "cancelled",
            Self::Unhandled { kind, .. } => kind,
        }
    }

    /// `done`, `error` and `cancelled` end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. } | Self::Cancelled { .. })
    }

    /// Pong and alarm frames carry no message data.
    pub fn is_liveness(&self) -> bool {
        matches!(self, Self::Pong | Self::Alarm { .. })
    }
}

#[derive(Deserialize)]
struct AlarmWire {
    #[serde(default)]
    message: Option<String>,
}

/// Text carried by `content` and `thinking` frames. Older servers send it as
/// `text` or `thinking`; `content` wins when several are present.
#[derive(Deserialize)]
struct TextWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl TextWire {
    fn into_text(self, kind: &str) -> Result<String> {
        self.content
            .or(self.thinking)
            .or(self.text)
            .ok_or_else(|| StreamError::Decode(format!("`{}` frame without text", kind)))
    }
}

#[derive(Deserialize)]
struct FunctionWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct ToolCallWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "args", alias = "input")]
    arguments: Option<Value>,
    /// Older servers nest the call under `function`.
    #[serde(default)]
    function: Option<FunctionWire>,
}

#[derive(Deserialize)]
struct ToolStartWire {
    #[serde(default)]
    id: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct ToolResultWire {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    result: Value,
    #[serde(default = "default_success")]
    success: bool,
}

#[derive(Deserialize)]
struct ErrorWire {
    #[serde(default = "unknown_error", alias = "message")]
    error: String,
}

#[derive(Deserialize)]
struct CancelledWire {
    #[serde(default)]
    content: Option<String>,
}

fn default_success() -> bool {
    true
}

fn unknown_error() -> String {
    "Unknown error".to_string()
}

/// Encode an outgoing intent as a JSON text frame.
pub fn encode(intent: &ClientIntent) -> Result<String> {
    Ok(serde_json::to_string(intent)?)
}

/// Encode the request body for the chunked HTTP transport.
pub fn encode_stream_request(request: &StreamRequest<'_>) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Decode one incoming JSON text frame.
pub fn decode(raw: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| StreamError::Decode(format!("invalid JSON: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| StreamError::Decode("missing `type` tag".to_string()))?
        .to_string();

    let frame = match kind.as_str() {
        "pong" => Frame::Pong,
        "alarm" => {
            let wire: AlarmWire = payload(&kind, value)?;
            Frame::Alarm {
                message: wire.message,
            }
        }
        "content" => {
            let wire: TextWire = payload(&kind, value)?;
            Frame::Content {
                content: wire.into_text(&kind)?,
            }
        }
        "thinking" => {
            let wire: TextWire = payload(&kind, value)?;
            Frame::Thinking {
                content: wire.into_text(&kind)?,
            }
        }
        "tool_call" => Frame::ToolCall(normalize_tool_call(payload(&kind, value)?)?),
        "tool_start" => {
            let wire: ToolStartWire = payload(&kind, value)?;
            Frame::ToolStart {
                id: wire.id,
                name: wire.name,
            }
        }
        "tool_result" => {
            let wire: ToolResultWire = payload(&kind, value)?;
            Frame::ToolResult {
                id: wire.id,
                name: wire.name,
                result: wire.result,
                success: wire.success,
            }
        }
        "done" => Frame::Done,
        "error" => {
            let wire: ErrorWire = payload(&kind, value)?;
            Frame::Error { error: wire.error }
        }
        "cancelled" => {
            let wire: CancelledWire = payload(&kind, value)?;
            Frame::Cancelled {
                content: wire.content.filter(|c| !c.is_empty()),
            }
        }
        _ => Frame::Unhandled {
            kind,
            payload: value,
        },
    };

    Ok(frame)
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| StreamError::Decode(format!("malformed `{}` frame: {}", kind, e)))
}

fn normalize_tool_call(wire: ToolCallWire) -> Result<ToolCallAnnouncement> {
    let (nested_name, nested_arguments) = match wire.function {
        Some(function) => (function.name, function.arguments),
        None => (None, None),
    };

    let name = wire
        .name
        .or(nested_name)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StreamError::Decode("`tool_call` frame without a name".to_string()))?;

    let arguments = wire
        .arguments
        .or(nested_arguments)
        .map(parse_arguments)
        .unwrap_or(Value::Null);

    Ok(ToolCallAnnouncement {
        id: wire.id.filter(|id| !id.is_empty()),
        name,
        arguments,
    })
}

/// Arguments may arrive as a JSON object or as JSON encoded in a string.
fn parse_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(text) => {
            if text.trim().is_empty() {
                return Value::Null;
            }
            match serde_json::from_str(&text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(error = %e, "Tool call arguments are not JSON, keeping raw text");
                    Value::String(text)
                }
            }
        }
        other => other,
    }
}
