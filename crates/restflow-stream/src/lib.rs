//! RestFlow Stream - incremental chat response streaming
//!
//! This crate provides:
//! - Wire codec for the chat stream protocol
//! - Chunk buffer for `data:`-prefixed HTTP streams
//! - Stream assembler that folds frames into conversation messages
//! - Persistent WebSocket channel with keep-alive and idle-timeout control
//! - One-shot chunked HTTP channel sharing the same event model

pub mod assembler;
pub mod channel;
pub mod chunk_buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod liveness;
pub mod preferences;
pub mod transport;

// Re-export commonly used types
pub use assembler::{
    Delta, EMPTY_RESPONSE_PLACEHOLDER, Message, Role, StreamAssembler, ToolCallRecord,
    ToolCallStatus, TurnOutcome,
};
pub use channel::{ChannelController, ChannelTarget, OpenOptions, SseChannel};
pub use chunk_buffer::ChunkBuffer;
pub use codec::{ClientIntent, Frame};
pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use events::{
    ChannelEvent, ConnectionState, Diagnostic, DiagnosticKind, GenerationState, Subscription,
    SubscriptionId, TurnHandle, TurnStatus,
};
pub use liveness::LivenessConfig;
pub use preferences::{MemoryPreferences, PreferenceStore};
pub use transport::{Connector, WebSocketConnector, WireSink, WireSource};
