//! Stream assembler: folds decoded frames into the conversation transcript.
//!
//! The assembler owns the canonical message list. Messages are stored behind
//! `Arc` and mutated copy-on-write, so every snapshot handed to an observer
//! stays frozen while the in-flight message keeps growing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::codec::{Frame, ToolCallAnnouncement};
use crate::error::{Result, StreamError};

/// Content substituted when a turn completes without any text.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "(No response)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String, attachments: Vec<String>, is_streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            thinking: String::new(),
            tool_calls: Vec::new(),
            is_streaming,
            attachments,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<String>) -> Self {
        Self::new(Role::User, content.into(), attachments, false)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant, String::new(), Vec::new(), true)
    }

    pub fn tool_call(&self, name: &str) -> Option<&ToolCallRecord> {
        self.tool_calls.iter().find(|call| call.name == name)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    /// The server sent an `error` frame.
    Failed(String),
    /// The transport went away before a terminal frame arrived.
    Interrupted,
}

impl TurnOutcome {
    /// Surface a server-reported failure as [`StreamError::Generation`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Failed(error) => Err(StreamError::Generation(error)),
            other => Ok(other),
        }
    }
}

/// One change applied to the in-flight message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Content(String),
    Thinking(String),
    ToolCallAdded(ToolCallRecord),
    ToolCallUpdated(ToolCallRecord),
    Finished(TurnOutcome),
}

/// Result of folding one frame.
#[derive(Debug, Clone)]
pub struct Applied {
    pub deltas: Vec<Delta>,
    /// Snapshot of the message after the fold.
    pub message: Arc<Message>,
}

impl Applied {
    pub fn outcome(&self) -> Option<&TurnOutcome> {
        self.deltas.iter().find_map(|delta| match delta {
            Delta::Finished(outcome) => Some(outcome),
            _ => None,
        })
    }
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    messages: Vec<Arc<Message>>,
    /// Index of the streaming assistant message.
    current: Option<usize>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn current(&self) -> Option<&Arc<Message>> {
        self.current.map(|index| &self.messages[index])
    }

    pub fn is_generating(&self) -> bool {
        self.current.is_some()
    }

    pub fn push_user(&mut self, content: impl Into<String>, attachments: Vec<String>) -> Arc<Message> {
        let message = Arc::new(Message::user(content, attachments));
        self.messages.push(Arc::clone(&message));
        message
    }

    /// Open a new streaming assistant message.
    pub fn begin_turn(&mut self) -> Result<Arc<Message>> {
        if self.current.is_some() {
            return Err(StreamError::TurnInFlight);
        }
        let message = Arc::new(Message::assistant());
        self.messages.push(Arc::clone(&message));
        self.current = Some(self.messages.len() - 1);
        Ok(message)
    }

    /// Fold one frame into the in-flight message.
    ///
    /// Returns `Ok(None)` for frames that carry no message data. A protocol
    /// error leaves the message untouched; the caller logs it and continues.
    pub fn fold(&mut self, frame: Frame) -> Result<Option<Applied>> {
        if frame.is_liveness() {
            return Ok(None);
        }
        if let Frame::Unhandled { kind, .. } = &frame {
            tracing::debug!(kind = %kind, "Ignoring unhandled frame kind");
            return Ok(None);
        }

        let Some(index) = self.current else {
            return Err(StreamError::Protocol(format!(
                "`{}` frame with no turn in flight",
                frame.kind()
            )));
        };

        let message = Arc::make_mut(&mut self.messages[index]);
        let deltas = match frame {
            Frame::Content { content } => {
                message.content.push_str(&content);
                vec![Delta::Content(content)]
            }
            Frame::Thinking { content } => {
                message.thinking.push_str(&content);
                vec![Delta::Thinking(content)]
            }
            Frame::ToolCall(announcement) => {
                let record = announce_tool_call(message, announcement);
                vec![Delta::ToolCallAdded(record)]
            }
            Frame::ToolStart { id, name } => {
                let position = find_tool_call(message, id.as_deref(), &name, |status| {
                    status == ToolCallStatus::Pending
                })
                .ok_or_else(|| {
                    StreamError::Protocol(format!("`tool_start` for unknown tool call `{}`", name))
                })?;
                let record = &mut message.tool_calls[position];
                record.status = ToolCallStatus::Executing;
                vec![Delta::ToolCallUpdated(record.clone())]
            }
            Frame::ToolResult {
                id,
                name,
                result,
                success,
            } => {
                let position = find_tool_call(message, id.as_deref(), &name, |status| {
                    !status.is_settled()
                })
                .ok_or_else(|| {
                    StreamError::Protocol(format!(
                        "`tool_result` for unknown tool call `{}`",
                        name
                    ))
                })?;
                let record = &mut message.tool_calls[position];
                record.status = if success {
                    ToolCallStatus::Completed
                } else {
                    ToolCallStatus::Failed
                };
                record.result = Some(result);
                vec![Delta::ToolCallUpdated(record.clone())]
            }
            Frame::Done => {
                let mut deltas = Vec::with_capacity(2);
                if message.content.is_empty() {
                    message.content.push_str(EMPTY_RESPONSE_PLACEHOLDER);
                    deltas.push(Delta::Content(EMPTY_RESPONSE_PLACEHOLDER.to_string()));
                }
                message.is_streaming = false;
                deltas.push(Delta::Finished(TurnOutcome::Completed));
                deltas
            }
            Frame::Error { error } => {
                message.is_streaming = false;
                vec![Delta::Finished(TurnOutcome::Failed(error))]
            }
            Frame::Cancelled { content } => {
                let mut deltas = Vec::with_capacity(2);
                if let Some(content) = content {
                    message.content.push_str(&content);
                    deltas.push(Delta::Content(content));
                }
                message.is_streaming = false;
                deltas.push(Delta::Finished(TurnOutcome::Cancelled));
                deltas
            }
            Frame::Pong | Frame::Alarm { .. } | Frame::Unhandled { .. } => return Ok(None),
        };

        let finished = !message.is_streaming;
        let snapshot = Arc::clone(&self.messages[index]);
        if finished {
            self.current = None;
        }

        Ok(Some(Applied {
            deltas,
            message: snapshot,
        }))
    }

    /// End the in-flight turn without a terminal frame.
    ///
    /// Accumulated content and tool state are kept as they are.
    pub fn finish_locally(&mut self, outcome: TurnOutcome) -> Option<Applied> {
        let index = self.current.take()?;
        let message = Arc::make_mut(&mut self.messages[index]);
        message.is_streaming = false;
        Some(Applied {
            deltas: vec![Delta::Finished(outcome)],
            message: Arc::clone(&self.messages[index]),
        })
    }
}

fn announce_tool_call(message: &mut Message, announcement: ToolCallAnnouncement) -> ToolCallRecord {
    let record = ToolCallRecord {
        id: announcement
            .id
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
        name: announcement.name,
        arguments: announcement.arguments,
        status: ToolCallStatus::Pending,
        result: None,
    };
    message.tool_calls.push(record.clone());
    record
}

/// Match by id when the frame has one, otherwise the latest record with this
/// name. Either way the record's status must be one that `accepts` the frame.
fn find_tool_call(
    message: &Message,
    id: Option<&str>,
    name: &str,
    accepts: impl Fn(ToolCallStatus) -> bool,
) -> Option<usize> {
    if let Some(id) = id
        && let Some(position) = message.tool_calls.iter().position(|call| call.id == id)
    {
        return accepts(message.tool_calls[position].status).then_some(position);
    }
    message
        .tool_calls
        .iter()
        .rposition(|call| call.name == name && accepts(call.status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use serde_json::json;

    fn generating() -> StreamAssembler {
        let mut assembler = StreamAssembler::new();
        assembler.push_user("hello", vec![]);
        assembler.begin_turn().unwrap();
        assembler
    }

    fn content(text: &str) -> Frame {
        Frame::Content {
            content: text.to_string(),
        }
    }

    fn fold_raw(assembler: &mut StreamAssembler, raw: &str) -> Option<Applied> {
        assembler.fold(decode(raw).unwrap()).unwrap()
    }

    #[test]
    fn test_content_fragments_concatenate_in_order() {
        let fragments = ["The ", "quick ", "", "brown ", "fox"];
        let mut assembler = generating();
        for fragment in fragments {
            assembler.fold(content(fragment)).unwrap();
        }
        let message = assembler.current().unwrap();
        assert_eq!(message.content, fragments.concat());
        assert!(message.is_streaming);
    }

    #[test]
    fn test_hello_scenario() {
        let mut assembler = generating();
        fold_raw(&mut assembler, r#"{"type":"content","content":"He"}"#);
        fold_raw(&mut assembler, r#"{"type":"content","content":"llo"}"#);
        let applied = fold_raw(&mut assembler, r#"{"type":"done"}"#).unwrap();

        assert_eq!(applied.message.content, "Hello");
        assert!(!applied.message.is_streaming);
        assert_eq!(applied.outcome(), Some(&TurnOutcome::Completed));
        assert!(!assembler.is_generating());
        assert_eq!(assembler.messages().len(), 2);
        assert_eq!(assembler.messages()[0].role, Role::User);
    }

    #[test]
    fn test_thinking_is_separate_from_content() {
        let mut assembler = generating();
        assembler
            .fold(Frame::Thinking {
                content: "plan".to_string(),
            })
            .unwrap();
        assembler.fold(content("answer")).unwrap();
        let message = assembler.current().unwrap();
        assert_eq!(message.thinking, "plan");
        assert_eq!(message.content, "answer");
    }

    #[test]
    fn test_tool_lifecycle_scenario() {
        let mut assembler = generating();
        fold_raw(&mut assembler, r#"{"type":"tool_call","name":"search"}"#);
        fold_raw(&mut assembler, r#"{"type":"tool_start","name":"search"}"#);
        fold_raw(
            &mut assembler,
            r#"{"type":"tool_result","name":"search","result":{"hits":3}}"#,
        );
        fold_raw(&mut assembler, r#"{"type":"content","content":"Found 3"}"#);
        let applied = fold_raw(&mut assembler, r#"{"type":"done"}"#).unwrap();

        let message = applied.message;
        assert_eq!(message.tool_calls.len(), 1);
        let call = &message.tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.result, Some(json!({"hits": 3})));
        assert!(call.id.starts_with("call_"));
        assert_eq!(message.content, "Found 3");
    }

    #[test]
    fn test_started_tool_without_result_stays_executing() {
        let mut assembler = generating();
        fold_raw(&mut assembler, r#"{"type":"tool_call","id":"c1","name":"fetch"}"#);
        fold_raw(&mut assembler, r#"{"type":"tool_start","name":"fetch"}"#);
        let applied = fold_raw(&mut assembler, r#"{"type":"done"}"#).unwrap();
        assert_eq!(applied.message.tool_calls[0].status, ToolCallStatus::Executing);
    }

    #[test]
    fn test_orphan_tool_result_is_noop() {
        let mut assembler = generating();
        assembler.fold(content("x")).unwrap();
        let before = Arc::clone(assembler.current().unwrap());

        let err = assembler
            .fold(decode(r#"{"type":"tool_result","name":"search","result":1}"#).unwrap())
            .unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));

        let after = assembler.current().unwrap();
        assert!(after.tool_calls.is_empty());
        assert_eq!(**after, *before);
        assert!(assembler.is_generating());
    }

    #[test]
    fn test_failed_tool_result() {
        let mut assembler = generating();
        fold_raw(&mut assembler, r#"{"type":"tool_call","id":"c1","name":"bash"}"#);
        fold_raw(
            &mut assembler,
            r#"{"type":"tool_result","id":"c1","name":"bash","result":"exit 1","success":false}"#,
        );
        let call = &assembler.current().unwrap().tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Failed);
        assert_eq!(call.result, Some(json!("exit 1")));
    }

    #[test]
    fn test_settled_tool_call_rejects_late_frames_by_id() {
        let mut assembler = generating();
        fold_raw(&mut assembler, r#"{"type":"tool_call","id":"c1","name":"search"}"#);
        fold_raw(&mut assembler, r#"{"type":"tool_start","id":"c1","name":"search"}"#);
        fold_raw(
            &mut assembler,
            r#"{"type":"tool_result","id":"c1","name":"search","result":1}"#,
        );

        let late_start = decode(r#"{"type":"tool_start","id":"c1","name":"search"}"#).unwrap();
        assert!(matches!(
            assembler.fold(late_start),
            Err(StreamError::Protocol(_))
        ));
        let late_result = decode(
            r#"{"type":"tool_result","id":"c1","name":"search","result":2,"success":false}"#,
        )
        .unwrap();
        assert!(matches!(
            assembler.fold(late_result),
            Err(StreamError::Protocol(_))
        ));

        let call = &assembler.current().unwrap().tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.result, Some(json!(1)));
    }

    #[test]
    fn test_repeated_tool_name_matches_latest_open_call() {
        let mut assembler = generating();
        fold_raw(&mut assembler, r#"{"type":"tool_call","id":"a","name":"search"}"#);
        fold_raw(&mut assembler, r#"{"type":"tool_result","name":"search","result":1}"#);
        fold_raw(&mut assembler, r#"{"type":"tool_call","id":"b","name":"search"}"#);
        fold_raw(&mut assembler, r#"{"type":"tool_result","name":"search","result":2}"#);

        let calls = &assembler.current().unwrap().tool_calls;
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].result, Some(json!(1)));
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].result, Some(json!(2)));
    }

    #[test]
    fn test_done_with_empty_content_uses_placeholder() {
        let mut assembler = generating();
        let applied = assembler.fold(Frame::Done).unwrap().unwrap();
        assert_eq!(applied.message.content, EMPTY_RESPONSE_PLACEHOLDER);
        assert_eq!(
            applied.deltas,
            vec![
                Delta::Content(EMPTY_RESPONSE_PLACEHOLDER.to_string()),
                Delta::Finished(TurnOutcome::Completed),
            ]
        );
    }

    #[test]
    fn test_failed_outcome_into_result() {
        assert!(matches!(
            TurnOutcome::Failed("boom".to_string()).into_result(),
            Err(StreamError::Generation(e)) if e == "boom"
        ));
        assert_eq!(
            TurnOutcome::Cancelled.into_result().unwrap(),
            TurnOutcome::Cancelled
        );
    }

    #[test]
    fn test_error_keeps_partial_content() {
        let mut assembler = generating();
        assembler.fold(content("partial")).unwrap();
        let applied = fold_raw(&mut assembler, r#"{"type":"error","error":"boom"}"#).unwrap();

        assert_eq!(applied.message.content, "partial");
        assert!(!applied.message.is_streaming);
        assert_eq!(
            applied.outcome(),
            Some(&TurnOutcome::Failed("boom".to_string()))
        );
    }

    #[test]
    fn test_cancelled_appends_final_fragment() {
        let mut assembler = generating();
        assembler.fold(content("Hal")).unwrap();
        let applied = fold_raw(&mut assembler, r#"{"type":"cancelled","content":"f"}"#).unwrap();
        assert_eq!(applied.message.content, "Half");
        assert_eq!(applied.outcome(), Some(&TurnOutcome::Cancelled));
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let mut assembler = generating();
        let first = assembler.fold(content("a")).unwrap().unwrap().message;
        assembler.fold(content("b")).unwrap();
        assert_eq!(first.content, "a");
        assert_eq!(assembler.current().unwrap().content, "ab");
    }

    #[test]
    fn test_frames_without_turn_are_protocol_errors() {
        let mut assembler = StreamAssembler::new();
        assert!(matches!(
            assembler.fold(content("late")),
            Err(StreamError::Protocol(_))
        ));
        assert!(assembler.fold(Frame::Pong).unwrap().is_none());
    }

    #[test]
    fn test_unhandled_frame_leaves_message_untouched() {
        let mut assembler = generating();
        let applied = fold_raw(&mut assembler, r#"{"type":"usage","tokens":12}"#);
        assert!(applied.is_none());
        assert!(assembler.current().unwrap().content.is_empty());
    }

    #[test]
    fn test_begin_turn_rejects_reentry() {
        let mut assembler = generating();
        assert!(matches!(
            assembler.begin_turn(),
            Err(StreamError::TurnInFlight)
        ));
    }

    #[test]
    fn test_finish_locally() {
        let mut assembler = generating();
        assembler.fold(content("cut")).unwrap();
        let applied = assembler.finish_locally(TurnOutcome::Interrupted).unwrap();
        assert_eq!(applied.message.content, "cut");
        assert!(!applied.message.is_streaming);
        assert!(assembler.finish_locally(TurnOutcome::Interrupted).is_none());
    }
}
