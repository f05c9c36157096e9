//! Client-side fold of the frame stream into render-ready chat state.
//!
//! [`SessionState::apply`] takes one decoded item at a time, in arrival
//! order, and never panics: frames that violate the protocol are dropped and
//! reported as [`Notice`]s for the UI to show once.

use crate::codec::{DecodeItem, Decoded};
use crate::error::{FrameParseError, ProtocolOrderError, StreamError};
use crate::protocol::{ArtifactKind, FileAttachment, Frame};
use crate::tools::{ToolOutput, ToolRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub created_at: Option<i64>,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    /// All text parts joined in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallState> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::Tool(call) => Some(call),
            _ => None,
        })
    }

    fn tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCallState> {
        self.parts.iter_mut().find_map(|part| match part {
            MessagePart::Tool(call) if call.tool_call_id == tool_call_id => Some(call),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text(TextPart),
    File(FileAttachment),
    Tool(ToolCallState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextState {
    Streaming,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextPart {
    pub id: String,
    pub text: String,
    pub state: TextState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolState::InputStreaming => "input-streaming",
            ToolState::InputAvailable => "input-available",
            ToolState::OutputAvailable => "output-available",
            ToolState::OutputError => "output-error",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ToolState::InputStreaming => 0,
            ToolState::InputAvailable => 1,
            ToolState::OutputAvailable | ToolState::OutputError => 2,
        }
    }

    pub fn is_final(&self) -> bool {
        self.rank() == 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallState {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    pub input: Option<serde_json::Value>,
    pub output: Option<ToolOutput>,
    pub error: Option<String>,
}

impl ToolCallState {
    fn new(tool_call_id: &str, tool_name: &str, state: ToolState) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            state,
            input: None,
            output: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    Streaming,
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactState {
    pub id: String,
    pub title: String,
    pub kind: ArtifactKind,
    pub language: Option<String>,
    pub content: String,
    pub status: ArtifactStatus,
    lines: usize,
}

impl ArtifactState {
    /// Number of content deltas received.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// The reducer does not check completeness; callers that know the
    /// expected size do.
    pub fn verify_len(&self, expected_bytes: usize) -> bool {
        self.content.len() == expected_bytes
    }
}

/// Artifact fields received before its `data-id`.
#[derive(Debug, Clone, Default)]
struct PendingArtifact {
    title: String,
    kind: ArtifactKind,
    language: Option<String>,
    content: String,
    lines: usize,
}

/// One `data-*` frame as recorded in the turn's data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPart {
    Id(String),
    Title(String),
    Kind(ArtifactKind),
    Language(String),
    CodeDelta(String),
    TextDelta(String),
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    /// Submitted, `start` not yet received.
    Awaiting,
    Streaming,
    ToolPending,
    ToolResolved,
    TextStreaming,
    TextDone,
    Finished,
    Cancelled,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnPhase::Finished | TurnPhase::Cancelled | TurnPhase::Failed
        )
    }

    fn is_open(&self) -> bool {
        !self.is_terminal() && *self != TurnPhase::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    FrameParse,
    ProtocolOrder,
    InvalidToolOutput,
    Backend,
    StreamAborted,
    Transport,
    Timeout,
}

/// A one-shot message for the UI (toast or banner).
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    messages: Vec<ChatMessage>,
    current: Option<usize>,
    open_text: HashMap<String, usize>,
    phase: TurnPhase,
    steps_completed: usize,
    done_received: bool,
    data_stream: Vec<DataPart>,
    artifact: Option<ArtifactState>,
    pending_artifact: PendingArtifact,
    notices: Vec<Notice>,
    registry: Arc<ToolRegistry>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(Arc::new(ToolRegistry::builtin()))
    }
}

/// Pure-reducer form of [`SessionState::apply`].
pub fn reduce(mut state: SessionState, item: DecodeItem) -> SessionState {
    state.apply(item);
    state
}

impl SessionState {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            messages: Vec::new(),
            current: None,
            open_text: HashMap::new(),
            phase: TurnPhase::Idle,
            steps_completed: 0,
            done_received: false,
            data_stream: Vec::new(),
            artifact: None,
            pending_artifact: PendingArtifact::default(),
            notices: Vec::new(),
            registry,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn steps_completed(&self) -> usize {
        self.steps_completed
    }

    /// Whether the `[DONE]` sentinel arrived for the current turn.
    pub fn done_received(&self) -> bool {
        self.done_received
    }

    /// Only present once a `data-id` frame has been seen.
    pub fn artifact(&self) -> Option<&ArtifactState> {
        self.artifact.as_ref()
    }

    pub fn data_stream(&self) -> &[DataPart] {
        &self.data_stream
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn current_message(&self) -> Option<&ChatMessage> {
        self.current.and_then(|idx| self.messages.get(idx))
    }

    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCallState> {
        self.messages
            .iter()
            .rev()
            .flat_map(|message| message.tool_calls())
            .find(|call| call.tool_call_id == tool_call_id)
    }

    pub fn push_user_message(&mut self, text: &str, attachments: &[FileAttachment]) {
        let mut parts = vec![MessagePart::Text(TextPart {
            id: format!("text_{}", Uuid::new_v4().simple()),
            text: text.to_string(),
            state: TextState::Done,
        })];
        parts.extend(attachments.iter().cloned().map(MessagePart::File));

        self.messages.push(ChatMessage {
            id: format!("user_{}", Uuid::new_v4().simple()),
            role: Role::User,
            created_at: Some(chrono::Utc::now().timestamp_millis()),
            parts,
        });
    }

    pub fn apply(&mut self, item: DecodeItem) {
        match item {
            Ok(Decoded::Frame(frame)) => self.apply_frame(&frame),
            Ok(Decoded::Done) => self.apply_done(),
            Err(err) => self.record_parse_error(&err),
        }
    }

    pub fn apply_frame(&mut self, frame: &Frame) {
        if let Frame::Start { message_metadata } = frame {
            self.begin_turn(Some(message_metadata.created_at));
            return;
        }

        if self.phase.is_terminal() {
            match frame {
                Frame::FinishStep | Frame::Finish => {}
                other => self.protocol_error(ProtocolOrderError::AfterFinish(other.kind())),
            }
            return;
        }

        match frame {
            Frame::Start { .. } => {}
            Frame::TextStart { id } => self.open_text(id),
            Frame::TextDelta { id, delta } => self.append_text(id, delta),
            Frame::TextEnd { id } => self.close_text(id),
            Frame::ToolInputStart {
                tool_call_id,
                tool_name,
            } => self.start_tool(tool_call_id, tool_name),
            Frame::ToolInputAvailable {
                tool_call_id,
                input,
            } => {
                self.advance_tool(tool_call_id, ToolState::InputAvailable, |call, _| {
                    call.input = Some(input.clone());
                    None
                });
            }
            Frame::ToolOutputAvailable {
                tool_call_id,
                output,
            } => {
                self.advance_tool(
                    tool_call_id,
                    ToolState::OutputAvailable,
                    |call, registry| match registry.parse_output(&call.tool_name, output.clone()) {
                        Ok(parsed) => {
                            call.output = Some(parsed);
                            None
                        }
                        Err(err) => {
                            call.output = Some(ToolOutput::Unrecognized(output.clone()));
                            Some(format!(
                                "output of `{}` does not match its schema: {}",
                                call.tool_name, err
                            ))
                        }
                    },
                );
            }
            Frame::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                self.advance_tool(tool_call_id, ToolState::OutputError, |call, _| {
                    call.error = Some(error_text.clone());
                    None
                });
            }
            Frame::DataId { data } => {
                self.data_stream.push(DataPart::Id(data.clone()));
                self.reveal_artifact(data);
            }
            Frame::DataTitle { data } => {
                self.data_stream.push(DataPart::Title(data.clone()));
                match self.streaming_artifact() {
                    Some(artifact) => artifact.title = data.clone(),
                    None => self.pending_artifact.title = data.clone(),
                }
            }
            Frame::DataKind { data } => {
                self.data_stream.push(DataPart::Kind(*data));
                match self.streaming_artifact() {
                    Some(artifact) => artifact.kind = *data,
                    None => self.pending_artifact.kind = *data,
                }
            }
            Frame::DataLanguage { data } => {
                self.data_stream.push(DataPart::Language(data.clone()));
                match self.streaming_artifact() {
                    Some(artifact) => artifact.language = Some(data.clone()),
                    None => self.pending_artifact.language = Some(data.clone()),
                }
            }
            Frame::DataCodeDelta { data } => {
                self.data_stream.push(DataPart::CodeDelta(data.clone()));
                self.append_artifact_line(data);
            }
            Frame::DataTextDelta { data } => {
                self.data_stream.push(DataPart::TextDelta(data.clone()));
                self.append_artifact_line(data);
            }
            Frame::DataFinish => {
                self.data_stream.push(DataPart::Finish);
                if let Some(artifact) = self.streaming_artifact() {
                    artifact.status = ArtifactStatus::Idle;
                }
            }
            Frame::FinishStep => self.steps_completed += 1,
            Frame::Finish => self.finish_turn(),
            Frame::Error { error_text } => self.notify(NoticeKind::Backend, error_text.clone()),
        }
    }

    fn apply_done(&mut self) {
        self.done_received = true;
        if !self.phase.is_terminal() {
            self.finish_turn();
        }
    }

    pub fn record_parse_error(&mut self, err: &FrameParseError) {
        self.notify(NoticeKind::FrameParse, err.to_string());
    }

    /// Opens a turn ahead of its `start` frame, so an empty or cancelled
    /// stream still ends this turn rather than leaving the previous one's
    /// phase behind.
    pub fn await_turn(&mut self) {
        if self.phase.is_open() {
            self.settle();
        }
        self.current = None;
        self.open_text.clear();
        self.steps_completed = 0;
        self.done_received = false;
        self.phase = TurnPhase::Awaiting;
    }

    /// Stops the turn where it is; whatever arrived so far is kept.
    /// Returns false when no turn was in progress.
    pub fn cancel(&mut self) -> bool {
        if !self.phase.is_open() {
            return false;
        }
        self.settle();
        self.phase = TurnPhase::Cancelled;
        true
    }

    /// The byte stream ended. Without a prior `finish` or `[DONE]` the turn
    /// counts as cancelled, not corrupted.
    pub fn end_of_stream(&mut self) {
        if self.phase.is_open() {
            self.notify(
                NoticeKind::StreamAborted,
                StreamError::StreamAborted.to_string(),
            );
            self.cancel();
        }
    }

    /// Transport failure or silence timeout. The turn can be retried.
    pub fn fail(&mut self, err: &StreamError) {
        let kind = match err {
            StreamError::Timeout(_) => NoticeKind::Timeout,
            _ => NoticeKind::Transport,
        };
        self.notify(kind, err.to_string());
        self.settle();
        self.phase = TurnPhase::Failed;
    }

    fn begin_turn(&mut self, created_at: Option<i64>) {
        if self.phase.is_open() {
            self.settle();
        }

        self.data_stream.clear();
        self.open_text.clear();
        self.pending_artifact = PendingArtifact::default();
        self.steps_completed = 0;
        self.done_received = false;

        self.messages.push(ChatMessage {
            id: format!("assistant_{}", Uuid::new_v4().simple()),
            role: Role::Assistant,
            created_at,
            parts: Vec::new(),
        });
        self.current = Some(self.messages.len() - 1);
        self.phase = TurnPhase::Streaming;
    }

    fn finish_turn(&mut self) {
        self.settle();
        self.phase = TurnPhase::Finished;
    }

    /// Freezes open text parts and stops a streaming artifact.
    fn settle(&mut self) {
        let open: Vec<usize> = self.open_text.drain().map(|(_, idx)| idx).collect();
        if let Some(message) = self.current.and_then(|idx| self.messages.get_mut(idx)) {
            for idx in open {
                if let Some(MessagePart::Text(part)) = message.parts.get_mut(idx) {
                    part.state = TextState::Done;
                }
            }
        }
        if let Some(artifact) = self.streaming_artifact() {
            artifact.status = ArtifactStatus::Idle;
        }
    }

    fn current_message_mut(&mut self) -> &mut ChatMessage {
        if self.phase == TurnPhase::Idle || self.current.is_none() {
            self.begin_turn(None);
        }
        let idx = self.current.unwrap_or(self.messages.len() - 1);
        &mut self.messages[idx]
    }

    fn open_text(&mut self, id: &str) {
        if self.open_text.contains_key(id) {
            self.protocol_error(ProtocolOrderError::DuplicateTextStart(id.to_string()));
            return;
        }
        let message = self.current_message_mut();
        message.parts.push(MessagePart::Text(TextPart {
            id: id.to_string(),
            text: String::new(),
            state: TextState::Streaming,
        }));
        let idx = message.parts.len() - 1;
        self.open_text.insert(id.to_string(), idx);
        self.phase = TurnPhase::TextStreaming;
    }

    fn append_text(&mut self, id: &str, delta: &str) {
        let Some(idx) = self.open_text.get(id).copied() else {
            self.protocol_error(ProtocolOrderError::UnknownText(id.to_string()));
            return;
        };
        if let Some(MessagePart::Text(part)) = self.current_message_mut().parts.get_mut(idx) {
            part.text.push_str(delta);
        }
    }

    fn close_text(&mut self, id: &str) {
        let Some(idx) = self.open_text.remove(id) else {
            self.protocol_error(ProtocolOrderError::UnknownText(id.to_string()));
            return;
        };
        if let Some(MessagePart::Text(part)) = self.current_message_mut().parts.get_mut(idx) {
            part.state = TextState::Done;
        }
        if self.open_text.is_empty() {
            self.phase = TurnPhase::TextDone;
        }
    }

    fn start_tool(&mut self, tool_call_id: &str, tool_name: &str) {
        let message = self.current_message_mut();
        if message.tool_call_mut(tool_call_id).is_some() {
            self.protocol_error(ProtocolOrderError::DuplicateToolStart(
                tool_call_id.to_string(),
            ));
            return;
        }
        message.parts.push(MessagePart::Tool(ToolCallState::new(
            tool_call_id,
            tool_name,
            ToolState::InputStreaming,
        )));
        self.phase = TurnPhase::ToolPending;
    }

    /// Moves a call forward to `target`. Unknown ids start a new call;
    /// moves that are not strictly forward are dropped.
    fn advance_tool<F>(&mut self, tool_call_id: &str, target: ToolState, update: F)
    where
        F: FnOnce(&mut ToolCallState, &ToolRegistry) -> Option<String>,
    {
        let registry = Arc::clone(&self.registry);
        let message = self.current_message_mut();

        let call = match message.tool_call_mut(tool_call_id) {
            Some(call) if call.state.rank() >= target.rank() => {
                let err = ProtocolOrderError::ToolRegression {
                    id: tool_call_id.to_string(),
                    from: call.state.as_str(),
                    to: target.as_str(),
                };
                self.protocol_error(err);
                return;
            }
            Some(call) => call,
            None => {
                message.parts.push(MessagePart::Tool(ToolCallState::new(
                    tool_call_id,
                    "",
                    target,
                )));
                match message.parts.last_mut() {
                    Some(MessagePart::Tool(call)) => call,
                    _ => return,
                }
            }
        };

        call.state = target;
        let problem = update(call, registry.as_ref());

        if target.is_final() {
            let pending = message.tool_calls().any(|call| !call.state.is_final());
            self.phase = if pending {
                TurnPhase::ToolPending
            } else {
                TurnPhase::ToolResolved
            };
        } else {
            self.phase = TurnPhase::ToolPending;
        }

        if let Some(problem) = problem {
            self.notify(NoticeKind::InvalidToolOutput, problem);
        }
    }

    fn streaming_artifact(&mut self) -> Option<&mut ArtifactState> {
        self.artifact
            .as_mut()
            .filter(|artifact| artifact.status == ArtifactStatus::Streaming)
    }

    fn reveal_artifact(&mut self, id: &str) {
        let pending = std::mem::take(&mut self.pending_artifact);
        self.artifact = Some(ArtifactState {
            id: id.to_string(),
            title: pending.title,
            kind: pending.kind,
            language: pending.language,
            content: pending.content,
            status: ArtifactStatus::Streaming,
            lines: pending.lines,
        });
    }

    fn append_artifact_line(&mut self, line: &str) {
        let (content, lines) = match self.artifact.as_mut() {
            Some(artifact) if artifact.status == ArtifactStatus::Streaming => {
                (&mut artifact.content, &mut artifact.lines)
            }
            _ => (
                &mut self.pending_artifact.content,
                &mut self.pending_artifact.lines,
            ),
        };
        if *lines > 0 {
            content.push('\n');
        }
        content.push_str(line);
        *lines += 1;
    }

    fn protocol_error(&mut self, err: ProtocolOrderError) {
        self.notify(NoticeKind::ProtocolOrder, err.to_string());
    }

    fn notify(&mut self, kind: NoticeKind, message: String) {
        warn!(?kind, %message, "stream notice");
        self.notices.push(Notice { kind, message });
    }
}
