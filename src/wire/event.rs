//! Agent-pushed events.
//!
//! Every event travels inside a `{ "type": ..., "payload": ... }` envelope.
//! Decoding is two-phase: the envelope is read first, then the discriminator
//! selects the payload shape from a closed table. An unknown discriminator is
//! a [`AppError::Protocol`] error scoped to the single RPC message carrying it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::wire::content::{Content, ContentPart};
use crate::wire::request::ApprovalResponse;
use crate::{AppError, Result};

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Raw `{type, payload}` pair shared by events and requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Variant discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Variant body, decoded once `kind` is known.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Wrap an already-encoded payload.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Decode the payload as `T`. A missing payload is treated as `{}` so
    /// marker variants and all-optional shapes accept it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] naming the discriminator on a schema
    /// mismatch.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let payload = match &self.payload {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(payload)
            .map_err(|err| AppError::Protocol(format!("invalid {} payload: {err}", self.kind)))
    }
}

pub(crate) fn encode_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::Object(Map::new()))
}

// ── Event kinds ──────────────────────────────────────────────────────────────

/// Fixed discriminator for each [`Event`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `TurnBegin`
    TurnBegin,
    /// `StepBegin`
    StepBegin,
    /// `StepInterrupted`
    StepInterrupted,
    /// `CompactionBegin`
    CompactionBegin,
    /// `CompactionEnd`
    CompactionEnd,
    /// `StatusUpdate`
    StatusUpdate,
    /// `ContentPart`
    ContentPart,
    /// `ToolCall`
    ToolCall,
    /// `ToolCallPart`
    ToolCallPart,
    /// `ToolResult`
    ToolResult,
    /// `SubagentEvent`
    SubagentEvent,
    /// `ApprovalRequestResolved`
    ApprovalRequestResolved,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 12] = [
        Self::TurnBegin,
        Self::StepBegin,
        Self::StepInterrupted,
        Self::CompactionBegin,
        Self::CompactionEnd,
        Self::StatusUpdate,
        Self::ContentPart,
        Self::ToolCall,
        Self::ToolCallPart,
        Self::ToolResult,
        Self::SubagentEvent,
        Self::ApprovalRequestResolved,
    ];

    /// Wire discriminator string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnBegin => "TurnBegin",
            Self::StepBegin => "StepBegin",
            Self::StepInterrupted => "StepInterrupted",
            Self::CompactionBegin => "CompactionBegin",
            Self::CompactionEnd => "CompactionEnd",
            Self::StatusUpdate => "StatusUpdate",
            Self::ContentPart => "ContentPart",
            Self::ToolCall => "ToolCall",
            Self::ToolCallPart => "ToolCallPart",
            Self::ToolResult => "ToolResult",
            Self::SubagentEvent => "SubagentEvent",
            Self::ApprovalRequestResolved => "ApprovalRequestResolved",
        }
    }

    /// Look up a discriminator. Matching is exact.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payloads ─────────────────────────────────────────────────────────────────

/// A new user turn started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnBegin {
    /// Input the turn was started with.
    pub user_input: Content,
}

/// A new agent step started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBegin {
    /// 1-based step number.
    pub n: u32,
}

/// Token counters reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Uncached input tokens.
    #[serde(default)]
    pub input_other: u64,
    /// Generated tokens.
    #[serde(default)]
    pub output: u64,
    /// Input tokens served from cache.
    #[serde(default)]
    pub input_cache_read: u64,
    /// Input tokens written to cache.
    #[serde(default)]
    pub input_cache_creation: u64,
}

impl TokenUsage {
    /// Add `other` field-wise, saturating.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_other = self.input_other.saturating_add(other.input_other);
        self.output = self.output.saturating_add(other.output);
        self.input_cache_read = self.input_cache_read.saturating_add(other.input_cache_read);
        self.input_cache_creation = self
            .input_cache_creation
            .saturating_add(other.input_cache_creation);
    }

    /// Sum of every input counter.
    #[must_use]
    pub fn input(&self) -> u64 {
        self.input_other
            .saturating_add(self.input_cache_read)
            .saturating_add(self.input_cache_creation)
    }
}

/// Usage report. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Fraction of the context window in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<f64>,
    /// Tokens consumed since the previous report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Model message the report belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Function name and (possibly partial) JSON arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Tool name.
    pub name: String,
    /// JSON-encoded arguments. May be absent while streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The model invoked a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call kind, normally `function`.
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// Tool call id.
    pub id: String,
    /// Target function.
    pub function: ToolCallFunction,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Map<String, Value>>,
}

pub(crate) fn default_call_type() -> String {
    "function".to_owned()
}

/// Streaming fragment of the last tool call's arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Next chunk of the JSON arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_part: Option<String>,
}

/// Rendering hint kind attached to tool results and approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DisplayBlockKind {
    /// One-line summary.
    Brief,
    /// File diff.
    Diff,
    /// Todo list.
    Todo,
    /// Any kind this crate does not know; the raw name is kept.
    Unknown(String),
}

impl From<String> for DisplayBlockKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "brief" => Self::Brief,
            "diff" => Self::Diff,
            "todo" => Self::Todo,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<DisplayBlockKind> for String {
    fn from(kind: DisplayBlockKind) -> Self {
        match kind {
            DisplayBlockKind::Brief => "brief".to_owned(),
            DisplayBlockKind::Diff => "diff".to_owned(),
            DisplayBlockKind::Todo => "todo".to_owned(),
            DisplayBlockKind::Unknown(raw) => raw,
        }
    }
}

/// Todo entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not started.
    Pending,
    /// In progress.
    InProgress,
    /// Completed.
    Done,
}

/// One entry of a todo display block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Entry title.
    pub title: String,
    /// Entry state.
    pub status: TodoStatus,
}

/// Presentation block. Fields irrelevant to `kind` are left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayBlock {
    /// Block kind.
    #[serde(rename = "type")]
    pub kind: DisplayBlockKind,
    /// Text for `brief` blocks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// File path for `diff` blocks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Previous text for `diff` blocks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub old_text: String,
    /// New text for `diff` blocks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_text: String,
    /// Entries for `todo` blocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<TodoItem>,
    /// Opaque body of unknown kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl DisplayBlock {
    /// Build a `brief` block.
    #[must_use]
    pub fn brief(text: impl Into<String>) -> Self {
        Self {
            kind: DisplayBlockKind::Brief,
            text: text.into(),
            path: String::new(),
            old_text: String::new(),
            new_text: String::new(),
            items: Vec::new(),
            data: None,
        }
    }
}

/// Outcome of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnValue {
    /// `true` when the tool failed.
    #[serde(default)]
    pub is_error: bool,
    /// Output shown to the model.
    pub output: Content,
    /// Short message for the model.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Output shown to the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<DisplayBlock>,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Map<String, Value>>,
}

impl ToolReturnValue {
    /// Successful plain-text result.
    #[must_use]
    pub fn ok(output: impl Into<Content>) -> Self {
        Self {
            is_error: false,
            output: output.into(),
            message: String::new(),
            display: Vec::new(),
            extras: None,
        }
    }

    /// Failed result carrying `message` as its output.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            output: Content::Text(message.into()),
            message: String::new(),
            display: Vec::new(),
            extras: None,
        }
    }
}

/// A tool finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the [`ToolCall`] this answers.
    pub tool_call_id: String,
    /// Tool output.
    pub return_value: ToolReturnValue,
}

/// An event emitted by a subagent, tagged with the task call that spawned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentEvent {
    /// Id of the parent `Task` tool call.
    pub task_tool_call_id: String,
    /// Nested event, itself enveloped.
    pub event: Box<Event>,
}

/// An approval request was answered (possibly by another client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequestResolved {
    /// Id of the resolved request.
    pub request_id: String,
    /// The decision.
    pub response: ApprovalResponse,
}

// ── Event ────────────────────────────────────────────────────────────────────

/// Closed set of agent-pushed notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Event {
    /// Turn started.
    TurnBegin(TurnBegin),
    /// Step started.
    StepBegin(StepBegin),
    /// Step aborted before completion.
    StepInterrupted,
    /// Context compaction started.
    CompactionBegin,
    /// Context compaction finished.
    CompactionEnd,
    /// Usage report.
    StatusUpdate(StatusUpdate),
    /// Streamed content fragment.
    ContentPart(ContentPart),
    /// Tool invocation.
    ToolCall(ToolCall),
    /// Streamed tool-call arguments.
    ToolCallPart(ToolCallPart),
    /// Tool outcome.
    ToolResult(ToolResult),
    /// Nested subagent event.
    SubagentEvent(SubagentEvent),
    /// Approval answered.
    ApprovalRequestResolved(ApprovalRequestResolved),
}

impl Event {
    /// Discriminator, available without inspecting the payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TurnBegin(_) => EventKind::TurnBegin,
            Self::StepBegin(_) => EventKind::StepBegin,
            Self::StepInterrupted => EventKind::StepInterrupted,
            Self::CompactionBegin => EventKind::CompactionBegin,
            Self::CompactionEnd => EventKind::CompactionEnd,
            Self::StatusUpdate(_) => EventKind::StatusUpdate,
            Self::ContentPart(_) => EventKind::ContentPart,
            Self::ToolCall(_) => EventKind::ToolCall,
            Self::ToolCallPart(_) => EventKind::ToolCallPart,
            Self::ToolResult(_) => EventKind::ToolResult,
            Self::SubagentEvent(_) => EventKind::SubagentEvent,
            Self::ApprovalRequestResolved(_) => EventKind::ApprovalRequestResolved,
        }
    }

    /// Decode an event from its envelope.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`]`("unknown event type: …")` for an unlisted
    ///   discriminator.
    /// - [`AppError::Protocol`]`("invalid … payload: …")` on a schema mismatch.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let kind = EventKind::parse(&envelope.kind).ok_or_else(|| {
            AppError::Protocol(format!("unknown event type: {}", envelope.kind))
        })?;
        Ok(match kind {
            EventKind::TurnBegin => Self::TurnBegin(envelope.decode_payload()?),
            EventKind::StepBegin => Self::StepBegin(envelope.decode_payload()?),
            EventKind::StepInterrupted => Self::StepInterrupted,
            EventKind::CompactionBegin => Self::CompactionBegin,
            EventKind::CompactionEnd => Self::CompactionEnd,
            EventKind::StatusUpdate => Self::StatusUpdate(envelope.decode_payload()?),
            EventKind::ContentPart => Self::ContentPart(envelope.decode_payload()?),
            EventKind::ToolCall => Self::ToolCall(envelope.decode_payload()?),
            EventKind::ToolCallPart => Self::ToolCallPart(envelope.decode_payload()?),
            EventKind::ToolResult => Self::ToolResult(envelope.decode_payload()?),
            EventKind::SubagentEvent => Self::SubagentEvent(envelope.decode_payload()?),
            EventKind::ApprovalRequestResolved => {
                Self::ApprovalRequestResolved(envelope.decode_payload()?)
            }
        })
    }

    /// Decode an event from raw `params` of an inbound `event` call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the params are not an envelope or
    /// the envelope does not decode.
    pub fn from_params(params: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(params)
            .map_err(|err| AppError::Protocol(format!("invalid event envelope: {err}")))?;
        Self::from_envelope(&envelope)
    }

    /// Encode into a `{type, payload}` envelope.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            Self::TurnBegin(p) => encode_payload(p),
            Self::StepBegin(p) => encode_payload(p),
            Self::StepInterrupted | Self::CompactionBegin | Self::CompactionEnd => {
                Value::Object(Map::new())
            }
            Self::StatusUpdate(p) => encode_payload(p),
            Self::ContentPart(p) => encode_payload(p),
            Self::ToolCall(p) => encode_payload(p),
            Self::ToolCallPart(p) => encode_payload(p),
            Self::ToolResult(p) => encode_payload(p),
            Self::SubagentEvent(p) => encode_payload(p),
            Self::ApprovalRequestResolved(p) => encode_payload(p),
        };
        Envelope::new(self.kind().as_str(), payload)
    }
}

impl TryFrom<Envelope> for Event {
    type Error = AppError;

    fn try_from(envelope: Envelope) -> Result<Self> {
        Self::from_envelope(&envelope)
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        event.to_envelope()
    }
}
