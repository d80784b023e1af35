//! Wire codec: the typed catalogue of contents, events, requests, and call
//! parameters exchanged with the agent.

pub mod content;
pub mod event;
pub mod params;
pub mod request;

pub use content::{Content, ContentKind, ContentPart, MediaUrl};
pub use event::{
    ApprovalRequestResolved, DisplayBlock, DisplayBlockKind, Envelope, Event, EventKind,
    StatusUpdate, StepBegin, SubagentEvent, TodoItem, TodoStatus, TokenUsage, ToolCall,
    ToolCallFunction, ToolCallPart, ToolResult, ToolReturnValue, TurnBegin,
};
pub use params::{
    CancelParams, ExternalTool, ExternalToolFunction, ExternalToolsResult, InitializeParams,
    InitializeResult, PromptParams, PromptResult, PromptStatus, RejectedTool, SlashCommand,
};
pub use request::{
    ApprovalRequest, ApprovalResponse, ExternalToolCallRequest, Message, PendingRequest, Request,
    RequestKind, RequestResponse, Responder,
};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Encode any catalogue value as compact JSON bytes.
///
/// # Errors
///
/// Returns [`crate::AppError::Protocol`] if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a catalogue value from JSON bytes.
///
/// # Errors
///
/// Returns [`crate::AppError::Protocol`] on malformed JSON, an unknown
/// discriminator, or a schema mismatch.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
