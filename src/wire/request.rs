//! Agent-initiated requests and their single-use responders.
//!
//! A request blocks the agent until it is answered. Each decoded request is
//! paired with a [`Responder`] backed by a oneshot channel; the first
//! [`PendingRequest::respond`] consumes it and later calls fail with
//! [`AppError::AlreadyConsumed`]. Dropping an unanswered request closes the
//! channel, and the session then answers the agent with an error instead of
//! leaving it stalled.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::wire::event::{
    default_call_type, encode_payload, DisplayBlock, Envelope, Event, ToolCallFunction,
    ToolReturnValue,
};
use crate::{AppError, Result};

// ── Payloads ─────────────────────────────────────────────────────────────────

/// The agent asks permission before performing `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request id, echoed in the response.
    pub id: String,
    /// Tool call that triggered the request.
    pub tool_call_id: String,
    /// Component asking, e.g. the tool name.
    pub sender: String,
    /// Short action label.
    pub action: String,
    /// Human-readable description.
    pub description: String,
    /// Optional presentation blocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<DisplayBlock>,
}

/// The agent asks the client to execute a tool it registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolCallRequest {
    /// Request id.
    pub id: String,
    /// Tool call id, echoed in the result.
    pub tool_call_id: String,
    /// Call kind, normally `function`.
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// Target function and JSON arguments.
    pub function: ToolCallFunction,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Map<String, Value>>,
}

/// Decision for an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResponse {
    /// Allow this one action.
    Approve,
    /// Allow this action for the rest of the session.
    ApproveForSession,
    /// Deny the action.
    Reject,
}

impl fmt::Display for ApprovalResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::ApproveForSession => "approve_for_session",
            Self::Reject => "reject",
        })
    }
}

// ── Request ──────────────────────────────────────────────────────────────────

/// Fixed discriminator for each [`Request`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `ApprovalRequest`
    Approval,
    /// `ExternalToolCallRequest`
    ToolCall,
}

impl RequestKind {
    /// Wire discriminator string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approval => "ApprovalRequest",
            Self::ToolCall => "ExternalToolCallRequest",
        }
    }

    /// Look up a discriminator. Matching is exact.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ApprovalRequest" => Some(Self::Approval),
            "ExternalToolCallRequest" => Some(Self::ToolCall),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of agent-initiated requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Request {
    /// Permission prompt.
    Approval(ApprovalRequest),
    /// External tool invocation.
    ToolCall(ExternalToolCallRequest),
}

impl Request {
    /// Discriminator.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Approval(_) => RequestKind::Approval,
            Self::ToolCall(_) => RequestKind::ToolCall,
        }
    }

    /// Request id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Approval(req) => &req.id,
            Self::ToolCall(req) => &req.id,
        }
    }

    /// Tool call the request belongs to.
    #[must_use]
    pub fn tool_call_id(&self) -> &str {
        match self {
            Self::Approval(req) => &req.tool_call_id,
            Self::ToolCall(req) => &req.tool_call_id,
        }
    }

    /// Decode a request from its envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] on an unknown discriminator or a schema
    /// mismatch.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let kind = RequestKind::parse(&envelope.kind).ok_or_else(|| {
            AppError::Protocol(format!("unknown request type: {}", envelope.kind))
        })?;
        Ok(match kind {
            RequestKind::Approval => Self::Approval(envelope.decode_payload()?),
            RequestKind::ToolCall => Self::ToolCall(envelope.decode_payload()?),
        })
    }

    /// Decode a request from raw `params` of an inbound `request` call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the params do not decode.
    pub fn from_params(params: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(params)
            .map_err(|err| AppError::Protocol(format!("invalid request envelope: {err}")))?;
        Self::from_envelope(&envelope)
    }

    /// Encode into a `{type, payload}` envelope.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            Self::Approval(req) => encode_payload(req),
            Self::ToolCall(req) => encode_payload(req),
        };
        Envelope::new(self.kind().as_str(), payload)
    }
}

impl TryFrom<Envelope> for Request {
    type Error = AppError;

    fn try_from(envelope: Envelope) -> Result<Self> {
        Self::from_envelope(&envelope)
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        request.to_envelope()
    }
}

// ── Responses ────────────────────────────────────────────────────────────────

/// Answer supplied by the consumer for a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestResponse {
    /// Answer to an [`ApprovalRequest`].
    Approval(ApprovalResponse),
    /// Answer to an [`ExternalToolCallRequest`].
    ToolResult(ToolReturnValue),
}

impl RequestResponse {
    fn matches(&self, kind: RequestKind) -> bool {
        matches!(
            (self, kind),
            (Self::Approval(_), RequestKind::Approval) | (Self::ToolResult(_), RequestKind::ToolCall)
        )
    }

    /// Encode as the JSON-RPC result returned to the agent for `request`.
    #[must_use]
    pub fn to_result(&self, request: &Request) -> Value {
        match self {
            Self::Approval(response) => serde_json::json!({
                "request_id": request.id(),
                "response": response,
            }),
            Self::ToolResult(value) => serde_json::json!({
                "tool_call_id": request.tool_call_id(),
                "return_value": value,
            }),
        }
    }
}

impl From<ApprovalResponse> for RequestResponse {
    fn from(response: ApprovalResponse) -> Self {
        Self::Approval(response)
    }
}

impl From<ToolReturnValue> for RequestResponse {
    fn from(value: ToolReturnValue) -> Self {
        Self::ToolResult(value)
    }
}

/// Single-use reply capability bound to one request.
#[derive(Debug)]
pub struct Responder {
    tx: Mutex<Option<oneshot::Sender<RequestResponse>>>,
}

impl Responder {
    /// Create a responder and the receiving end awaited by the dispatcher.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<RequestResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn take(&self) -> Option<oneshot::Sender<RequestResponse>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// `true` once a response has been sent.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// A decoded request that must be answered exactly once.
#[derive(Debug)]
pub struct PendingRequest {
    request: Request,
    responder: Responder,
}

impl PendingRequest {
    /// Pair `request` with `responder`.
    #[must_use]
    pub fn new(request: Request, responder: Responder) -> Self {
        Self { request, responder }
    }

    /// The request data.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Send `response` to the agent.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] if `response` does not fit the request kind;
    ///   the responder is not consumed in that case.
    /// - [`AppError::AlreadyConsumed`] on a second call.
    /// - [`AppError::Cancelled`] if the turn was torn down before the
    ///   response could be delivered.
    pub fn respond(&self, response: impl Into<RequestResponse>) -> Result<()> {
        let response = response.into();
        if !response.matches(self.request.kind()) {
            return Err(AppError::Protocol(format!(
                "response does not match {} {}",
                self.request.kind(),
                self.request.id()
            )));
        }
        let tx = self.responder.take().ok_or_else(|| {
            AppError::AlreadyConsumed(format!("request {} already answered", self.request.id()))
        })?;
        tx.send(response).map_err(|_| {
            AppError::Cancelled(format!("request {} is no longer awaited", self.request.id()))
        })
    }

    /// Shorthand for `respond(ApprovalResponse::Approve)`.
    ///
    /// # Errors
    ///
    /// See [`PendingRequest::respond`].
    pub fn approve(&self) -> Result<()> {
        self.respond(ApprovalResponse::Approve)
    }

    /// Shorthand for `respond(ApprovalResponse::Reject)`.
    ///
    /// # Errors
    ///
    /// See [`PendingRequest::respond`].
    pub fn reject(&self) -> Result<()> {
        self.respond(ApprovalResponse::Reject)
    }

    /// `true` once answered.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.responder.is_consumed()
    }
}

// ── Message ──────────────────────────────────────────────────────────────────

/// Item of a turn's message stream.
#[derive(Debug)]
pub enum Message {
    /// Informational push.
    Event(Event),
    /// Push that must be answered.
    Request(PendingRequest),
}

impl Message {
    /// The event, if this is one.
    #[must_use]
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            Self::Request(_) => None,
        }
    }

    /// The pending request, if this is one.
    #[must_use]
    pub fn as_request(&self) -> Option<&PendingRequest> {
        match self {
            Self::Request(request) => Some(request),
            Self::Event(_) => None,
        }
    }
}
