//! Method-name mapping between logical operations and wire names.
//!
//! The table is pure renaming: it never changes what a call does, only the
//! string that names it on the wire. Inbound names are matched
//! case-insensitively.

use serde::Deserialize;

/// Client-initiated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundMethod {
    /// Handshake and tool registration.
    Initialize,
    /// Start a turn.
    Prompt,
    /// Cancel the running turn.
    Cancel,
}

/// Agent-initiated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundMethod {
    /// Pushed event.
    Event,
    /// Request awaiting an answer.
    Request,
}

/// Wire names for every operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MethodTable {
    /// Name of the `initialize` call.
    pub initialize: String,
    /// Name of the `prompt` call.
    pub prompt: String,
    /// Name of the `cancel` call.
    pub cancel: String,
    /// Name of the `event` callback.
    pub event: String,
    /// Name of the `request` callback.
    pub request: String,
}

impl Default for MethodTable {
    fn default() -> Self {
        Self {
            initialize: "initialize".into(),
            prompt: "prompt".into(),
            cancel: "cancel".into(),
            event: "event".into(),
            request: "request".into(),
        }
    }
}

impl MethodTable {
    /// Wire name for an outbound operation.
    #[must_use]
    pub fn outbound(&self, method: OutboundMethod) -> &str {
        match method {
            OutboundMethod::Initialize => &self.initialize,
            OutboundMethod::Prompt => &self.prompt,
            OutboundMethod::Cancel => &self.cancel,
        }
    }

    /// Resolve an inbound wire name.
    #[must_use]
    pub fn inbound(&self, name: &str) -> Option<InboundMethod> {
        if name.eq_ignore_ascii_case(&self.event) {
            Some(InboundMethod::Event)
        } else if name.eq_ignore_ascii_case(&self.request) {
            Some(InboundMethod::Request)
        } else {
            None
        }
    }

    /// Names that are empty or collide with each other.
    #[must_use]
    pub fn conflicts(&self) -> Vec<String> {
        let names = [
            ("initialize", &self.initialize),
            ("prompt", &self.prompt),
            ("cancel", &self.cancel),
            ("event", &self.event),
            ("request", &self.request),
        ];
        let mut problems = Vec::new();
        for (i, (field, name)) in names.iter().enumerate() {
            if name.trim().is_empty() {
                problems.push(format!("methods.{field} must not be empty"));
                continue;
            }
            for (other_field, other) in &names[i + 1..] {
                if name.eq_ignore_ascii_case(other) {
                    problems.push(format!(
                        "methods.{field} and methods.{other_field} share the name {name:?}"
                    ));
                }
            }
        }
        problems
    }
}
