//! Parameter and result shapes of the client-initiated calls.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::content::Content;

/// Protocol revision announced in `initialize`.
pub const CLIENT_PROTOCOL_VERSION: &str = "2";

// ── prompt ───────────────────────────────────────────────────────────────────

/// `prompt` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptParams {
    /// User input for the new turn.
    pub user_input: Content,
}

/// Terminal state of a prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    /// No terminal reply observed yet.
    #[default]
    Pending,
    /// The agent completed the turn.
    Finished,
    /// The turn was cancelled.
    Cancelled,
    /// The agent stopped at its step limit.
    MaxStepsReached,
}

impl fmt::Display for PromptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::MaxStepsReached => "max_steps_reached",
        })
    }
}

/// `prompt` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResult {
    /// Terminal state.
    pub status: PromptStatus,
    /// Number of steps the agent ran, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

impl PromptResult {
    /// Result recorded when a turn is cancelled locally.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            status: PromptStatus::Cancelled,
            steps: None,
        }
    }
}

// ── cancel ───────────────────────────────────────────────────────────────────

/// `cancel` parameters (empty object).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {}

// ── initialize ───────────────────────────────────────────────────────────────

/// Function signature of an external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolFunction {
    /// Tool name.
    pub name: String,
    /// Description shown to the model.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Tool definition registered through `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    /// Definition kind, always `function`.
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Signature.
    pub function: ExternalToolFunction,
}

/// `initialize` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Client protocol revision.
    pub protocol_version: String,
    /// Tools the client can execute.
    #[serde(default)]
    pub external_tools: Vec<ExternalTool>,
}

/// A tool the agent refused to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTool {
    /// Tool name.
    pub name: String,
    /// Why it was refused.
    #[serde(default)]
    pub reason: String,
}

/// Registration outcome of the tools sent in `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalToolsResult {
    /// Names accepted.
    #[serde(default)]
    pub accepted: Vec<String>,
    /// Tools refused.
    #[serde(default)]
    pub rejected: Vec<RejectedTool>,
}

/// A slash command the agent supports.
///
/// Older agents report bare names; newer ones send objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSlashCommand")]
pub struct SlashCommand {
    /// Command name without the leading `/`.
    pub name: String,
    /// One-line description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Alternative names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSlashCommand {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        aliases: Vec<String>,
    },
}

impl From<RawSlashCommand> for SlashCommand {
    fn from(raw: RawSlashCommand) -> Self {
        match raw {
            RawSlashCommand::Name(name) => Self {
                name,
                description: String::new(),
                aliases: Vec::new(),
            },
            RawSlashCommand::Full {
                name,
                description,
                aliases,
            } => Self {
                name,
                description,
                aliases,
            },
        }
    }
}

/// `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Slash commands the agent understands.
    #[serde(default)]
    pub slash_commands: Vec<SlashCommand>,
    /// Tool registration outcome, absent when no tools were sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_tools: Option<ExternalToolsResult>,
}
