#![forbid(unsafe_code)]

//! `agent-wire`: drive a headless agent process over newline-delimited
//! JSON-RPC on stdio.
//!
//! A [`Session`] owns the agent subprocess and its connection. Each
//! [`Session::prompt`] opens a [`Turn`]: a cancellable, pull-style stream of
//! [`Step`]s and [`Message`]s, finalized into a [`PromptResult`] with
//! [`Usage`] accounting once the agent answers the prompt.

pub mod aggregate;
pub mod config;
pub mod errors;
pub mod prompt;
pub mod rpc;
pub mod session;
pub mod turn;
pub mod wire;

pub use aggregate::{ChatMessage, MessageAggregator, Role};
pub use config::SessionConfig;
pub use errors::{AppError, Result};
pub use prompt::{prompt_once, SingleTurn};
pub use session::tools::{Tool, ToolHandler};
pub use session::{ConnectOptions, Session, SessionState};
pub use turn::{Step, Turn, Usage};
pub use wire::{
    ApprovalResponse, Content, ContentPart, Event, Message, PendingRequest, PromptResult,
    PromptStatus, Request, ToolReturnValue,
};
