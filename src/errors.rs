//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

use crate::rpc::frame::RpcError;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Crate error enumeration covering every session and turn failure mode.
///
/// The enum is `Clone` so a turn can keep its error in a cell and hand out
/// copies through [`Turn::err`](crate::turn::Turn::err).
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The agent executable could not be started or negotiated with.
    Spawn(String),
    /// Pipe closed, malformed frame, or handshake timeout.
    Transport(String),
    /// Unknown discriminator or schema mismatch on a single message.
    Protocol(String),
    /// The agent answered an outbound call with a JSON-RPC error.
    Rpc(RpcError),
    /// The agent process exited with a non-zero status.
    SubprocessExit(String),
    /// The operation was cancelled before it produced a result.
    Cancelled(String),
    /// Another turn currently owns the session.
    Busy(String),
    /// A single-use capability (request responder) was already consumed.
    AlreadyConsumed(String),
    /// The session has been closed.
    Closed(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Rpc(err) => write!(f, "rpc: {err}"),
            Self::SubprocessExit(msg) => write!(f, "subprocess exit: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::AlreadyConsumed(msg) => write!(f, "already consumed: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Rpc(err)
    }
}
