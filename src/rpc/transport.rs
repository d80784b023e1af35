//! Typed client-initiated calls over an [`RpcConnection`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::rpc::connection::{PendingCall, RpcConnection};
use crate::rpc::naming::OutboundMethod;
use crate::wire::params::{CancelParams, InitializeParams, InitializeResult, PromptParams};
use crate::{AppError, Result};

/// Client side of the wire protocol: `initialize`, `prompt`, `cancel`.
#[derive(Debug, Clone)]
pub struct Transport {
    conn: RpcConnection,
}

impl Transport {
    /// Wrap a running connection.
    #[must_use]
    pub fn new(conn: RpcConnection) -> Self {
        Self { conn }
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &RpcConnection {
        &self.conn
    }

    /// Run the `initialize` exchange, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Transport`]`("handshake timeout …")` when no reply
    ///   arrives in time.
    /// - [`AppError::Rpc`] when the agent rejects the call.
    pub async fn initialize(
        &self,
        params: &InitializeParams,
        timeout: Duration,
    ) -> Result<InitializeResult> {
        let params = to_params(params)?;
        let reply = tokio::time::timeout(
            timeout,
            self.conn.call(OutboundMethod::Initialize, params),
        )
        .await
        .map_err(|_| {
            AppError::Transport(format!(
                "handshake timeout: no initialize reply within {timeout:?}"
            ))
        })??;
        decode_result(reply)
    }

    /// Send `prompt` without waiting; the turn engine awaits the reply.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Closed`] if the connection is closed.
    pub fn start_prompt(&self, params: &PromptParams) -> Result<PendingCall> {
        self.conn
            .begin_call(OutboundMethod::Prompt, to_params(params)?)
    }

    /// Ask the agent to stop the running turn, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the RPC, transport, or timeout failure.
    pub async fn cancel(&self, timeout: Duration) -> Result<()> {
        let params = to_params(&CancelParams {})?;
        match tokio::time::timeout(timeout, self.conn.call(OutboundMethod::Cancel, params)).await {
            Ok(Ok(_)) => {
                debug!("rpc: cancel acknowledged");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "rpc: cancel failed");
                Err(e)
            }
            Err(_) => {
                warn!(?timeout, "rpc: cancel not acknowledged in time");
                Err(AppError::Transport(format!(
                    "cancel not acknowledged within {timeout:?}"
                )))
            }
        }
    }
}

fn to_params<T: Serialize>(params: &T) -> Result<Value> {
    Ok(serde_json::to_value(params)?)
}

/// Decode a call result into its typed shape.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] on a schema mismatch.
pub fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| AppError::Protocol(format!("unexpected result shape: {err}")))
}
