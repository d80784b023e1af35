//! Inbound half of the connection.
//!
//! Reads newline-delimited JSON-RPC frames from the agent and routes them:
//!
//! | Frame                         | Destination                              |
//! |-------------------------------|------------------------------------------|
//! | call to a known method        | dispatcher queue, tagged with a sequence |
//! | call to an unknown method     | answered at once with `-32601`           |
//! | reply to an outbound call     | the waiting [`PendingCall`]              |
//! | anything else / malformed     | logged at `WARN` and skipped             |
//!
//! Every reply carries the number of inbound calls queued before it, so the
//! caller can wait until the dispatcher has handled everything the agent sent
//! ahead of the reply.
//!
//! [`PendingCall`]: crate::rpc::connection::PendingCall

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

use crate::rpc::codec::NdjsonCodec;
use crate::rpc::connection::{Inner, Reply};
use crate::rpc::frame::{id_key, Frame, RpcError};
use crate::rpc::naming::InboundMethod;
use crate::{AppError, Result};

/// Agent-initiated call queued for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCall {
    /// Correlation id; `None` for notifications.
    pub id: Option<Value>,
    /// Resolved method.
    pub method: InboundMethod,
    /// Raw parameters.
    pub params: Value,
    /// 1-based arrival order among queued calls.
    pub seq: u64,
}

/// Read frames until EOF, an I/O error, or shutdown, then fail every call
/// still waiting for a reply.
pub(crate) async fn run_reader<R>(
    stream: R,
    inner: Arc<Inner>,
    inbound_tx: mpsc::UnboundedSender<InboundCall>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, NdjsonCodec::new());
    let mut seq: u64 = 0;

    let reason = loop {
        tokio::select! {
            biased;

            () = inner.shutdown.cancelled() => {
                debug!("rpc reader: shutdown requested, stopping");
                break "connection closed".to_owned();
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("rpc reader: EOF detected");
                        break "agent closed its output".to_owned();
                    }

                    Some(Err(AppError::Transport(ref msg))) => {
                        warn!(error = msg.as_str(), "rpc reader: framing error, skipping line");
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "rpc reader: stream error, stopping");
                        break format!("stream error: {e}");
                    }

                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Frame>(&line) {
                            Ok(frame) => route(&inner, &inbound_tx, frame, &mut seq),
                            Err(e) => {
                                warn!(error = %e, raw_line = %line, "rpc reader: malformed frame, skipping");
                            }
                        }
                    }
                }
            }
        }
    };

    // Stops the writer too when the agent went away first.
    inner.shutdown.cancel();
    let failed = inner.fail_pending(&reason);
    if failed > 0 {
        debug!(failed, reason = reason.as_str(), "rpc reader: failed outstanding calls");
    }
    Ok(())
}

fn route(
    inner: &Inner,
    inbound_tx: &mpsc::UnboundedSender<InboundCall>,
    frame: Frame,
    seq: &mut u64,
) {
    if let Some(method_name) = frame.method.as_deref() {
        let Some(method) = inner.methods.inbound(method_name) else {
            debug!(method = method_name, "rpc reader: unknown inbound method");
            if frame.id.is_some() {
                inner.send(Frame::failure(
                    frame.id,
                    RpcError::method_not_found(method_name),
                ));
            }
            return;
        };

        *seq += 1;
        let call = InboundCall {
            id: frame.id,
            method,
            params: frame.params.unwrap_or(Value::Null),
            seq: *seq,
        };
        if inbound_tx.send(call).is_err() {
            debug!("rpc reader: dispatcher gone, dropping inbound call");
        }
        return;
    }

    let Some(id) = frame.id.as_ref().filter(|id| !id.is_null()) else {
        warn!(error = ?frame.error, "rpc reader: frame without method or id, skipping");
        return;
    };

    let outcome = match frame.error {
        Some(err) => Err(AppError::Rpc(err)),
        None => Ok(frame.result.unwrap_or(Value::Null)),
    };
    let key = id_key(id);
    if !inner.complete(
        &key,
        Reply {
            outcome,
            after_inbound: *seq,
        },
    ) {
        debug!(id = key.as_str(), "rpc reader: reply for unknown id, ignoring");
    }
}
