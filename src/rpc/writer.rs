//! Outbound half of the connection.
//!
//! Receives [`Frame`]s from an unbounded queue, encodes each as one NDJSON
//! line through [`NdjsonCodec`], and writes it to the agent. Callers never
//! wait on the agent reading its input, so the dispatcher can always answer
//! a callback even while the agent is blocked writing its own output.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::rpc::codec::NdjsonCodec;
use crate::rpc::connection::Inner;
use crate::rpc::frame::Frame;
use crate::{AppError, Result};

/// Write frames until the queue closes or shutdown fires, then close the
/// agent's input.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if a write fails; the connection is shut
/// down in that case.
pub(crate) async fn run_writer<W>(
    stream: W,
    inner: Arc<Inner>,
    mut frame_rx: mpsc::UnboundedReceiver<Frame>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stream = stream;
    let mut codec = NdjsonCodec::new();
    let mut buf = BytesMut::with_capacity(4096);

    let outcome = loop {
        tokio::select! {
            biased;

            () = inner.shutdown.cancelled() => {
                debug!("rpc writer: shutdown requested, stopping");
                break Ok(());
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("rpc writer: frame queue closed, stopping");
                    break Ok(());
                };

                buf.clear();
                if let Err(e) = codec.encode_frame(&frame, &mut buf) {
                    warn!(error = %e, "rpc writer: cannot encode frame, dropping");
                    continue;
                }

                if let Err(e) = write_line(&mut stream, &buf).await {
                    warn!(error = %e, "rpc writer: write failed");
                    inner.shutdown.cancel();
                    break Err(AppError::Transport(format!("write failed: {e}")));
                }
            }
        }
    };

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "rpc writer: closing agent input failed");
    }
    outcome
}

async fn write_line<W>(stream: &mut W, line: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(line).await?;
    stream.flush().await
}
