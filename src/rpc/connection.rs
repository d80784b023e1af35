//! Shared JSON-RPC connection over one duplex byte stream.
//!
//! Outbound calls and inbound callbacks have independent id spaces: the
//! connection numbers its own calls, and echoes whatever id the agent chose
//! when replying to a callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::rpc::frame::{Frame, RpcError};
use crate::rpc::naming::{MethodTable, OutboundMethod};
use crate::rpc::reader::{run_reader, InboundCall};
use crate::rpc::writer::run_writer;
use crate::{AppError, Result};

/// Reply to an outbound call.
#[derive(Debug)]
pub struct Reply {
    /// Result payload, or the RPC / transport failure.
    pub outcome: Result<Value>,
    /// Number of inbound calls the agent sent before this reply.
    pub after_inbound: u64,
}

type PendingMap = HashMap<String, oneshot::Sender<Reply>>;

pub(crate) struct Inner {
    pub(crate) methods: MethodTable,
    pub(crate) shutdown: CancellationToken,
    frame_tx: mpsc::UnboundedSender<Frame>,
    /// `None` once the connection is closed; no call can register after that.
    pending: Mutex<Option<PendingMap>>,
    next_id: AtomicU64,
    tasks: TaskTracker,
}

impl Inner {
    pub(crate) fn send(&self, frame: Frame) -> bool {
        self.frame_tx.send(frame).is_ok()
    }

    pub(crate) fn complete(&self, key: &str, reply: Reply) -> bool {
        let tx = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .and_then(|map| map.remove(key));
        match tx {
            Some(tx) => {
                // The caller may have given up on the reply already.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    pub(crate) fn fail_pending(&self, reason: &str) -> usize {
        let drained = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Reply {
                outcome: Err(AppError::Transport(reason.to_owned())),
                after_inbound: 0,
            });
        }
        count
    }

    fn forget(&self, key: &str) {
        if let Some(map) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            map.remove(key);
        }
    }
}

/// Handle to a running connection. Cheap to clone.
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Spawn the reader and writer tasks over `reader` / `writer`.
    ///
    /// Returns the connection and the queue of agent-initiated calls, which
    /// the caller must drain (see the session dispatcher).
    pub fn start<R, W>(
        reader: R,
        writer: W,
        methods: MethodTable,
    ) -> (Self, mpsc::UnboundedReceiver<InboundCall>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            methods,
            shutdown: CancellationToken::new(),
            frame_tx,
            pending: Mutex::new(Some(HashMap::new())),
            next_id: AtomicU64::new(1),
            tasks: TaskTracker::new(),
        });

        let reader_inner = Arc::clone(&inner);
        inner.tasks.spawn(async move {
            if let Err(e) = run_reader(reader, reader_inner, inbound_tx).await {
                warn!(error = %e, "rpc reader exited with error");
            }
        });

        let writer_inner = Arc::clone(&inner);
        inner.tasks.spawn(async move {
            if let Err(e) = run_writer(writer, writer_inner, frame_rx).await {
                warn!(error = %e, "rpc writer exited with error");
            }
        });
        inner.tasks.close();

        (Self { inner }, inbound_rx)
    }

    /// Method-name table in use.
    #[must_use]
    pub fn methods(&self) -> &MethodTable {
        &self.inner.methods
    }

    /// Send an outbound call and return a handle to its reply.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Closed`] if the connection is already closed.
    pub fn begin_call(&self, method: OutboundMethod, params: Value) -> Result<PendingCall> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let key = id.to_string();
        let name = self.inner.methods.outbound(method).to_owned();
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(map) = guard.as_mut() else {
                return Err(AppError::Closed("connection is closed".into()));
            };
            map.insert(key.clone(), tx);
        }

        debug!(id, method = name.as_str(), "rpc: outbound call");
        if !self.inner.send(Frame::request(Value::String(key.clone()), name, params)) {
            self.inner.forget(&key);
            return Err(AppError::Closed("connection is closed".into()));
        }

        Ok(PendingCall {
            key,
            rx,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Send an outbound call and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the RPC error, or a transport error if the connection drops.
    pub async fn call(&self, method: OutboundMethod, params: Value) -> Result<Value> {
        let mut pending = self.begin_call(method, params)?;
        pending.wait().await.outcome
    }

    /// Answer an inbound call. Notifications (no id) are not answered.
    pub fn respond(&self, id: Option<Value>, outcome: std::result::Result<Value, RpcError>) {
        let Some(id) = id else {
            return;
        };
        let frame = match outcome {
            Ok(result) => Frame::success(id, result),
            Err(error) => Frame::failure(Some(id), error),
        };
        if !self.inner.send(frame) {
            debug!("rpc: connection closed, reply dropped");
        }
    }

    /// `true` once either side has shut the connection down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves when the connection shuts down.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Signal shutdown without waiting for the tasks to finish.
    pub fn abort(&self) {
        self.inner.shutdown.cancel();
    }

    /// Shut down both directions and wait for the reader and writer tasks.
    /// Outstanding calls fail with a transport error. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.wait().await;
        self.inner.fail_pending("connection closed");
    }
}

/// Outstanding outbound call. Dropping it forgets the id, so a late reply is
/// discarded by the reader.
#[derive(Debug)]
pub struct PendingCall {
    key: String,
    rx: oneshot::Receiver<Reply>,
    inner: Arc<Inner>,
}

impl PendingCall {
    /// Wire id of the call.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.key
    }

    /// Wait for the reply. Cancel-safe: it can be raced in `select!` and
    /// awaited again later.
    pub async fn wait(&mut self) -> Reply {
        match (&mut self.rx).await {
            Ok(reply) => reply,
            Err(_) => Reply {
                outcome: Err(AppError::Transport("connection closed".into())),
                after_inbound: 0,
            },
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.inner.forget(&self.key);
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}
