//! Dispatcher for agent-initiated calls.
//!
//! Calls are handled one at a time in arrival order, which keeps events in
//! emission order on the consumer side. After each call the dispatcher
//! publishes its sequence number on a watch channel; the turn engine waits on
//! that watermark before it closes a turn's stream.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::rpc::connection::RpcConnection;
use crate::rpc::frame::RpcError;
use crate::rpc::naming::InboundMethod;
use crate::rpc::reader::InboundCall;
use crate::session::sink::{Binding, SinkSlot};
use crate::session::tools::ToolRegistry;
use crate::wire::event::Event;
use crate::wire::request::{Message, PendingRequest, Request, Responder};

pub(crate) struct Dispatcher {
    pub(crate) conn: RpcConnection,
    pub(crate) slot: Arc<SinkSlot>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) handled: watch::Sender<u64>,
}

impl Dispatcher {
    /// Serve until the reader closes the inbound queue.
    pub(crate) async fn run(self, mut inbound: mpsc::UnboundedReceiver<InboundCall>) {
        while let Some(call) = inbound.recv().await {
            let seq = call.seq;
            let id = call.id.clone();
            let outcome = match call.method {
                InboundMethod::Event => self.handle_event(call.params).await,
                InboundMethod::Request => self.handle_request(call.params).await,
            };
            if let Err(err) = &outcome {
                debug!(seq, code = err.code, message = err.message.as_str(), "dispatcher: call rejected");
            }
            self.conn.respond(id, outcome);
            self.handled.send_replace(seq);
        }
        debug!("dispatcher: inbound queue closed, stopping");
    }

    async fn handle_event(&self, params: Value) -> Result<Value, RpcError> {
        let event = Event::from_params(params).map_err(|e| {
            warn!(error = %e, "dispatcher: undecodable event");
            RpcError::invalid_params(e.to_string())
        })?;

        match self.slot.binding() {
            Some(binding) => {
                debug!(turn_id = binding.turn_id, kind = %event.kind(), "dispatcher: event");
                push(&binding, Message::Event(event)).await;
            }
            None => {
                debug!(kind = %event.kind(), "dispatcher: event with no turn bound, dropped");
            }
        }
        Ok(json!({}))
    }

    async fn handle_request(&self, params: Value) -> Result<Value, RpcError> {
        let request = Request::from_params(params).map_err(|e| {
            warn!(error = %e, "dispatcher: undecodable request");
            RpcError::invalid_params(e.to_string())
        })?;

        let Some(binding) = self.slot.binding() else {
            warn!(request_id = request.id(), "dispatcher: request with no turn bound");
            return Err(RpcError::internal("no roundtrip in progress"));
        };

        if let Request::ToolCall(call) = &request {
            if let Some(tool) = self.tools.get(&call.function.name) {
                debug!(
                    turn_id = binding.turn_id,
                    tool = call.function.name.as_str(),
                    "dispatcher: running registered tool"
                );
                let value = tool.invoke(call.function.arguments.as_deref()).await;
                return Ok(json!({
                    "tool_call_id": call.tool_call_id,
                    "return_value": value,
                }));
            }
        }

        debug!(
            turn_id = binding.turn_id,
            request_id = request.id(),
            kind = %request.kind(),
            "dispatcher: forwarding request"
        );
        let (responder, rx) = Responder::channel();
        let pending = PendingRequest::new(request.clone(), responder);
        if !push(&binding, Message::Request(pending)).await {
            return Err(RpcError::internal("turn cancelled"));
        }

        tokio::select! {
            answer = rx => match answer {
                Ok(response) => Ok(response.to_result(&request)),
                Err(_) => {
                    warn!(request_id = request.id(), "dispatcher: request dropped without a response");
                    Err(RpcError::internal("request dropped without a response"))
                }
            },
            () = binding.token.cancelled() => {
                debug!(request_id = request.id(), "dispatcher: turn cancelled while awaiting response");
                Err(RpcError::internal("turn cancelled"))
            }
        }
    }
}

/// Relay one message into the bound turn. Returns `false` when the turn was
/// cancelled or stopped reading first.
async fn push(binding: &Binding, message: Message) -> bool {
    tokio::select! {
        biased;

        () = binding.token.cancelled() => false,
        sent = binding.tx.send(message) => sent.is_ok(),
    }
}
