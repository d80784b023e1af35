//! Fold a turn's message stream into chat-style messages.
//!
//! Steps are the flush boundary: call [`MessageAggregator::begin_step`] for
//! every [`Step`](crate::turn::Step) taken from a turn and feed each event of
//! it, then [`flush`](MessageAggregator::flush) once the turn is over.
//!
//! In full mode each step yields one assistant message (merged content plus
//! the tool calls that received a result) followed by one tool message per
//! result. In final-only mode intermediate steps are discarded and only the
//! text of the last step survives.

use serde::{Deserialize, Serialize};

use crate::wire::content::{Content, ContentPart};
use crate::wire::event::{Event, ToolCall, ToolResult};
use crate::wire::request::Message;

/// Author of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Model output.
    Assistant,
    /// Result of a tool call.
    Tool,
}

/// One aggregated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Merged content.
    pub content: Content,
    /// Tool calls issued by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call answered by a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Concatenated text of the message.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.extract_text()
    }

    fn from_tool_result(result: ToolResult) -> Self {
        let value = result.return_value;
        let mut parts = Vec::new();
        if value.is_error {
            let reason = if value.message.is_empty() {
                "tool call failed"
            } else {
                value.message.as_str()
            };
            parts.push(ContentPart::text(format!("ERROR: {reason}")));
        }
        match value.output {
            Content::Text(text) if text.is_empty() => {}
            Content::Text(text) => parts.push(ContentPart::text(text)),
            Content::Parts(more) => parts.extend(more),
        }
        Self {
            role: Role::Tool,
            content: Content::Parts(parts),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id),
        }
    }
}

#[derive(Debug)]
struct PendingCall {
    call: ToolCall,
    result: Option<ToolResult>,
}

/// Stateful aggregator; see the module docs.
#[derive(Debug, Default)]
pub struct MessageAggregator {
    final_message_only: bool,
    content: Vec<ContentPart>,
    /// Tool calls of the current step, in emission order.
    calls: Vec<PendingCall>,
}

impl MessageAggregator {
    /// Full-mode aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregator that keeps only the last step's text.
    #[must_use]
    pub fn final_message_only() -> Self {
        Self {
            final_message_only: true,
            ..Self::default()
        }
    }

    /// Mark a step boundary. Returns the messages completed by it.
    pub fn begin_step(&mut self) -> Vec<ChatMessage> {
        if self.final_message_only {
            self.reset();
            return Vec::new();
        }
        self.flush()
    }

    /// Feed one message of the turn. Requests are ignored; answer them
    /// before or after feeding.
    pub fn feed(&mut self, message: &Message) -> Vec<ChatMessage> {
        match message {
            Message::Event(event) => self.feed_event(event),
            Message::Request(_) => Vec::new(),
        }
    }

    /// Feed one event.
    pub fn feed_event(&mut self, event: &Event) -> Vec<ChatMessage> {
        match event {
            Event::StepBegin(_) | Event::StepInterrupted => return self.begin_step(),
            Event::ContentPart(part) => {
                let merged = self
                    .content
                    .last_mut()
                    .is_some_and(|last| last.merge(part));
                if !merged {
                    self.content.push(part.clone());
                }
            }
            Event::ToolCall(call) if !self.final_message_only => {
                self.calls.retain(|pending| pending.call.id != call.id);
                self.calls.push(PendingCall {
                    call: call.clone(),
                    result: None,
                });
            }
            Event::ToolCallPart(part) if !self.final_message_only => {
                if let (Some(last), Some(fragment)) =
                    (self.calls.last_mut(), part.arguments_part.as_deref())
                {
                    last.call
                        .function
                        .arguments
                        .get_or_insert_with(String::new)
                        .push_str(fragment);
                }
            }
            Event::ToolResult(result) if !self.final_message_only => {
                if let Some(pending) = self
                    .calls
                    .iter_mut()
                    .find(|pending| pending.call.id == result.tool_call_id)
                {
                    pending.result = Some(result.clone());
                }
            }
            _ => {}
        }
        Vec::new()
    }

    /// Emit whatever the current step holds.
    pub fn flush(&mut self) -> Vec<ChatMessage> {
        if self.final_message_only {
            return self.flush_final_only();
        }
        if self.content.is_empty() && self.calls.is_empty() {
            return Vec::new();
        }

        let mut tool_calls = Vec::new();
        let mut results = Vec::new();
        for pending in self.calls.drain(..) {
            // Calls without a result are not part of the transcript.
            if let Some(result) = pending.result {
                tool_calls.push(pending.call);
                results.push(result);
            }
        }

        let mut messages = vec![ChatMessage {
            role: Role::Assistant,
            content: Content::Parts(std::mem::take(&mut self.content)),
            tool_calls,
            tool_call_id: None,
        }];
        messages.extend(results.into_iter().map(ChatMessage::from_tool_result));
        messages
    }

    fn flush_final_only(&mut self) -> Vec<ChatMessage> {
        let text = Content::Parts(std::mem::take(&mut self.content)).extract_text();
        self.reset();
        if text.is_empty() {
            return Vec::new();
        }
        vec![ChatMessage {
            role: Role::Assistant,
            content: Content::Text(text),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }]
    }

    fn reset(&mut self) {
        self.content.clear();
        self.calls.clear();
    }
}
