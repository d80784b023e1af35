#![forbid(unsafe_code)]

//! `mock-agent`: a scripted agent speaking the wire protocol over stdio.
//!
//! Used by the process-level tests and for trying the `agent-wire` binary
//! without a real agent. `mock-agent info --json` reports the wire version;
//! `mock-agent --wire [--mode <mode>]` serves JSON-RPC on stdin/stdout.
//!
//! Environment knobs:
//! - `MOCK_AGENT_WIRE_VERSION`: version reported by `info --json` (`1.1`).
//! - `MOCK_AGENT_REJECT_TOOL`: tool name refused during `initialize`.
//! - `MOCK_AGENT_TOOL`: tool called in `tool-call` mode (`test_tool`).
//! - `MOCK_AGENT_ECHO`: text echoed back in `env` mode.

use std::io::{self, Lines, StdinLock, StdoutLock, Write};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};

/// Number of content events sent in `flood` mode.
const FLOOD_EVENTS: usize = 1000;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Mode {
    /// TurnBegin, StepBegin, one text part, one usage report, `finished`.
    Default,
    /// Approval request immediately followed by the prompt reply.
    Deadlock,
    /// A thousand text parts, then `finished`.
    Flood,
    /// TurnBegin, then a JSON-RPC error for the prompt.
    PromptError,
    /// Calls an external tool and reports its result.
    ToolCall,
    /// Asks for approval and echoes the decision.
    Approval,
    /// Streams a little, then waits for `cancel`.
    Hang,
    /// TurnBegin, then exits with status 3.
    ExitError,
    /// Echoes its arguments, working directory, and `MOCK_AGENT_ECHO`.
    Env,
}

#[derive(Debug, Parser)]
#[command(name = "mock-agent", about = "Scripted wire-protocol agent", version, long_about = None)]
#[allow(clippy::struct_excessive_bools, dead_code)]
struct Cli {
    /// Serve the wire protocol on stdio.
    #[arg(long)]
    wire: bool,

    /// Script to run for each prompt.
    #[arg(long, value_enum, default_value_t = Mode::Default)]
    mode: Mode,

    // Flags of the real agent, accepted and ignored.
    #[arg(long)]
    work_dir: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    config_file: Option<PathBuf>,
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    mcp_config_file: Option<PathBuf>,
    #[arg(long)]
    skills_dir: Option<PathBuf>,
    #[arg(long)]
    auto_approve: bool,
    #[arg(long)]
    thinking: bool,
    #[arg(long)]
    no_thinking: bool,

    /// `info --json`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    if cli.command.first().map(String::as_str) == Some("info") {
        let version =
            std::env::var("MOCK_AGENT_WIRE_VERSION").unwrap_or_else(|_| "1.1".to_owned());
        println!("{}", json!({ "wire_protocol_version": version }));
        return;
    }

    if !cli.wire {
        eprintln!("missing --wire flag");
        std::process::exit(1);
    }

    let mut agent = Agent {
        mode: cli.mode,
        argv: std::env::args().skip(1).collect(),
        lines: io::stdin().lines(),
        out: io::stdout().lock(),
        next_event: 0,
        next_request: 0,
        parked_prompt: None,
    };
    eprintln!("mock-agent: serving in {:?} mode", cli.mode);
    if let Err(err) = agent.serve() {
        eprintln!("mock-agent: {err}");
        std::process::exit(2);
    }
}

struct Agent {
    mode: Mode,
    argv: Vec<String>,
    lines: Lines<StdinLock<'static>>,
    out: StdoutLock<'static>,
    next_event: u64,
    next_request: u64,
    /// Prompt left unanswered by `hang` mode until `cancel` arrives.
    parked_prompt: Option<Value>,
}

impl Agent {
    fn serve(&mut self) -> io::Result<()> {
        while let Some(line) = self.lines.next() {
            let line = line?;
            let Ok(frame) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            self.handle(&frame)?;
        }
        Ok(())
    }

    /// Handle one client frame. Replies to our own callbacks are ignored.
    fn handle(&mut self, frame: &Value) -> io::Result<()> {
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        match frame.get("method").and_then(Value::as_str) {
            Some("initialize") => self.initialize(id, frame.get("params")),
            Some("prompt") => self.prompt(id),
            Some("cancel") => self.cancel(id),
            Some(other) => self.send(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {other}") },
            })),
            None => Ok(()),
        }
    }

    // ── Outbound frames ──────────────────────────────────────────────────

    fn send(&mut self, frame: &Value) -> io::Result<()> {
        writeln!(self.out, "{frame}")?;
        self.out.flush()
    }

    fn reply(&mut self, id: Value, result: &Value) -> io::Result<()> {
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    fn event(&mut self, kind: &str, payload: &Value) -> io::Result<()> {
        self.next_event += 1;
        let id = format!("evt-{}", self.next_event);
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "event",
            "params": { "type": kind, "payload": payload },
        }))
    }

    fn text(&mut self, text: &str) -> io::Result<()> {
        self.event("ContentPart", &json!({ "type": "text", "text": text }))
    }

    /// Send a request and return its id.
    fn request(&mut self, kind: &str, payload: &Value) -> io::Result<String> {
        self.next_request += 1;
        let id = format!("req-{}", self.next_request);
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "request",
            "params": { "type": kind, "payload": payload },
        }))?;
        Ok(id)
    }

    /// Serve client frames until the reply to `id` arrives. Returns its
    /// `result`, or `None` on an error reply or EOF.
    fn await_reply(&mut self, id: &str) -> io::Result<Option<Value>> {
        while let Some(line) = self.lines.next() {
            let line = line?;
            let Ok(frame) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let is_reply = frame.get("method").is_none()
                && frame.get("id").and_then(Value::as_str) == Some(id);
            if is_reply {
                return Ok(frame.get("result").cloned());
            }
            self.handle(&frame)?;
        }
        Ok(None)
    }

    // ── Methods ──────────────────────────────────────────────────────────

    fn initialize(&mut self, id: Value, params: Option<&Value>) -> io::Result<()> {
        let reject = std::env::var("MOCK_AGENT_REJECT_TOOL").ok();
        let names: Vec<String> = params
            .and_then(|p| p.get("external_tools"))
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.pointer("/function/name").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let (rejected, accepted): (Vec<String>, Vec<String>) = names
            .into_iter()
            .partition(|name| reject.as_deref() == Some(name.as_str()));
        let rejected: Vec<Value> = rejected
            .into_iter()
            .map(|name| json!({ "name": name, "reason": "not allowed by mock" }))
            .collect();

        self.reply(
            id,
            &json!({
                "slash_commands": [
                    { "name": "help", "description": "Show help", "aliases": ["h", "?"] },
                    "compact",
                ],
                "external_tools": { "accepted": accepted, "rejected": rejected },
            }),
        )
    }

    fn cancel(&mut self, id: Value) -> io::Result<()> {
        self.reply(id, &json!({}))?;
        if let Some(prompt) = self.parked_prompt.take() {
            self.reply(prompt, &json!({ "status": "cancelled" }))?;
        }
        Ok(())
    }

    fn prompt(&mut self, id: Value) -> io::Result<()> {
        let finished = json!({ "status": "finished", "steps": 1 });
        self.event("TurnBegin", &json!({ "user_input": "test" }))?;

        match self.mode {
            Mode::Default => {
                self.event("StepBegin", &json!({ "n": 1 }))?;
                self.text("Hello from mock kimi!")?;
                self.event(
                    "StatusUpdate",
                    &json!({
                        "token_usage": {
                            "input_other": 100,
                            "output": 50,
                            "input_cache_read": 10,
                            "input_cache_creation": 5,
                        },
                    }),
                )?;
                self.reply(id, &finished)
            }

            Mode::Deadlock => {
                self.event("StepBegin", &json!({ "n": 1 }))?;
                self.request(
                    "ApprovalRequest",
                    &json!({
                        "id": "approval-1",
                        "tool_call_id": "call-1",
                        "sender": "Shell",
                        "action": "run command",
                        "description": "run `ls`",
                    }),
                )?;
                // Reply without waiting for the approval.
                self.reply(id, &finished)
            }

            Mode::Flood => {
                self.event("StepBegin", &json!({ "n": 1 }))?;
                for i in 0..FLOOD_EVENTS {
                    self.text(&format!("chunk {i} "))?;
                }
                self.reply(id, &finished)
            }

            Mode::PromptError => self.send(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32000, "message": "simulated prompt error" },
            })),

            Mode::ToolCall => {
                let tool =
                    std::env::var("MOCK_AGENT_TOOL").unwrap_or_else(|_| "test_tool".to_owned());
                self.event("StepBegin", &json!({ "n": 1 }))?;
                let call = json!({
                    "type": "function",
                    "id": "call-1",
                    "function": { "name": tool, "arguments": "{\"input\":\"hello\"}" },
                });
                self.event("ToolCall", &call)?;
                let req = self.request(
                    "ExternalToolCallRequest",
                    &json!({
                        "id": "tool-req-1",
                        "tool_call_id": "call-1",
                        "type": "function",
                        "function": call["function"],
                    }),
                )?;
                let result = self.await_reply(&req)?.unwrap_or(Value::Null);
                let return_value = result.get("return_value").cloned().unwrap_or(Value::Null);
                let output = return_value
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                self.event(
                    "ToolResult",
                    &json!({ "tool_call_id": "call-1", "return_value": return_value }),
                )?;
                self.event("StepBegin", &json!({ "n": 2 }))?;
                self.text(&format!("tool said: {output}"))?;
                self.reply(id, &json!({ "status": "finished", "steps": 2 }))
            }

            Mode::Approval => {
                self.event("StepBegin", &json!({ "n": 1 }))?;
                let req = self.request(
                    "ApprovalRequest",
                    &json!({
                        "id": "approval-1",
                        "tool_call_id": "call-1",
                        "sender": "Shell",
                        "action": "run command",
                        "description": "run `ls`",
                    }),
                )?;
                let decision = self
                    .await_reply(&req)?
                    .and_then(|r| r.get("response").and_then(Value::as_str).map(str::to_owned))
                    .unwrap_or_else(|| "none".to_owned());
                self.event(
                    "ApprovalRequestResolved",
                    &json!({ "request_id": "approval-1", "response": decision }),
                )?;
                self.text(&format!("approval: {decision}"))?;
                self.reply(id, &finished)
            }

            Mode::Hang => {
                self.event("StepBegin", &json!({ "n": 1 }))?;
                self.text("working...")?;
                self.parked_prompt = Some(id);
                Ok(())
            }

            Mode::ExitError => {
                eprintln!("mock-agent: exiting with status 3");
                std::process::exit(3);
            }

            Mode::Env => {
                self.event("StepBegin", &json!({ "n": 1 }))?;
                let echo = std::env::var("MOCK_AGENT_ECHO").unwrap_or_default();
                let cwd = std::env::current_dir()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                let argv = self.argv.join(" ");
                self.text(&format!("echo={echo}\n"))?;
                self.text(&format!("cwd={cwd}\n"))?;
                self.text(&format!("args={argv}\n"))?;
                self.reply(id, &finished)
            }
        }
    }
}
