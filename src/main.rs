#![forbid(unsafe_code)]

//! `agent-wire`: run one prompt against an agent and stream its reply.
//!
//! Text parts are written to stdout as they arrive. Approval requests are
//! answered automatically with `--auto-approve`, otherwise interactively on
//! stdin. Ctrl-C cancels the running turn.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_wire::wire::{ApprovalRequest, Request};
use agent_wire::{
    AppError, ApprovalResponse, ContentPart, Event, Message, MessageAggregator, PendingRequest,
    Result, Session, SessionConfig, ToolReturnValue, Turn,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-wire", about = "Drive a headless agent over JSON-RPC", version, long_about = None)]
struct Cli {
    /// Path to a TOML session configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent executable, overriding the configuration.
    #[arg(long)]
    executable: Option<String>,

    /// Working directory of the agent.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Approve every approval request without asking.
    #[arg(long)]
    auto_approve: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print only the final assistant message.
    #[arg(long)]
    final_only: bool,

    /// Prompt text.
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_path(path)?,
        None => SessionConfig::default(),
    };
    if let Some(executable) = args.executable.clone() {
        config.executable = executable;
    }
    if let Some(dir) = args.work_dir.clone() {
        config.work_dir = Some(dir);
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        return Err(AppError::Config("prompt must not be empty".into()));
    }

    // ── Start the agent ─────────────────────────────────
    let session = Session::create(config, Vec::new()).await?;
    info!("session ready");

    let outcome = drive(&session, &prompt, &args).await;
    let closed = session.close().await;
    outcome.and(closed)
}

async fn drive(session: &Session, prompt: &str, args: &Cli) -> Result<()> {
    let mut turn = session.prompt(prompt).await?;

    let cancel = turn.cancel_token();
    let interrupt = tokio::spawn(async move {
        shutdown_signal().await;
        info!("interrupt received, cancelling turn");
        cancel.cancel();
    });

    let streamed = stream_turn(&mut turn, args).await;
    interrupt.abort();
    streamed?;

    let result = turn.result();
    let usage = turn.usage();
    eprintln!(
        "status: {} steps: {} tokens in/out: {}/{} context: {:.1}%",
        result.status,
        result.steps.unwrap_or_default(),
        usage.tokens.input(),
        usage.tokens.output,
        usage.context * 100.0
    );

    match turn.err() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn stream_turn(turn: &mut Turn, args: &Cli) -> Result<()> {
    let mut aggregator = args
        .final_only
        .then(MessageAggregator::final_message_only);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    while let Some(mut step) = turn.next_step().await {
        if let Some(aggregator) = aggregator.as_mut() {
            aggregator.begin_step();
        }
        while let Some(message) = step.next_message().await {
            match message {
                Message::Event(event) => match aggregator.as_mut() {
                    Some(aggregator) => {
                        aggregator.feed_event(&event);
                    }
                    None => {
                        if let Event::ContentPart(ContentPart::Text { text }) = &event {
                            write!(stdout, "{text}")?;
                            stdout.flush()?;
                        }
                    }
                },
                Message::Request(request) => {
                    answer(&request, args.auto_approve, &mut stdin).await?;
                }
            }
        }
    }

    match aggregator.as_mut() {
        Some(aggregator) => {
            for message in aggregator.flush() {
                writeln!(stdout, "{}", message.text())?;
            }
        }
        None => writeln!(stdout)?,
    }
    Ok(())
}

async fn answer(
    pending: &PendingRequest,
    auto_approve: bool,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    match pending.request() {
        Request::Approval(request) => {
            let response = if auto_approve {
                ApprovalResponse::Approve
            } else {
                ask(request, stdin).await?
            };
            info!(request_id = request.id.as_str(), %response, "approval answered");
            pending.respond(response)
        }
        Request::ToolCall(call) => {
            warn!(tool = call.function.name.as_str(), "agent called an unknown tool");
            pending.respond(ToolReturnValue::error(format!(
                "tool {} is not available",
                call.function.name
            )))
        }
    }
}

async fn ask(
    request: &ApprovalRequest,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<ApprovalResponse> {
    eprint!(
        "\n[{}] {}: {}\napprove? [y]es / [a]lways / [N]o: ",
        request.sender, request.action, request.description
    );
    std::io::stderr().flush()?;

    let line = stdin.next_line().await?.unwrap_or_default();
    Ok(match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalResponse::Approve,
        "a" | "always" => ApprovalResponse::ApproveForSession,
        _ => ApprovalResponse::Reject,
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the agent's reply.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
