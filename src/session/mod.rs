//! Process manager: owns the agent subprocess, the shared connection, and
//! the sink slot turns bind to.
//!
//! Lifecycle: `Created → Negotiating → Serving → Closing → Closed`.
//!
//! ```text
//! Session::create
//!   ├─ probe:      <exe> info --json        (wire_protocol_version)
//!   ├─ spawn:      <exe> <args...>          (stdio piped)
//!   ├─ dispatcher: event / request          (for the life of the process)
//!   └─ initialize: tools, slash commands    (version >= 1.1 only)
//! ```

mod dispatcher;
pub mod handshake;
pub mod sink;
pub mod spawner;
pub mod tools;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, TimeoutConfig};
use crate::rpc::connection::RpcConnection;
use crate::rpc::naming::MethodTable;
use crate::rpc::transport::Transport;
use crate::session::dispatcher::Dispatcher;
use crate::session::sink::SinkSlot;
use crate::session::spawner::ExitInfo;
use crate::session::tools::{Tool, ToolRegistry};
use crate::turn::engine::{exit_failure, prefer_exit, roundtrip, TurnContext};
use crate::turn::Turn;
use crate::wire::content::Content;
use crate::wire::params::SlashCommand;
use crate::{AppError, Result};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, nothing started.
    Created,
    /// Probing the agent and running `initialize`.
    Negotiating,
    /// Accepting prompts.
    Serving,
    /// `close` in progress.
    Closing,
    /// Torn down, or the connection dropped.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Negotiating => "negotiating",
            Self::Serving => "serving",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Options for [`Session::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Method-name table.
    pub methods: MethodTable,
    /// Handshake, cancel, and shutdown timeouts. The probe timeout is unused.
    pub timeouts: TimeoutConfig,
    /// External tools to register.
    pub tools: Vec<Tool>,
    /// Send `initialize` before serving.
    pub initialize: bool,
}

/// A running agent session.
///
/// At most one [`Turn`] is active at a time; [`prompt`](Self::prompt)
/// fails with [`AppError::Busy`] while one is. Dropping the session cancels
/// live turns and kills the subprocess; call [`close`](Self::close) for an
/// orderly shutdown.
pub struct Session {
    transport: Transport,
    slot: Arc<SinkSlot>,
    handled: watch::Receiver<u64>,
    exit: watch::Receiver<Option<ExitInfo>>,
    timeouts: TimeoutConfig,
    tools: Arc<ToolRegistry>,
    slash_commands: Vec<SlashCommand>,
    state: Mutex<SessionState>,
    next_turn: AtomicU64,
    /// Parent of every turn token.
    turns: CancellationToken,
    /// Fires to stop the subprocess.
    terminate: CancellationToken,
    tasks: TaskTracker,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("live_turns", &self.slot.live_count())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the agent described by `config`, negotiate, and start serving.
    ///
    /// # Errors
    ///
    /// - [`AppError::Config`] on an invalid configuration or tool set.
    /// - [`AppError::Spawn`] if the probe or spawn fails, or the agent
    ///   rejects a tool.
    /// - [`AppError::Transport`] / [`AppError::Rpc`] if `initialize` fails.
    /// - [`AppError::SubprocessExit`] if the agent dies during negotiation.
    pub async fn create(config: SessionConfig, tools: Vec<Tool>) -> Result<Self> {
        config.validate()?;
        let registry = ToolRegistry::new(tools)?;

        let version = handshake::probe_protocol_version(&config).await?;
        info!(
            executable = config.executable.as_str(),
            version = version.as_str(),
            "session: agent probed"
        );

        let agent = spawner::spawn_agent(&config)?;
        let tasks = TaskTracker::new();
        if let Some(stderr) = agent.stderr {
            spawner::forward_stderr(stderr, &tasks);
        }
        let (exit_tx, exit_rx) = watch::channel(None);
        let terminate = CancellationToken::new();
        spawner::monitor_exit(
            agent.child,
            terminate.clone(),
            exit_tx,
            config.timeouts.shutdown(),
            &tasks,
        );

        let mut session = Self::serve(
            agent.stdout,
            agent.stdin,
            config.methods.clone(),
            config.timeouts.clone(),
            registry,
            exit_rx,
            terminate,
            tasks,
        );

        if handshake::supports_initialize(&version) {
            session.negotiate().await?;
        } else if !session.tools.is_empty() {
            warn!(
                version = version.as_str(),
                "session: agent predates initialize, external tools not registered"
            );
        }
        session.set_state(SessionState::Serving);
        Ok(session)
    }

    /// Run a session over an existing byte stream. There is no subprocess:
    /// no probe runs, and `initialize` is sent only when
    /// [`ConnectOptions::initialize`] is set.
    ///
    /// # Errors
    ///
    /// Returns the `initialize` failure, or [`AppError::Config`] on a
    /// duplicate tool name.
    pub async fn connect<R, W>(reader: R, writer: W, options: ConnectOptions) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let registry = ToolRegistry::new(options.tools)?;
        // No process: the exit channel is closed from the start.
        let (_, exit_rx) = watch::channel(None);
        let mut session = Self::serve(
            reader,
            writer,
            options.methods,
            options.timeouts,
            registry,
            exit_rx,
            CancellationToken::new(),
            TaskTracker::new(),
        );
        if options.initialize {
            session.negotiate().await?;
        }
        session.set_state(SessionState::Serving);
        Ok(session)
    }

    #[allow(clippy::too_many_arguments)]
    fn serve<R, W>(
        reader: R,
        writer: W,
        methods: MethodTable,
        timeouts: TimeoutConfig,
        tools: ToolRegistry,
        exit: watch::Receiver<Option<ExitInfo>>,
        terminate: CancellationToken,
        tasks: TaskTracker,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (conn, inbound) = RpcConnection::start(reader, writer, methods);
        let slot = SinkSlot::new();
        let tools = Arc::new(tools);
        let (handled_tx, handled) = watch::channel(0);

        let dispatcher = Dispatcher {
            conn: conn.clone(),
            slot: Arc::clone(&slot),
            tools: Arc::clone(&tools),
            handled: handled_tx,
        };
        tasks.spawn(dispatcher.run(inbound));

        Self {
            transport: Transport::new(conn),
            slot,
            handled,
            exit,
            timeouts,
            tools,
            slash_commands: Vec::new(),
            state: Mutex::new(SessionState::Created),
            next_turn: AtomicU64::new(1),
            turns: CancellationToken::new(),
            terminate,
            tasks,
        }
    }

    async fn negotiate(&mut self) -> Result<()> {
        self.set_state(SessionState::Negotiating);
        match handshake::initialize(&self.transport, &self.tools, self.timeouts.handshake()).await
        {
            Ok(result) => {
                self.slash_commands = result.slash_commands;
                Ok(())
            }
            Err(err) => {
                let mut exit = self.exit.clone();
                let err = prefer_exit(&mut exit, err).await;
                warn!(error = %err, "session: negotiation failed, closing");
                if let Err(close_err) = self.close().await {
                    debug!(error = %close_err, "session: close after failed negotiation");
                }
                Err(err)
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Current lifecycle state. A serving session whose connection dropped
    /// reports [`SessionState::Closed`].
    #[must_use]
    pub fn state(&self) -> SessionState {
        let state = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state == SessionState::Serving && self.transport.connection().is_closed() {
            SessionState::Closed
        } else {
            state
        }
    }

    /// Background tasks the session is tracking: the dispatcher plus, for a
    /// spawned agent, its stderr forwarder and exit monitor. Turn tasks are
    /// tracked per turn and never counted here.
    #[must_use]
    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Slash commands advertised by the agent during `initialize`.
    #[must_use]
    pub fn slash_commands(&self) -> &[SlashCommand] {
        &self.slash_commands
    }

    /// Start a turn. Returns once the agent has pushed its first message or
    /// answered the prompt.
    ///
    /// # Errors
    ///
    /// - [`AppError::Busy`] while another turn is active.
    /// - [`AppError::Closed`] after [`close`](Self::close) or a dropped
    ///   connection.
    /// - The prompt's RPC or transport error when it fails before any
    ///   message was pushed; [`AppError::SubprocessExit`] takes priority.
    pub async fn prompt(&self, content: impl Into<Content>) -> Result<Turn> {
        self.start_turn(content.into(), None).await
    }

    /// Like [`prompt`](Self::prompt), with an external cancellation token.
    /// Cancelling `cancel` cancels the turn until the agent has answered
    /// the prompt; after that, use [`Turn::cancel`].
    ///
    /// # Errors
    ///
    /// As [`prompt`](Self::prompt), plus [`AppError::Cancelled`] when
    /// `cancel` fires before the first message.
    pub async fn prompt_with(
        &self,
        content: impl Into<Content>,
        cancel: CancellationToken,
    ) -> Result<Turn> {
        self.start_turn(content.into(), Some(cancel)).await
    }

    async fn start_turn(
        &self,
        content: Content,
        external: Option<CancellationToken>,
    ) -> Result<Turn> {
        match self.state() {
            SessionState::Serving => {}
            SessionState::Closed | SessionState::Closing => {
                return Err(AppError::Closed("session is closed".into()));
            }
            state => {
                return Err(AppError::Closed(format!("session is not serving ({state})")));
            }
        }

        let turn_id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let ctx = TurnContext {
            transport: self.transport.clone(),
            slot: Arc::clone(&self.slot),
            handled: self.handled.clone(),
            exit: self.exit.clone(),
            cancel_grace: self.timeouts.cancel_grace(),
        };
        roundtrip(&ctx, turn_id, content, &self.turns, external).await
    }

    /// Cancel every live turn, close the connection, and stop the agent.
    /// Safe with turns still being consumed. Only the first call does any
    /// work; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// - [`AppError::SubprocessExit`] if the agent exited with a non-zero
    ///   status or could not be stopped. This takes priority.
    /// - [`AppError::Transport`] if live turns were still running when the
    ///   shutdown timeout expired.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        info!("session: closing");

        self.turns.cancel();
        let live = self.slot.drain_live();
        debug!(turns = live.len(), "session: cancelling live turns");
        for turn in &live {
            turn.token.cancel();
        }
        let drain = async {
            for turn in &live {
                turn.tasks.wait().await;
            }
        };
        let shutdown = self.timeouts.shutdown();
        let mut failure = None;
        if tokio::time::timeout(shutdown, drain).await.is_err() {
            warn!("session: live turns did not wind down in time");
            failure = Some(AppError::Transport(format!(
                "shutdown timeout: live turns still running after {shutdown:?}"
            )));
        }

        self.transport.connection().close().await;
        self.terminate.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.set_state(SessionState::Closed);

        if let Some(err) = self.stop_failure() {
            failure = Some(err);
        }
        match failure {
            Some(err) => {
                warn!(error = %err, "session: closed with error");
                Err(err)
            }
            None => {
                info!("session: closed");
                Ok(())
            }
        }
    }

    fn stop_failure(&self) -> Option<AppError> {
        let stop_error = self.exit.borrow().as_ref().and_then(|info| info.stop_error.clone());
        match stop_error {
            Some(reason) => Some(AppError::SubprocessExit(format!(
                "agent could not be stopped: {reason}"
            ))),
            None => exit_failure(&self.exit),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.turns.cancel();
        self.transport.connection().abort();
        self.terminate.cancel();
    }
}
