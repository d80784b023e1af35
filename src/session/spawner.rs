//! Agent process spawner and exit monitor.
//!
//! The agent is launched with piped stdio and `kill_on_drop(true)`. When the
//! configuration disables environment inheritance, the child starts from
//! `env_clear()` plus [`ALLOWED_ENV_VARS`], so credentials held by the host
//! process do not leak into the agent.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Variables kept when `inherit_env` is off.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Build the base command for `config`, without stdio wiring.
#[must_use]
pub fn base_command(config: &SessionConfig) -> Command {
    let mut cmd = Command::new(&config.executable);

    if !config.inherit_env {
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd.envs(&config.env);

    if let Some(dir) = &config.work_dir {
        cmd.current_dir(dir);
    }
    cmd
}

// ── Process handle ───────────────────────────────────────────────────────────

/// How the agent process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    /// Human-readable status.
    pub description: String,
    /// Set when the process ignored `SIGTERM` and could not be killed.
    pub stop_error: Option<String>,
}

impl ExitInfo {
    /// `true` for a positive exit code.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code.is_some_and(|code| code > 0)
    }
}

/// A spawned agent with its pipes taken out.
#[derive(Debug)]
pub struct SpawnedAgent {
    /// Child handle; handed to [`monitor_exit`].
    pub child: Child,
    /// Agent input.
    pub stdin: ChildStdin,
    /// Agent output.
    pub stdout: ChildStdout,
    /// Agent diagnostics.
    pub stderr: Option<ChildStderr>,
}

/// Spawn the agent described by `config`.
///
/// # Errors
///
/// Returns `AppError::Spawn` when the OS refuses to start the process or a
/// pipe cannot be captured.
pub fn spawn_agent(config: &SessionConfig) -> Result<SpawnedAgent> {
    let args = config.command_args();
    let mut cmd = base_command(config);
    cmd.args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {}: {err}", config.executable))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child.stderr.take();

    info!(
        executable = config.executable.as_str(),
        pid = child.id(),
        ?args,
        "agent process spawned"
    );

    Ok(SpawnedAgent {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Forward the agent's stderr to `tracing` line by line.
pub fn forward_stderr(stderr: ChildStderr, tasks: &TaskTracker) {
    tasks.spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(line = line.as_str(), "agent stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "agent stderr closed with error");
                    break;
                }
            }
        }
    });
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Watch `child` until it exits or `terminate` fires, publishing the exit on
/// `exit_tx`.
///
/// On `terminate` the child gets `SIGTERM` (Unix) and `grace` to exit before
/// it is killed.
pub fn monitor_exit(
    mut child: Child,
    terminate: CancellationToken,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    grace: Duration,
    tasks: &TaskTracker,
) {
    tasks.spawn(async move {
        let pid = child.id();
        let mut stop_error = None;
        let status = tokio::select! {
            status = child.wait() => status,
            () = terminate.cancelled() => {
                info!(pid, "terminating agent process");
                request_stop(&child);
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(pid, "agent ignored SIGTERM, killing");
                        if let Err(err) = child.kill().await {
                            warn!(pid, %err, "failed to kill agent process");
                            stop_error = Some(err.to_string());
                        }
                        child.wait().await
                    }
                }
            }
        };

        let info = match status {
            Ok(status) => ExitInfo {
                code: status.code(),
                description: status.to_string(),
                stop_error,
            },
            Err(err) => {
                warn!(pid, %err, "error waiting for agent child process");
                ExitInfo {
                    code: None,
                    description: format!("wait error: {err}"),
                    stop_error,
                }
            }
        };
        info!(pid, code = info.code, status = info.description.as_str(), "agent process exited");
        exit_tx.send_replace(Some(info));
    });
}

#[cfg(unix)]
fn request_stop(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_stop(child: &Child) {
    // No graceful signal on this platform; the kill fallback applies.
    let _ = child;
}
