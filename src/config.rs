//! Session configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::rpc::naming::MethodTable;
use crate::{AppError, Result};

/// Launch options forwarded to the agent as command-line flags.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct AgentOptions {
    /// `--model <name>`
    pub model: Option<String>,
    /// `--config-file <path>`
    pub config_file: Option<PathBuf>,
    /// `--session <id>` to resume a session.
    pub session: Option<String>,
    /// `--mcp-config-file <path>`
    pub mcp_config_file: Option<PathBuf>,
    /// `--skills-dir <path>`
    pub skills_dir: Option<PathBuf>,
    /// `--auto-approve`
    pub auto_approve: bool,
    /// `--thinking` / `--no-thinking`; unset leaves the agent default.
    pub thinking: Option<bool>,
    /// Appended verbatim after every other flag.
    pub extra_args: Vec<String>,
}

impl AgentOptions {
    fn push_args(&self, args: &mut Vec<String>) {
        let mut flag = |name: &str, value: &str| {
            args.push(name.to_owned());
            args.push(value.to_owned());
        };
        if let Some(model) = &self.model {
            flag("--model", model);
        }
        if let Some(path) = &self.config_file {
            flag("--config-file", &path.to_string_lossy());
        }
        if let Some(session) = &self.session {
            flag("--session", session);
        }
        if let Some(path) = &self.mcp_config_file {
            flag("--mcp-config-file", &path.to_string_lossy());
        }
        if let Some(path) = &self.skills_dir {
            flag("--skills-dir", &path.to_string_lossy());
        }
        if self.auto_approve {
            args.push("--auto-approve".to_owned());
        }
        match self.thinking {
            Some(true) => args.push("--thinking".to_owned()),
            Some(false) => args.push("--no-thinking".to_owned()),
            None => {}
        }
        args.extend(self.extra_args.iter().cloned());
    }
}

/// Timeout values in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Bound on `<exe> info --json`.
    #[serde(default = "default_probe_seconds")]
    pub probe_seconds: u64,
    /// Bound on the `initialize` reply.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// How long a cancelled turn keeps waiting for the `prompt` reply.
    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,
    /// Bound on each phase of session close.
    #[serde(default = "default_shutdown_seconds")]
    pub shutdown_seconds: u64,
}

fn default_probe_seconds() -> u64 {
    30
}

fn default_handshake_seconds() -> u64 {
    30
}

fn default_cancel_grace_seconds() -> u64 {
    5
}

fn default_shutdown_seconds() -> u64 {
    5
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_seconds: default_probe_seconds(),
            handshake_seconds: default_handshake_seconds(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
            shutdown_seconds: default_shutdown_seconds(),
        }
    }
}

impl TimeoutConfig {
    /// Probe timeout.
    #[must_use]
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_seconds)
    }

    /// Handshake timeout.
    #[must_use]
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_seconds)
    }

    /// Cancel grace period.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_seconds)
    }

    /// Shutdown phase timeout.
    #[must_use]
    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_seconds)
    }
}

fn default_executable() -> String {
    "kimi".into()
}

fn default_args() -> Vec<String> {
    vec!["--wire".into()]
}

fn default_true() -> bool {
    true
}

/// Everything needed to launch and talk to one agent process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Agent executable, resolved through `PATH`.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Base arguments; must select the wire mode.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory of the agent; also passed as `--work-dir`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Extra environment variables, applied last.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Inherit this process's environment. When `false` only a small
    /// allowlist survives.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    /// Agent launch flags.
    #[serde(default)]
    pub agent: AgentOptions,
    /// Timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Wire method names.
    #[serde(default)]
    pub methods: MethodTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: default_args(),
            work_dir: None,
            env: BTreeMap::new(),
            inherit_env: true,
            agent: AgentOptions::default(),
            timeouts: TimeoutConfig::default(),
            methods: MethodTable::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults with a different executable.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Append one base argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.executable.trim().is_empty() {
            return Err(AppError::Config("executable must not be empty".into()));
        }

        if self.timeouts.probe_seconds == 0 || self.timeouts.handshake_seconds == 0 {
            return Err(AppError::Config(
                "probe_seconds and handshake_seconds must be greater than zero".into(),
            ));
        }

        if let Some(problem) = self.methods.conflicts().into_iter().next() {
            return Err(AppError::Config(problem));
        }

        if let Some(dir) = &self.work_dir {
            if !dir.is_dir() {
                return Err(AppError::Config(format!(
                    "work_dir is not a directory: {}",
                    dir.display()
                )));
            }
        }

        if self.env.keys().any(|key| key.is_empty() || key.contains('=')) {
            return Err(AppError::Config(
                "env keys must be non-empty and must not contain '='".into(),
            ));
        }

        Ok(())
    }

    /// Full argument list: base args, `--work-dir`, then agent flags.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(dir) = &self.work_dir {
            args.push("--work-dir".to_owned());
            args.push(dir.to_string_lossy().into_owned());
        }
        self.agent.push_args(&mut args);
        args
    }
}
