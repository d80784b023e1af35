//! Protocol negotiation.
//!
//! Before the long-lived process starts, the executable is run once as
//! `<exe> info --json` to learn its `wire_protocol_version`. Agents speaking
//! [`MIN_INITIALIZE_VERSION`] or newer then receive an `initialize` call that
//! registers external tools; older agents skip it and get no tools.

use std::cmp::Ordering;
use std::process::Stdio;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::rpc::transport::Transport;
use crate::session::spawner::base_command;
use crate::session::tools::ToolRegistry;
use crate::wire::params::{InitializeParams, InitializeResult, CLIENT_PROTOCOL_VERSION};
use crate::{AppError, Result};

/// First wire version that understands `initialize`.
pub const MIN_INITIALIZE_VERSION: &str = "1.1";

#[derive(Debug, Deserialize)]
struct InfoOutput {
    #[serde(default)]
    wire_protocol_version: String,
}

/// Run `<exe> info --json` and return the reported wire version (empty when
/// the field is absent).
///
/// # Errors
///
/// Returns `AppError::Spawn` if the command cannot start, times out, exits
/// unsuccessfully, or prints something other than the expected JSON object.
pub async fn probe_protocol_version(config: &SessionConfig) -> Result<String> {
    let mut cmd = base_command(config);
    cmd.args(["info", "--json"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let timeout = config.timeouts.probe();
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            AppError::Spawn(format!(
                "{} info --json did not finish within {timeout:?}",
                config.executable
            ))
        })?
        .map_err(|err| AppError::Spawn(format!("failed to run {}: {err}", config.executable)))?;

    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
        detail.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(AppError::Spawn(format!(
            "{} info --json failed ({}): {}",
            config.executable,
            output.status,
            detail.trim()
        )));
    }

    let info: InfoOutput = serde_json::from_slice(&output.stdout)
        .map_err(|err| AppError::Spawn(format!("unreadable info --json output: {err}")))?;
    debug!(
        version = info.wire_protocol_version.as_str(),
        "handshake: wire protocol version probed"
    );
    Ok(info.wire_protocol_version)
}

/// Compare dotted version strings numerically, component by component.
/// Missing components count as zero; non-numeric components compare as
/// zero too, so `""` is the lowest version.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// `true` when `version` understands `initialize`.
#[must_use]
pub fn supports_initialize(version: &str) -> bool {
    compare_versions(version, MIN_INITIALIZE_VERSION) != Ordering::Less
}

/// Send `initialize` with every registered tool and verify none was refused.
///
/// # Errors
///
/// - `AppError::Transport` on timeout or a dropped connection.
/// - `AppError::Rpc` if the agent rejects the call.
/// - `AppError::Spawn` naming the first refused tool and the reason.
pub async fn initialize(
    transport: &Transport,
    tools: &ToolRegistry,
    config_timeout: std::time::Duration,
) -> Result<InitializeResult> {
    let params = InitializeParams {
        protocol_version: CLIENT_PROTOCOL_VERSION.to_owned(),
        external_tools: tools.definitions(),
    };
    let result = transport.initialize(&params, config_timeout).await?;

    if let Some(rejected) = result
        .external_tools
        .as_ref()
        .and_then(|tools| tools.rejected.first())
    {
        return Err(AppError::Spawn(format!(
            "{:?} tool is rejected: {}",
            rejected.name, rejected.reason
        )));
    }

    info!(
        tools = params.external_tools.len(),
        slash_commands = result.slash_commands.len(),
        "handshake: initialize complete"
    );
    Ok(result)
}
