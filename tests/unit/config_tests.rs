use std::time::Duration;

use agent_wire::config::{AgentOptions, TimeoutConfig};
use agent_wire::{AppError, SessionConfig};

fn full_toml(work_dir: &str) -> String {
    format!(
        r#"
executable = "/opt/agent/bin/kimi"
args = ["--wire", "--yolo"]
work_dir = '{work_dir}'
inherit_env = false

[env]
KIMI_API_KEY = "sk-test"

[agent]
model = "kimi-k2"
session = "resume-1"
auto_approve = true
thinking = true
extra_args = ["--verbose"]

[timeouts]
probe_seconds = 3
handshake_seconds = 4
cancel_grace_seconds = 2
shutdown_seconds = 1

[methods]
prompt = "session/prompt"
"#
    )
}

#[test]
fn defaults_launch_kimi_in_wire_mode() {
    let config = SessionConfig::default();
    assert_eq!(config.executable, "kimi");
    assert_eq!(config.args, vec!["--wire".to_owned()]);
    assert!(config.inherit_env);
    assert_eq!(config.timeouts, TimeoutConfig::default());
    assert_eq!(config.command_args(), vec!["--wire".to_owned()]);
    config.validate().expect("defaults are valid");
}

#[test]
fn default_timeouts() {
    let timeouts = TimeoutConfig::default();
    assert_eq!(timeouts.probe(), Duration::from_secs(30));
    assert_eq!(timeouts.handshake(), Duration::from_secs(30));
    assert_eq!(timeouts.cancel_grace(), Duration::from_secs(5));
    assert_eq!(timeouts.shutdown(), Duration::from_secs(5));
}

#[test]
fn parses_full_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let work_dir = dir.path().to_string_lossy().into_owned();
    let config = SessionConfig::from_toml_str(&full_toml(&work_dir)).expect("valid config");

    assert_eq!(config.executable, "/opt/agent/bin/kimi");
    assert!(!config.inherit_env);
    assert_eq!(config.env.get("KIMI_API_KEY").map(String::as_str), Some("sk-test"));
    assert_eq!(config.timeouts.cancel_grace(), Duration::from_secs(2));
    assert_eq!(config.methods.prompt, "session/prompt");
    assert_eq!(config.methods.cancel, "cancel");

    assert_eq!(
        config.command_args(),
        vec![
            "--wire".to_owned(),
            "--yolo".to_owned(),
            "--work-dir".to_owned(),
            work_dir,
            "--model".to_owned(),
            "kimi-k2".to_owned(),
            "--session".to_owned(),
            "resume-1".to_owned(),
            "--auto-approve".to_owned(),
            "--thinking".to_owned(),
            "--verbose".to_owned(),
        ]
    );
}

#[test]
fn empty_file_yields_defaults() {
    let config = SessionConfig::from_toml_str("").expect("empty config");
    assert_eq!(config, SessionConfig::default());
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, "executable = \"my-agent\"\n").expect("write");

    let config = SessionConfig::load_from_path(&path).expect("load");
    assert_eq!(config.executable, "my-agent");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let err = SessionConfig::load_from_path("/definitely/not/here.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("failed to read config")));
}

#[test]
fn invalid_toml_is_config_error() {
    let err = SessionConfig::from_toml_str("executable = [").expect_err("bad toml");
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

// ── Validation ────────────────────────────────────────────────────────────────

#[test]
fn empty_executable_is_rejected() {
    let err = SessionConfig::new("  ").validate().expect_err("empty");
    assert_eq!(err, AppError::Config("executable must not be empty".into()));
}

#[test]
fn zero_probe_timeout_is_rejected() {
    let mut config = SessionConfig::default();
    config.timeouts.probe_seconds = 0;
    assert!(matches!(config.validate(), Err(AppError::Config(_))));
}

#[test]
fn missing_work_dir_is_rejected() {
    let config = SessionConfig::default().with_work_dir("/definitely/not/a/dir");
    let err = config.validate().expect_err("missing dir");
    assert!(err.to_string().contains("work_dir is not a directory"), "{err}");
}

#[test]
fn conflicting_method_names_are_rejected() {
    let err = SessionConfig::from_toml_str("[methods]\nprompt = \"cancel\"\n").expect_err("conflict");
    assert!(err.to_string().contains("share the name"), "{err}");
}

#[test]
fn env_keys_with_equals_are_rejected() {
    let config = SessionConfig::default().with_env("A=B", "c");
    assert!(matches!(config.validate(), Err(AppError::Config(_))));
}

#[test]
fn builders_compose() {
    let config = SessionConfig::new("agent")
        .with_arg("--fast")
        .with_env("K", "V");
    assert_eq!(config.args, vec!["--wire".to_owned(), "--fast".to_owned()]);
    assert_eq!(config.env.get("K").map(String::as_str), Some("V"));
}

#[test]
fn thinking_off_adds_no_thinking_flag() {
    let config = SessionConfig {
        agent: AgentOptions {
            thinking: Some(false),
            ..AgentOptions::default()
        },
        ..SessionConfig::default()
    };
    assert_eq!(
        config.command_args(),
        vec!["--wire".to_owned(), "--no-thinking".to_owned()]
    );
}
