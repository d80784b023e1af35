//! Unit tests for `AppError` display format and conversions.

use agent_wire::rpc::frame::RpcError;
use agent_wire::AppError;

#[test]
fn display_uses_kind_prefix() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Spawn("bad".into()), "spawn: bad"),
        (AppError::Transport("bad".into()), "transport: bad"),
        (AppError::Protocol("bad".into()), "protocol: bad"),
        (AppError::SubprocessExit("bad".into()), "subprocess exit: bad"),
        (AppError::Cancelled("bad".into()), "cancelled: bad"),
        (AppError::Busy("bad".into()), "busy: bad"),
        (AppError::AlreadyConsumed("bad".into()), "already consumed: bad"),
        (AppError::Closed("bad".into()), "closed: bad"),
        (AppError::Io("bad".into()), "io: bad"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn rpc_error_display_includes_code() {
    let err = AppError::Rpc(RpcError::new(-32000, "simulated prompt error"));
    assert_eq!(err.to_string(), "rpc: -32000 simulated prompt error");
}

#[test]
fn messages_have_no_trailing_period() {
    let err = AppError::Transport("agent closed its output".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert_eq!(err, AppError::Io("pipe closed".into()));
}

#[test]
fn json_error_converts_to_protocol_variant() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("bad json");
    let err: AppError = json_err.into();
    assert!(matches!(err, AppError::Protocol(_)));
}

#[test]
fn errors_are_cloneable_and_comparable() {
    let err = AppError::SubprocessExit("exit status: 3".into());
    assert_eq!(err.clone(), err);
    assert_ne!(err, AppError::Transport("exit status: 3".into()));
}

#[test]
fn implements_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&AppError::Closed("session is closed".into()));
}
