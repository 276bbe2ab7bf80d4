use std::io::Write;
use std::time::Duration;

use mcp_harness::config::{ExpectShape, SessionMode, StepKind};
use mcp_harness::{AppError, HarnessConfig};

fn full_toml() -> &'static str {
    r#"
session_mode = "per_call"

[server]
command = "/usr/local/bin/tool-server"
args = ["--stdio"]
setup_args = ["--setup-only"]
passthrough_env = ["TOOL_SERVER_CONFIG"]

[server.env]
RUST_LOG = "debug"

[timeouts]
call_seconds = 10
terminate_grace_ms = 1500
cancel_grace_ms = 250

[[scenario]]
name = "handshake"
kind = "initialize"
required = true

[[scenario]]
name = "query"
kind = "call_tool"
tool = "query"
arguments = { sql = "select 1" }
timeout_seconds = 4
expect = "structured"

[benchmark]
iterations = 5

[[benchmark.tool]]
name = "query"
arguments = { sql = "select 1" }

[idempotency]
setup_tool = "setup_tunnel"
ensure_flag = "ensure_tunnel"
dependent_tools = ["query"]
probe_address = "127.0.0.1:5433"
endpoint_pointer = "/endpoint"
"#
}

#[test]
fn full_config_parses() {
    let config = HarnessConfig::from_toml_str(full_toml()).expect("config parses");

    assert_eq!(config.session_mode, SessionMode::PerCall);
    assert_eq!(config.server.args, vec!["--stdio"]);
    assert_eq!(config.server.setup_args, vec!["--setup-only"]);
    assert_eq!(config.server.env.get("RUST_LOG").map(String::as_str), Some("debug"));
    assert_eq!(config.timeouts.call(), Duration::from_secs(10));
    assert_eq!(config.timeouts.terminate_grace(), Duration::from_millis(1500));
    assert_eq!(config.timeouts.cancel_grace(), Duration::from_millis(250));

    assert_eq!(config.steps.len(), 2);
    assert_eq!(config.steps[0].kind, StepKind::Initialize);
    assert!(config.steps[0].required);
    assert_eq!(config.steps[1].tool.as_deref(), Some("query"));
    assert_eq!(config.steps[1].arguments["sql"], "select 1");
    assert_eq!(config.steps[1].expect, ExpectShape::Structured);
    assert!(!config.steps[1].required);

    assert_eq!(config.benchmark.iterations, 5);
    assert_eq!(config.benchmark.tools[0].name, "query");

    let idem = config.idempotency.expect("idempotency section");
    assert_eq!(idem.setup_tool, "setup_tunnel");
    assert_eq!(idem.settle(), Duration::from_secs(3));
    assert_eq!(idem.endpoint_pointer.as_deref(), Some("/endpoint"));
}

#[test]
fn minimal_config_uses_defaults() {
    let config = HarnessConfig::from_toml_str(
        r#"
[server]
command = "tool-server"
"#,
    )
    .expect("minimal config parses");

    assert_eq!(config.session_mode, SessionMode::Persistent);
    assert_eq!(config.timeouts.call(), Duration::from_secs(30));
    assert_eq!(config.handshake.protocol_version, "2024-11-05");
    assert!(config.handshake.send_initialized);
    assert_eq!(config.benchmark.iterations, 3);
    assert!(config.steps.is_empty());
    assert!(config.idempotency.is_none());
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(full_toml().as_bytes()).expect("write config");

    let config = HarnessConfig::load_from_path(file.path()).expect("config loads");
    assert_eq!(config.steps.len(), 2);
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = HarnessConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}

#[test]
fn malformed_toml_is_config_error() {
    let err = HarnessConfig::from_toml_str("[server\ncommand = ").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn empty_command_is_rejected() {
    let err = HarnessConfig::from_toml_str("[server]\ncommand = \"\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("server.command")));
}

#[test]
fn zero_call_timeout_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        "[server]\ncommand = \"s\"\n[timeouts]\ncall_seconds = 0\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("call_seconds")));
}

#[test]
fn oversized_call_timeout_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        "[server]\ncommand = \"s\"\n[timeouts]\ncall_seconds = 9223372036854775807\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("must not exceed")));
}

#[test]
fn oversized_step_timeout_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        r#"
[server]
command = "s"

[[scenario]]
name = "forever"
kind = "list_tools"
timeout_seconds = 100000000
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("forever")));
}

#[test]
fn cancel_grace_must_be_shorter_than_terminate_grace() {
    let err = HarnessConfig::from_toml_str(
        "[server]\ncommand = \"s\"\n[timeouts]\nterminate_grace_ms = 500\ncancel_grace_ms = 500\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("cancel_grace_ms")));
}

#[test]
fn call_tool_step_without_tool_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        r#"
[server]
command = "s"

[[scenario]]
name = "broken"
kind = "call_tool"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("broken")));
}

#[test]
fn zero_iterations_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        "[server]\ncommand = \"s\"\n[benchmark]\niterations = 0\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("iterations")));
}

#[test]
fn empty_setup_tool_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        "[server]\ncommand = \"s\"\n[idempotency]\nsetup_tool = \"\"\nensure_flag = \"ensure\"\n",
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("setup_tool")));
}

#[test]
fn unknown_step_kind_is_rejected() {
    let err = HarnessConfig::from_toml_str(
        r#"
[server]
command = "s"

[[scenario]]
name = "odd"
kind = "resources_list"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}
