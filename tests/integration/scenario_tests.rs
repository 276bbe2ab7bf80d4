//! Config-declared scenarios in both session modes.

use std::time::Duration;

use mcp_harness::config::{SessionMode, StepConfig};
use mcp_harness::report::{ConsoleReporter, LogReporter};
use mcp_harness::scenario::{protocol_steps, ProtocolContext, ScenarioRunner, StepStatus};
use mcp_harness::HarnessConfig;

use super::test_helpers::{invoker, stub, stub_path, TERMINATE_GRACE};

fn steps(toml_steps: &str) -> Vec<StepConfig> {
    let raw = format!("[server]\ncommand = \"{}\"\n{toml_steps}", stub_path());
    HarnessConfig::from_toml_str(&raw).expect("valid scenario").steps
}

fn context(mode: SessionMode) -> ProtocolContext {
    ProtocolContext::new(stub(&[]), invoker(Duration::from_secs(5)), mode, TERMINATE_GRACE)
}

const FULL_SCENARIO: &str = r#"
[[scenario]]
name = "handshake"
kind = "initialize"
required = true

[[scenario]]
name = "list"
kind = "list_tools"
required = true

[[scenario]]
name = "structured query"
kind = "call_tool"
tool = "structured"
expect = "structured"

[[scenario]]
name = "plain answer"
kind = "call_tool"
tool = "plain_text"
expect = "raw"

[[scenario]]
name = "echo"
kind = "call_tool"
tool = "echo"
arguments = { message = "scenario" }
"#;

#[tokio::test]
async fn persistent_scenario_passes() {
    let mut ctx = context(SessionMode::Persistent);
    let report = ScenarioRunner::default()
        .run("full", &mut ctx, protocol_steps(&steps(FULL_SCENARIO)), &mut LogReporter)
        .await;
    ctx.shutdown().await;

    assert!(report.success(), "{:?}", report.records);
    assert_eq!(report.tally.passed, 5);
    assert_eq!(report.records[4].detail, "echo: scenario");
}

#[tokio::test]
async fn per_call_scenario_passes_without_shared_state() {
    let mut ctx = context(SessionMode::PerCall);
    let report = ScenarioRunner::default()
        .run("full", &mut ctx, protocol_steps(&steps(FULL_SCENARIO)), &mut LogReporter)
        .await;
    ctx.shutdown().await;

    assert!(report.success(), "{:?}", report.records);
    assert_eq!(report.tally.passed, 5);
}

#[tokio::test]
async fn shape_mismatch_fails_optional_step_only() {
    let declared = steps(
        r#"
[[scenario]]
name = "wrong shape"
kind = "call_tool"
tool = "plain_text"
expect = "structured"

[[scenario]]
name = "still runs"
kind = "call_tool"
tool = "echo"
"#,
    );
    let mut ctx = context(SessionMode::Persistent);
    let report = ScenarioRunner::default()
        .run("shape", &mut ctx, protocol_steps(&declared), &mut LogReporter)
        .await;
    ctx.shutdown().await;

    assert_eq!(report.records[0].status, StepStatus::Failed);
    assert_eq!(report.records[0].error_kind, Some("protocol"));
    assert_eq!(report.records[1].status, StepStatus::Passed);
    assert!((report.tally.rate() - 50.0).abs() < f64::EPSILON);
    assert!(report.success());
}

#[tokio::test]
async fn required_tool_failure_skips_remaining_steps() {
    let declared = steps(
        r#"
[[scenario]]
name = "must work"
kind = "call_tool"
tool = "fail"
required = true

[[scenario]]
name = "never runs"
kind = "call_tool"
tool = "echo"
"#,
    );
    let mut ctx = context(SessionMode::Persistent);
    let report = ScenarioRunner::default()
        .run("required", &mut ctx, protocol_steps(&declared), &mut LogReporter)
        .await;
    ctx.shutdown().await;

    assert!(!report.success());
    assert_eq!(report.records[0].error_kind, Some("tool"));
    assert_eq!(report.records[1].status, StepStatus::Skipped);
    assert_eq!(report.tally.failed, 1);
}

#[tokio::test]
async fn step_timeout_override_applies_and_session_recovers() {
    let declared = steps(
        r#"
[[scenario]]
name = "too slow"
kind = "call_tool"
tool = "slow"
arguments = { ms = 10000 }
timeout_seconds = 1

[[scenario]]
name = "after timeout"
kind = "call_tool"
tool = "echo"
arguments = { message = "fresh" }
"#,
    );
    let mut ctx = context(SessionMode::Persistent);
    let report = ScenarioRunner::default()
        .run("timeouts", &mut ctx, protocol_steps(&declared), &mut LogReporter)
        .await;
    ctx.shutdown().await;

    assert_eq!(report.records[0].error_kind, Some("timeout"));
    assert!(report.records[0].elapsed < Duration::from_secs(5));
    assert_eq!(report.records[1].status, StepStatus::Passed);
    assert_eq!(report.records[1].detail, "echo: fresh");
}

#[tokio::test]
async fn console_report_lists_every_step() {
    let mut ctx = context(SessionMode::Persistent);
    let mut reporter = ConsoleReporter::new(Vec::new());
    ScenarioRunner::default()
        .run("full", &mut ctx, protocol_steps(&steps(FULL_SCENARIO)), &mut reporter)
        .await;
    ctx.shutdown().await;

    let text = String::from_utf8(reporter.into_inner()).expect("utf-8 report");
    assert!(text.starts_with("== full (5 steps) =="));
    assert!(text.contains("[PASS] handshake (required)"));
    assert!(text.contains("passed 5, failed 0, success rate 100.0%: SUCCESS"));
}
