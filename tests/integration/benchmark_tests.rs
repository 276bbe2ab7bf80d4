//! Benchmark runs feeding the statistics aggregator.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use mcp_harness::config::{BenchmarkConfig, BenchmarkTool, SessionMode};
use mcp_harness::report::{ConsoleReporter, LogReporter};
use mcp_harness::scenario::{BenchmarkRunner, ProtocolContext};

use super::test_helpers::{invoker, stub, TERMINATE_GRACE};

fn config(iterations: u32, tools: &[(&str, serde_json::Value)]) -> BenchmarkConfig {
    BenchmarkConfig {
        iterations,
        tools: tools
            .iter()
            .map(|(name, arguments)| BenchmarkTool {
                name: (*name).to_owned(),
                arguments: arguments.clone(),
            })
            .collect(),
    }
}

fn context(mode: SessionMode, call_timeout: Duration) -> ProtocolContext {
    ProtocolContext::new(stub(&[]), invoker(call_timeout), mode, TERMINATE_GRACE)
        .with_handshake_on_spawn(mode == SessionMode::Persistent)
}

#[tokio::test]
async fn persistent_benchmark_records_every_attempt() {
    let bench = config(3, &[("echo", json!({"message": "x"})), ("fail", json!({}))]);
    let mut ctx = context(SessionMode::Persistent, Duration::from_secs(5));

    let report = BenchmarkRunner::default()
        .run(&mut ctx, &bench, &mut LogReporter)
        .await;

    assert_eq!(report.stats.samples().len(), 6);
    let echo = report.stats.summary("echo").expect("echo summary");
    assert_eq!((echo.attempts, echo.successes), (3, 3));
    assert!(echo.timing.is_some());

    let fail = report.stats.summary("fail").expect("fail summary");
    assert_eq!((fail.attempts, fail.successes), (3, 0));
    assert!(fail.timing.is_none());

    assert!(!report.success(&bench));
    assert!(report.success(&config(1, &[("echo", json!({}))])));
}

#[tokio::test]
async fn per_call_benchmark_spawns_per_attempt() {
    let bench = config(2, &[("structured", json!({}))]);
    let mut ctx = context(SessionMode::PerCall, Duration::from_secs(5));
    let mut reporter = ConsoleReporter::new(Vec::new());

    let report = BenchmarkRunner::default()
        .run(&mut ctx, &bench, &mut reporter)
        .await;

    let summary = report.stats.summary("structured").expect("summary");
    assert_eq!((summary.attempts, summary.successes), (2, 2));
    assert!(report.success(&bench));

    let text = String::from_utf8(reporter.into_inner()).expect("utf-8 report");
    assert!(text.contains("structured #1"));
    assert!(text.contains("structured #2"));
    assert!(text.contains("100.0%"));
}

#[tokio::test]
async fn timed_out_attempts_count_and_session_is_replaced() {
    let bench = config(
        1,
        &[("slow", json!({"ms": 10_000})), ("echo", json!({"message": "after"}))],
    );
    let mut ctx = context(SessionMode::Persistent, Duration::from_millis(300));

    let report = BenchmarkRunner::default()
        .run(&mut ctx, &bench, &mut LogReporter)
        .await;

    let slow = report.stats.summary("slow").expect("slow summary");
    assert_eq!((slow.attempts, slow.successes), (1, 0));
    let echo = report.stats.summary("echo").expect("echo summary");
    assert_eq!((echo.attempts, echo.successes), (1, 1));
}

#[tokio::test]
async fn interrupted_benchmark_keeps_recorded_samples() {
    let token = CancellationToken::new();
    token.cancel();
    let bench = config(3, &[("echo", json!({}))]);
    let mut ctx = context(SessionMode::PerCall, Duration::from_secs(5));

    let report = BenchmarkRunner::new(token)
        .run(&mut ctx, &bench, &mut LogReporter)
        .await;

    assert!(report.interrupted);
    assert!(report.stats.samples().is_empty());
    assert!(!report.completed(&bench));
}
