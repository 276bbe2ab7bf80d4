//! Bounded calls against servers that never answer or answer too late.

use std::time::{Duration, Instant};

use serde_json::json;

use mcp_harness::invoker::ToolOutcome;
use mcp_harness::AppError;

use super::test_helpers::{invoker, spawn, stub};

#[tokio::test]
async fn silent_server_times_out_within_bound() {
    let bound = Duration::from_millis(300);
    let mut session = spawn("silent", &stub(&["--silent"]));
    let started = Instant::now();

    let err = invoker(bound)
        .initialize(&mut session)
        .await
        .unwrap_err();

    assert_eq!(err, AppError::Timeout(bound));
    // Bound + cancel grace + terminate grace, with slack for CI.
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "took {:?}",
        started.elapsed()
    );
    assert!(session.is_terminated());
}

#[tokio::test]
async fn slow_tool_times_out_and_session_is_not_reused() {
    let mut session = spawn("slow", &stub(&[]));
    let invoker = invoker(Duration::from_secs(5));

    let timed = invoker
        .call_timed(
            &mut session,
            "slow",
            json!({"ms": 10_000}),
            Duration::from_millis(200),
        )
        .await;
    assert_eq!(timed.outcome, ToolOutcome::Timeout);
    assert!(timed.elapsed < Duration::from_secs(4));
    assert!(session.is_terminated());
    assert!(session.exit_status().is_some());

    let next = invoker
        .call(&mut session, "echo", json!({"message": "late"}))
        .await;
    assert!(matches!(next, ToolOutcome::ProtocolError(ref msg) if msg.contains("terminated")));
}

#[tokio::test]
async fn slow_tool_within_bound_succeeds() {
    let mut session = spawn("patient", &stub(&[]));
    let outcome = invoker(Duration::from_secs(5))
        .call(&mut session, "slow", json!({"ms": 100}))
        .await;
    assert!(outcome.is_success(), "{outcome:?}");
    session.terminate().await;
}

#[tokio::test]
async fn enormous_bound_does_not_overflow_deadline() {
    let mut session = spawn("enormous", &stub(&[]));
    let tools = invoker(Duration::from_secs(u64::MAX / 2))
        .list_tools(&mut session)
        .await
        .expect("listing under an effectively unbounded timeout");
    assert!(!tools.is_empty());
    session.terminate().await;
}
