//! Cross-session setup idempotency with a real TCP listener as the resource.

use std::time::Duration;

use serde_json::json;

use mcp_harness::config::IdempotencyConfig;
use mcp_harness::idempotency::IdempotencySuite;
use mcp_harness::report::LogReporter;
use mcp_harness::scenario::{ScenarioRunner, StepStatus};

use super::test_helpers::{free_addr, invoker, stub, TERMINATE_GRACE};

fn suite(addr: &str, session_flags: &[&str], dependent_tools: &[&str]) -> IdempotencySuite {
    let config = IdempotencyConfig {
        setup_tool: "setup_tunnel".into(),
        setup_arguments: json!({}),
        ensure_flag: "ensure_tunnel".into(),
        dependent_tools: dependent_tools.iter().map(|t| (*t).to_owned()).collect(),
        settle_seconds: 5,
        probe_address: Some(addr.to_owned()),
        endpoint_pointer: Some("/endpoint".into()),
    };
    IdempotencySuite::new(
        config,
        stub(session_flags).with_env("STUB_TUNNEL_ADDR", addr),
        stub(&["setup-only"]).with_env("STUB_TUNNEL_ADDR", addr),
        invoker(Duration::from_secs(5)),
        TERMINATE_GRACE,
    )
}

#[tokio::test]
async fn setup_is_idempotent_across_sessions() {
    let addr = free_addr();
    let report = suite(&addr, &[], &["fetch_records"])
        .run(&ScenarioRunner::default(), &mut LogReporter)
        .await;

    assert!(report.success(), "{:#?}", report.records);
    assert_eq!(report.tally.passed, 7);
    assert_eq!(report.tally.failed, 0);
    assert!(report.records[1].detail.contains(&addr));
    assert!(report.records[2].detail.contains("reused"));
    assert!(report.records[5].detail.contains("fresh session"));
    assert!(report.records[6].detail.contains("single endpoint"));
}

#[tokio::test]
async fn first_setup_creates_resource_over_the_wire() {
    let addr = free_addr();
    let report = suite(&addr, &[], &[])
        .run(&ScenarioRunner::default(), &mut LogReporter)
        .await;

    let first = &report.records[0];
    assert_eq!(first.status, StepStatus::Passed, "{first:#?}");
    assert!(first.detail.contains(&format!("created {addr}")));
    assert!(first.detail.contains(r#""status":"created""#));
}

#[tokio::test]
async fn dependent_calls_must_not_rely_on_session_state() {
    let addr = free_addr();
    // This server only serves dependent calls in a session that ran setup itself.
    let report = suite(&addr, &["--session-state"], &["fetch_records"])
        .run(&ScenarioRunner::default(), &mut LogReporter)
        .await;

    assert!(!report.success());
    let dependent = &report.records[5];
    assert_eq!(dependent.status, StepStatus::Failed);
    assert_eq!(dependent.error_kind, Some("tool"));
    assert!(dependent.detail.contains("fetch_records: tunnel not ready"));
    // The setup calls themselves were fine.
    assert!(report.records[..5]
        .iter()
        .all(|r| r.status == StepStatus::Passed));
}

#[tokio::test]
async fn resource_is_released_after_suite() {
    let addr = free_addr();
    let report = suite(&addr, &[], &[])
        .run(&ScenarioRunner::default(), &mut LogReporter)
        .await;
    assert!(report.success(), "{:#?}", report.records);

    // The standalone process was terminated, so the address can be bound again.
    let mut rebound = false;
    for _ in 0..20 {
        if std::net::TcpListener::bind(&addr).is_ok() {
            rebound = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(rebound, "standalone setup process still holds {addr}");
}

#[tokio::test]
async fn duplicate_resources_are_detected() {
    let addr = free_addr();
    let report = suite(&addr, &["--duplicate"], &[])
        .run(&ScenarioRunner::default(), &mut LogReporter)
        .await;

    assert!(!report.success());
    let last = report.records.last().expect("verification step recorded");
    assert_eq!(last.status, StepStatus::Failed);
    assert_eq!(last.error_kind, Some("tool"));
    assert!(last.detail.contains("duplicate"));
    // Every setup call itself reported success.
    assert!(report.records[..5]
        .iter()
        .all(|r| r.status == StepStatus::Passed));
}

#[tokio::test]
async fn pre_existing_resource_halts_suite() {
    let addr = free_addr();
    // Something other than the standalone process already holds the address.
    let _blocker = std::net::TcpListener::bind(&addr).expect("occupy address");

    let report = suite(&addr, &[], &["fetch_records"])
        .run(&ScenarioRunner::default(), &mut LogReporter)
        .await;

    assert!(!report.success());
    assert_eq!(report.records[0].status, StepStatus::Failed);
    assert_eq!(report.records[0].error_kind, Some("process"));
    assert!(report.records[0].detail.contains("already reachable"));
    assert!(report.records[1..]
        .iter()
        .all(|r| r.status == StepStatus::Skipped));
}
