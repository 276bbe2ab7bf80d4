//! Shared helpers for driving the stub server binary.

use std::net::TcpListener;
use std::time::Duration;

use mcp_harness::invoker::ToolInvoker;
use mcp_harness::session::{LaunchSpec, ProcessSession};
use mcp_harness::supervisor::TimeoutSupervisor;

/// Grace period before a stubborn stub is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(1000);

/// Path of the compiled stub server.
pub fn stub_path() -> &'static str {
    env!("CARGO_BIN_EXE_stub-mcp-server")
}

/// Launch spec for the stub with the given flags.
pub fn stub(args: &[&str]) -> LaunchSpec {
    LaunchSpec::new(stub_path(), args.iter().copied())
}

/// Invoker with a short cancel grace and the given call bound.
pub fn invoker(call_timeout: Duration) -> ToolInvoker {
    ToolInvoker::new(
        TimeoutSupervisor::new(Duration::from_millis(200)),
        call_timeout,
    )
}

/// Spawn the stub as a session.
pub fn spawn(label: &str, spec: &LaunchSpec) -> ProcessSession {
    ProcessSession::spawn(label, spec, TERMINATE_GRACE).expect("stub spawns")
}

/// A loopback address nothing is listening on (at the time of the call).
pub fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);
    addr
}
