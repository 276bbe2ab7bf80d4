//! Error types shared across the harness.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared harness result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Harness error enumeration covering every failure mode of a protocol run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Spawn failure or loss of the child's standard streams.
    Process(String),
    /// Malformed or incomplete response envelope.
    Protocol(String),
    /// Response id did not match the id of the request that produced it.
    Correlation {
        /// Id carried by the outstanding request.
        expected: u64,
        /// Id carried by the received response.
        received: u64,
    },
    /// Server-reported failure executing a tool.
    Tool(String),
    /// No response within the bound.
    Timeout(Duration),
    /// Stream I/O failure outside of process control (e.g. report output).
    Io(String),
    /// The run was interrupted externally before the operation finished.
    Interrupted,
}

impl AppError {
    /// Short category label used in reports and structured log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Process(_) => "process",
            Self::Protocol(_) => "protocol",
            Self::Correlation { .. } => "correlation",
            Self::Tool(_) => "tool",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
            Self::Interrupted => "interrupted",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Correlation { expected, received } => write!(
                f,
                "correlation: expected response id {expected}, received {received}"
            ),
            Self::Tool(msg) => write!(f, "tool: {msg}"),
            Self::Timeout(bound) => write!(f, "timeout: no response within {bound:?}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Interrupted => write!(f, "interrupted: run aborted externally"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

/// Raw I/O errors only reach this conversion from the child's pipes (via
/// the line codec), so they are process failures.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Process(format!("stream i/o failed: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}
