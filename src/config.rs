//! Harness configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::{AppError, Result};

/// How the external server binary is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Server executable.
    pub command: PathBuf,
    /// Arguments selecting the persistent stdio session mode.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments selecting the standalone setup-only mode.
    #[serde(default)]
    pub setup_args: Vec<String>,
    /// Extra environment variables handed to the server verbatim.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Variable names copied from the harness environment when set.
    ///
    /// The server's configuration-path variable belongs here; the harness
    /// never reads the value itself.
    #[serde(default)]
    pub passthrough_env: Vec<String>,
    /// Working directory for the child process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Timeout values governing calls and process teardown.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Hard bound on a single request/response exchange.
    #[serde(default = "default_call_seconds")]
    pub call_seconds: u64,
    /// Grace period between the graceful stop signal and the forced kill.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
    /// Window granted to a cancelled worker before it is abandoned.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl TimeoutConfig {
    /// Call bound as a [`Duration`].
    #[must_use]
    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_seconds)
    }

    /// Terminate grace as a [`Duration`].
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Cancellation grace as a [`Duration`].
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_seconds: default_call_seconds(),
            terminate_grace_ms: default_terminate_grace_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// Largest accepted value for any timeout or settle window, in seconds.
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

fn default_call_seconds() -> u64 {
    30
}

fn default_terminate_grace_ms() -> u64 {
    2000
}

fn default_cancel_grace_ms() -> u64 {
    500
}

/// Values advertised during the `initialize` handshake.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandshakeConfig {
    /// Protocol version string sent as `protocolVersion`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// `clientInfo.name`.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// `clientInfo.version`.
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Emit `notifications/initialized` after a successful handshake.
    #[serde(default = "default_true")]
    pub send_initialized: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            send_initialized: true,
        }
    }
}

fn default_protocol_version() -> String {
    "2024-11-05".into()
}

fn default_client_name() -> String {
    "mcp-harness".into()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_true() -> bool {
    true
}

/// Session granularity for scenario and benchmark runs.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One process serves every step of a run.
    #[default]
    Persistent,
    /// Every step gets a freshly spawned process and no implicit handshake.
    PerCall,
}

/// Kind of protocol interaction a declared step performs.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// `initialize` handshake.
    Initialize,
    /// `tools/list`.
    ListTools,
    /// `tools/call` against [`StepConfig::tool`].
    CallTool,
}

/// Content shape a `call_tool` step insists on.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpectShape {
    /// Any successful content passes.
    #[default]
    Any,
    /// The first content item must parse as structured data.
    Structured,
    /// The first content item must remain raw text.
    Raw,
}

/// One declared scenario step.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StepConfig {
    /// Display name.
    pub name: String,
    /// Interaction performed by the step.
    pub kind: StepKind,
    /// Tool name for `call_tool` steps.
    #[serde(default)]
    pub tool: Option<String>,
    /// Tool arguments for `call_tool` steps.
    #[serde(default = "empty_object")]
    pub arguments: Value,
    /// A required step's failure skips the rest of the scenario.
    #[serde(default)]
    pub required: bool,
    /// Per-step override of [`TimeoutConfig::call_seconds`].
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Content shape check for `call_tool` steps.
    #[serde(default)]
    pub expect: ExpectShape,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A tool exercised by the benchmark.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BenchmarkTool {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

/// Benchmark settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BenchmarkConfig {
    /// Attempts per tool.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Tools in benchmark order.
    #[serde(default, rename = "tool")]
    pub tools: Vec<BenchmarkTool>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            tools: Vec::new(),
        }
    }
}

fn default_iterations() -> u32 {
    3
}

/// Idempotency suite settings for a setup-class tool.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct IdempotencyConfig {
    /// Tool that provisions the resource.
    pub setup_tool: String,
    /// Arguments for the setup tool.
    #[serde(default = "empty_object")]
    pub setup_arguments: Value,
    /// Argument name that asks a dependent tool to ensure the resource.
    pub ensure_flag: String,
    /// Tools that depend on the resource.
    #[serde(default)]
    pub dependent_tools: Vec<String>,
    /// Wait after launching the standalone setup process.
    #[serde(default = "default_settle_seconds")]
    pub settle_seconds: u64,
    /// TCP address whose listener is the provisioned resource.
    #[serde(default)]
    pub probe_address: Option<String>,
    /// JSON pointer locating the endpoint inside structured setup payloads.
    #[serde(default)]
    pub endpoint_pointer: Option<String>,
}

impl IdempotencyConfig {
    /// Settle wait as a [`Duration`].
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_seconds)
    }
}

fn default_settle_seconds() -> u64 {
    3
}

/// Top-level harness configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Server launch settings.
    pub server: ServerConfig,
    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Handshake settings.
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Session granularity.
    #[serde(default)]
    pub session_mode: SessionMode,
    /// Ordered scenario steps.
    #[serde(default, rename = "scenario")]
    pub steps: Vec<StepConfig>,
    /// Benchmark settings.
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    /// Idempotency suite settings.
    #[serde(default)]
    pub idempotency: Option<IdempotencyConfig>,
}

impl HarnessConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.command.as_os_str().is_empty() {
            return Err(AppError::Config("server.command must not be empty".into()));
        }

        if self.timeouts.call_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.call_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.call_seconds > MAX_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "timeouts.call_seconds must not exceed {MAX_TIMEOUT_SECONDS}"
            )));
        }

        if self.timeouts.terminate_grace_ms > MAX_TIMEOUT_SECONDS * 1000 {
            return Err(AppError::Config(format!(
                "timeouts.terminate_grace_ms must not exceed {} ms",
                MAX_TIMEOUT_SECONDS * 1000
            )));
        }

        if self.timeouts.cancel_grace_ms >= self.timeouts.terminate_grace_ms {
            return Err(AppError::Config(
                "timeouts.cancel_grace_ms must be shorter than terminate_grace_ms".into(),
            ));
        }

        if self.benchmark.iterations == 0 {
            return Err(AppError::Config(
                "benchmark.iterations must be greater than zero".into(),
            ));
        }

        for step in &self.steps {
            if step.kind == StepKind::CallTool && step.tool.as_deref().unwrap_or_default().is_empty() {
                return Err(AppError::Config(format!(
                    "scenario step '{}' calls a tool but names none",
                    step.name
                )));
            }
            if step.timeout_seconds == Some(0) {
                return Err(AppError::Config(format!(
                    "scenario step '{}' has a zero timeout",
                    step.name
                )));
            }
            if step.timeout_seconds.is_some_and(|secs| secs > MAX_TIMEOUT_SECONDS) {
                return Err(AppError::Config(format!(
                    "scenario step '{}' timeout exceeds {MAX_TIMEOUT_SECONDS} seconds",
                    step.name
                )));
            }
        }

        if let Some(idem) = &self.idempotency {
            if idem.setup_tool.is_empty() {
                return Err(AppError::Config(
                    "idempotency.setup_tool must not be empty".into(),
                ));
            }
            if idem.ensure_flag.is_empty() {
                return Err(AppError::Config(
                    "idempotency.ensure_flag must not be empty".into(),
                ));
            }
            if idem.settle_seconds > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "idempotency.settle_seconds must not exceed {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }

        Ok(())
    }
}
