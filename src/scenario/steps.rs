//! Config-declared protocol steps and the session context they run in.
//!
//! In persistent mode one server process serves the whole run and is
//! spawned lazily by the first step; a process lost to a timeout is
//! replaced by a fresh one for the next step. In per-call mode each step
//! spawns its own process, performs exactly one interaction and terminates
//! it, with no implicit handshake.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ExpectShape, HarnessConfig, SessionMode, StepConfig, StepKind};
use crate::invoker::{Payload, TimedOutcome, ToolInvoker, ToolOutcome};
use crate::scenario::runner::ScenarioStep;
use crate::session::{with_session, LaunchMode, LaunchSpec, ProcessSession};
use crate::{AppError, Result};

/// Label given to the persistent session.
const PERSISTENT_LABEL: &str = "persistent";

/// Server sessions and protocol settings shared by a run's steps.
#[derive(Debug)]
pub struct ProtocolContext {
    launch: LaunchSpec,
    invoker: ToolInvoker,
    mode: SessionMode,
    terminate_grace: Duration,
    handshake_on_spawn: bool,
    session: Option<ProcessSession>,
}

impl ProtocolContext {
    /// Context for a persistent or per-call run against `launch`.
    #[must_use]
    pub fn new(
        launch: LaunchSpec,
        invoker: ToolInvoker,
        mode: SessionMode,
        terminate_grace: Duration,
    ) -> Self {
        Self {
            launch,
            invoker,
            mode,
            terminate_grace,
            handshake_on_spawn: false,
            session: None,
        }
    }

    /// Context built from the harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            LaunchSpec::from_config(&config.server, LaunchMode::Session),
            ToolInvoker::from_config(config),
            config.session_mode,
            config.timeouts.terminate_grace(),
        )
    }

    /// Perform the handshake whenever a persistent session is (re)spawned.
    #[must_use]
    pub fn with_handshake_on_spawn(mut self, enabled: bool) -> Self {
        self.handshake_on_spawn = enabled;
        self
    }

    /// Session granularity of this context.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The invoker used for every exchange.
    #[must_use]
    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    /// Execute one declared step and return its diagnostic detail.
    ///
    /// # Errors
    ///
    /// Any exchange error, or `AppError::Protocol` when the answer does not
    /// satisfy the step's structural checks.
    pub async fn execute(&mut self, step: &StepConfig) -> Result<String> {
        match self.mode {
            SessionMode::Persistent => {
                let invoker = self.invoker_for(step);
                let session = self.live_session().await?;
                run_step(&invoker, session, step).await
            }
            SessionMode::PerCall => {
                let invoker = self.invoker_for(step);
                let owned = step.clone();
                with_session(&step.name, &self.launch, self.terminate_grace, move |session| {
                    async move { run_step(&invoker, session, &owned).await }.boxed()
                })
                .await
            }
        }
    }

    /// Call `tool` once and time it end to end.
    ///
    /// In per-call mode the measurement includes spawning and terminating
    /// the process. Every failure is folded into the outcome.
    pub async fn call_timed(&mut self, tool: &str, arguments: Value, timeout: Duration) -> TimedOutcome {
        match self.mode {
            SessionMode::Persistent => {
                let started = Instant::now();
                let invoker = self.invoker.clone();
                match self.live_session().await {
                    Ok(session) => invoker.call_timed(session, tool, arguments, timeout).await,
                    Err(err) => TimedOutcome {
                        outcome: ToolOutcome::ProtocolError(err.to_string()),
                        elapsed: started.elapsed(),
                    },
                }
            }
            SessionMode::PerCall => {
                let started = Instant::now();
                let invoker = self.invoker.clone();
                let name = tool.to_owned();
                let result = with_session(tool, &self.launch, self.terminate_grace, move |session| {
                    async move { invoker.try_call(session, &name, arguments, timeout).await }.boxed()
                })
                .await;
                TimedOutcome {
                    outcome: ToolOutcome::from(result),
                    elapsed: started.elapsed(),
                }
            }
        }
    }

    /// Terminate the persistent session, if any.
    pub async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.terminate().await;
            if let Some(tail) = session.diagnostics().filter(|tail| !tail.trim().is_empty()) {
                debug!(session = session.label(), stderr = %tail, "server stderr");
            }
        }
    }

    fn invoker_for(&self, step: &StepConfig) -> ToolInvoker {
        match step.timeout_seconds {
            Some(secs) => self
                .invoker
                .clone()
                .with_call_timeout(Duration::from_secs(secs)),
            None => self.invoker.clone(),
        }
    }

    async fn live_session(&mut self) -> Result<&mut ProcessSession> {
        let needs_spawn = !matches!(&self.session, Some(session) if !session.is_terminated());

        if needs_spawn {
            if self.session.is_some() {
                warn!("persistent session was lost, spawning a replacement");
            }
            let mut session = ProcessSession::spawn(PERSISTENT_LABEL, &self.launch, self.terminate_grace)?;
            if self.handshake_on_spawn {
                if let Err(err) = self.invoker.initialize(&mut session).await {
                    session.terminate().await;
                    return Err(err);
                }
            }
            self.session = Some(session);
        }

        self.session
            .as_mut()
            .ok_or_else(|| AppError::Process("persistent session unavailable".into()))
    }
}

/// Steps for the configured scenario, in declared order.
#[must_use]
pub fn protocol_steps(configs: &[StepConfig]) -> Vec<ScenarioStep<ProtocolContext>> {
    configs
        .iter()
        .cloned()
        .map(|config| {
            let name = config.name.clone();
            let required = config.required;
            ScenarioStep::new(name, required, move |ctx: &mut ProtocolContext| {
                async move { ctx.execute(&config).await }.boxed()
            })
        })
        .collect()
}

/// Handshake on a fresh session, call `tool` once and terminate the session.
///
/// The measured time covers spawning and the handshake as well as the call.
pub async fn single_call(
    launch: &LaunchSpec,
    invoker: &ToolInvoker,
    terminate_grace: Duration,
    tool: &str,
    arguments: Value,
) -> TimedOutcome {
    let mut ctx = ProtocolContext::new(
        launch.clone(),
        invoker.clone(),
        SessionMode::Persistent,
        terminate_grace,
    )
    .with_handshake_on_spawn(true);
    let timed = ctx.call_timed(tool, arguments, invoker.call_timeout()).await;
    ctx.shutdown().await;
    timed
}

/// Parse command-line tool arguments, which must form a JSON object.
///
/// # Errors
///
/// Returns `AppError::Config` for malformed JSON or a non-object value.
pub fn parse_tool_arguments(raw: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(AppError::Config(format!(
            "tool arguments must be a JSON object, got {other}"
        ))),
        Err(err) => Err(AppError::Config(format!("tool arguments are not valid JSON: {err}"))),
    }
}

/// The quick connectivity check: handshake, then listing, both required.
#[must_use]
pub fn connectivity_check() -> Vec<StepConfig> {
    vec![
        StepConfig {
            name: "handshake".to_owned(),
            kind: StepKind::Initialize,
            tool: None,
            arguments: Value::Object(serde_json::Map::new()),
            required: true,
            timeout_seconds: None,
            expect: ExpectShape::Any,
        },
        StepConfig {
            name: "list tools".to_owned(),
            kind: StepKind::ListTools,
            tool: None,
            arguments: Value::Object(serde_json::Map::new()),
            required: true,
            timeout_seconds: None,
            expect: ExpectShape::Any,
        },
    ]
}

async fn run_step(invoker: &ToolInvoker, session: &mut ProcessSession, step: &StepConfig) -> Result<String> {
    match step.kind {
        StepKind::Initialize => {
            let result = invoker.initialize(session).await?;
            let info = &result.server_info;
            if info.name.trim().is_empty() || info.version.trim().is_empty() {
                return Err(AppError::Protocol(
                    "serverInfo must carry a non-empty name and version".into(),
                ));
            }
            Ok(format!("server {} {}", info.name, info.version))
        }
        StepKind::ListTools => {
            let tools = invoker.list_tools(session).await?;
            if tools.is_empty() {
                return Err(AppError::Protocol("server advertises no tools".into()));
            }
            let mut seen = BTreeSet::new();
            for tool in &tools {
                if !seen.insert(tool.name.as_str()) {
                    return Err(AppError::Protocol(format!(
                        "tool '{}' is listed more than once",
                        tool.name
                    )));
                }
            }
            let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
            Ok(format!("{} tools: {}", tools.len(), names.join(", ")))
        }
        StepKind::CallTool => {
            let tool = step
                .tool
                .as_deref()
                .ok_or_else(|| AppError::Config(format!("step '{}' names no tool", step.name)))?;
            let content = invoker
                .try_call(session, tool, step.arguments.clone(), invoker.call_timeout())
                .await?;

            match (step.expect, content.primary()) {
                (ExpectShape::Structured, Some(Payload::Structured(_)))
                | (ExpectShape::Raw, Some(Payload::Raw(_)))
                | (ExpectShape::Any, _) => Ok(content.preview(160)),
                (ExpectShape::Structured, _) => Err(AppError::Protocol(format!(
                    "expected structured content from '{tool}', got: {}",
                    content.preview(80)
                ))),
                (ExpectShape::Raw, _) => Err(AppError::Protocol(format!(
                    "expected raw text from '{tool}', got: {}",
                    content.preview(80)
                ))),
            }
        }
    }
}
