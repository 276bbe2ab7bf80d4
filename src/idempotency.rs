//! Safe re-invocation of a setup-class tool across independent sessions.
//!
//! The suite runs as an ordinary scenario over an [`IdempotencyContext`]:
//!
//! 1. with no resource present, a fresh session calls the setup tool; the
//!    resource must appear while that session lives and go away with it;
//! 2. a standalone process launched in setup-only mode provisions the
//!    resource and is left running;
//! 3. an independent session calls the setup tool while the resource
//!    already exists, then calls it again in the same session;
//! 4. a third session repeats the setup call on its own;
//! 5. a session that has only completed the handshake calls every
//!    dependent tool with the ensure-ready flag set;
//! 6. the endpoints reported by all setup calls against the standalone
//!    resource must collapse to one.
//!
//! Every process the suite starts is terminated before [`IdempotencySuite::run`]
//! returns, whatever the outcome.

use std::collections::BTreeSet;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::{HarnessConfig, IdempotencyConfig};
use crate::invoker::{ToolContent, ToolInvoker};
use crate::report::Reporter;
use crate::scenario::{ScenarioReport, ScenarioRunner, ScenarioStep};
use crate::session::process::deadline_after;
use crate::session::{with_session, LaunchMode, LaunchSpec, ProcessSession};
use crate::{AppError, Result};

/// Bound on a single TCP probe of the provisioned resource.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between probes while waiting for the resource to appear.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Mutable state threaded through the suite's steps.
#[derive(Debug)]
pub struct IdempotencyContext {
    config: IdempotencyConfig,
    session_launch: LaunchSpec,
    setup_launch: LaunchSpec,
    invoker: ToolInvoker,
    terminate_grace: Duration,
    standalone: Option<ProcessSession>,
    primary: Option<ProcessSession>,
    setup_calls: u32,
    endpoints: Vec<String>,
}

impl IdempotencyContext {
    /// Endpoints reported by setup calls so far, in call order.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Call setup on a fresh session while no resource exists.
    ///
    /// The resource must be reachable before that session ends and released
    /// once it is terminated. Its endpoint is not counted with the endpoints
    /// observed against the standalone resource.
    async fn first_setup_creates_resource(&mut self) -> Result<String> {
        self.ensure_resource_absent().await?;

        let invoker = self.invoker.clone();
        let tool = self.config.setup_tool.clone();
        let arguments = self.config.setup_arguments.clone();
        let probe_address = self.config.probe_address.clone();

        let content = with_session(
            "first-setup",
            &self.session_launch,
            self.terminate_grace,
            move |session| {
                async move {
                    invoker.initialize(session).await?;
                    let timeout = invoker.call_timeout();
                    let content = invoker.try_call(session, &tool, arguments, timeout).await?;
                    if let Some(addr) = &probe_address {
                        probe(addr).await.map_err(|err| {
                            AppError::Tool(format!(
                                "setup reported success but nothing listens at {addr}: {err}"
                            ))
                        })?;
                    }
                    Ok(content)
                }
                .boxed()
            },
        )
        .await?;

        let endpoint = self.endpoint_of(&content)?;
        if let Some(addr) = &self.config.probe_address {
            self.wait_for_release(addr).await?;
        }

        Ok(match endpoint {
            Some(endpoint) => format!(
                "created {endpoint}, released with its session: {}",
                content.preview(120)
            ),
            None => format!("setup on a fresh session succeeded: {}", content.preview(120)),
        })
    }

    /// Fail when the probe address already answers.
    async fn ensure_resource_absent(&self) -> Result<()> {
        if let Some(addr) = &self.config.probe_address {
            if probe(addr).await.is_ok() {
                return Err(AppError::Process(format!(
                    "resource already reachable at {addr} before setup; \
                     it cannot be attributed to the server under test"
                )));
            }
        }
        Ok(())
    }

    /// Poll until nothing answers at `addr` or the settle window ends.
    async fn wait_for_release(&self, addr: &str) -> Result<()> {
        let deadline = deadline_after(self.config.settle());
        loop {
            if probe(addr).await.is_err() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Process(format!(
                    "resource at {addr} still reachable after the provisioning session ended"
                )));
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    /// Launch the setup-only process and wait for the resource.
    async fn provision_standalone(&mut self) -> Result<String> {
        self.ensure_resource_absent().await?;

        let mut standalone =
            ProcessSession::spawn("standalone-setup", &self.setup_launch, self.terminate_grace)?;
        let pid = standalone.pid();

        let reachable = self.wait_for_resource().await;

        if !standalone.is_alive() {
            standalone.terminate().await;
            let status = standalone.exit_status();
            let tail = standalone.diagnostics().unwrap_or_default().trim().to_owned();
            return Err(AppError::Process(format!(
                "standalone setup process exited early ({status:?}): {tail}"
            )));
        }
        self.standalone = Some(standalone);

        match (&self.config.probe_address, reachable) {
            (Some(addr), Err(err)) => Err(AppError::Process(format!(
                "resource not reachable at {addr} after setup: {err}"
            ))),
            (Some(addr), Ok(())) => Ok(format!(
                "standalone pid {pid:?} holds the resource at {addr}"
            )),
            (None, _) => Ok(format!("standalone pid {pid:?} still running after settle")),
        }
    }

    /// Poll the probe address until it answers or the settle window ends.
    /// Without a probe address this simply waits out the window.
    async fn wait_for_resource(&self) -> std::result::Result<(), String> {
        let settle = self.config.settle();
        let Some(addr) = &self.config.probe_address else {
            tokio::time::sleep(settle).await;
            return Ok(());
        };

        let deadline = deadline_after(settle);
        loop {
            match probe(addr).await {
                Ok(()) => return Ok(()),
                Err(err) if tokio::time::Instant::now() >= deadline => return Err(err),
                Err(err) => {
                    debug!(addr, %err, "resource not up yet");
                    tokio::time::sleep(PROBE_INTERVAL).await;
                }
            }
        }
    }

    /// Open the primary independent session and call setup once.
    async fn setup_on_primary(&mut self) -> Result<String> {
        let mut session =
            ProcessSession::spawn("primary", &self.session_launch, self.terminate_grace)?;
        if let Err(err) = self.invoker.initialize(&mut session).await {
            session.terminate().await;
            return Err(err);
        }
        self.primary = Some(session);
        self.repeat_setup_on_primary().await
    }

    /// Call setup again on the already-open primary session.
    async fn repeat_setup_on_primary(&mut self) -> Result<String> {
        let session = self
            .primary
            .as_mut()
            .ok_or_else(|| AppError::Process("primary session was never established".into()))?;
        let content = self
            .invoker
            .try_call(
                session,
                &self.config.setup_tool,
                self.config.setup_arguments.clone(),
                self.invoker.call_timeout(),
            )
            .await?;
        self.observe_setup(&content)
    }

    /// Handshake and call setup on a separate, short-lived session.
    async fn setup_on_independent_session(&mut self) -> Result<String> {
        let invoker = self.invoker.clone();
        let tool = self.config.setup_tool.clone();
        let arguments = self.config.setup_arguments.clone();

        let content = with_session(
            "independent",
            &self.session_launch,
            self.terminate_grace,
            move |session| {
                async move {
                    invoker.initialize(session).await?;
                    let timeout = invoker.call_timeout();
                    invoker.try_call(session, &tool, arguments, timeout).await
                }
                .boxed()
            },
        )
        .await?;
        self.observe_setup(&content)
    }

    /// Call every dependent tool with the ensure-ready flag from a fresh
    /// session that has done nothing but the handshake.
    async fn dependent_calls(&mut self) -> Result<String> {
        if self.config.dependent_tools.is_empty() {
            return Ok("no dependent tools configured".to_owned());
        }

        let mut arguments = Map::new();
        arguments.insert(self.config.ensure_flag.clone(), Value::Bool(true));
        let arguments = Value::Object(arguments);
        let invoker = self.invoker.clone();
        let tools = self.config.dependent_tools.clone();

        let passed = with_session(
            "dependent",
            &self.session_launch,
            self.terminate_grace,
            move |session| {
                async move {
                    invoker.initialize(session).await?;
                    let timeout = invoker.call_timeout();
                    for tool in &tools {
                        invoker
                            .try_call(session, tool, arguments.clone(), timeout)
                            .await
                            .map_err(|err| match err {
                                AppError::Tool(msg) => AppError::Tool(format!("{tool}: {msg}")),
                                other => other,
                            })?;
                    }
                    Ok(tools)
                }
                .boxed()
            },
        )
        .await?;

        Ok(format!(
            "{} dependent calls on a fresh session succeeded with {}=true: {}",
            passed.len(),
            self.config.ensure_flag,
            passed.join(", ")
        ))
    }

    /// Confirm no setup call produced a second endpoint.
    async fn verify_single_resource(&mut self) -> Result<String> {
        if let Some(addr) = &self.config.probe_address {
            probe(addr).await.map_err(|err| {
                AppError::Process(format!("resource at {addr} disappeared: {err}"))
            })?;
        }

        if let Some(standalone) = self.standalone.as_mut() {
            if !standalone.is_alive() {
                return Err(AppError::Process(
                    "standalone setup process is no longer running".into(),
                ));
            }
        }

        if self.config.endpoint_pointer.is_none() {
            return Ok(format!(
                "{} setup calls succeeded; endpoint tracking not configured",
                self.setup_calls
            ));
        }

        let distinct: BTreeSet<&str> = self.endpoints.iter().map(String::as_str).collect();
        if distinct.len() > 1 {
            let listed: Vec<&str> = distinct.into_iter().collect();
            return Err(AppError::Tool(format!(
                "setup created duplicate resources: {}",
                listed.join(", ")
            )));
        }

        Ok(format!(
            "{} setup calls reported a single endpoint: {}",
            self.setup_calls,
            distinct.into_iter().next().unwrap_or("<none>")
        ))
    }

    fn observe_setup(&mut self, content: &ToolContent) -> Result<String> {
        self.setup_calls += 1;
        let Some(endpoint) = self.endpoint_of(content)? else {
            return Ok(content.preview(160));
        };

        info!(endpoint = %endpoint, "setup reported endpoint");
        self.endpoints.push(endpoint.clone());
        Ok(format!("endpoint {endpoint}: {}", content.preview(120)))
    }

    /// Endpoint named by a setup result, when endpoint tracking is configured.
    fn endpoint_of(&self, content: &ToolContent) -> Result<Option<String>> {
        let Some(pointer) = &self.config.endpoint_pointer else {
            return Ok(None);
        };

        content
            .structured()
            .and_then(|value| value.pointer(pointer))
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .ok_or_else(|| {
                AppError::Protocol(format!(
                    "setup result has no endpoint at '{pointer}': {}",
                    content.preview(80)
                ))
            })
            .map(Some)
    }

    /// Terminate every process the suite started.
    async fn shutdown(&mut self) {
        if let Some(mut session) = self.primary.take() {
            session.terminate().await;
        }
        if let Some(mut standalone) = self.standalone.take() {
            standalone.terminate().await;
            if let Some(tail) = standalone.diagnostics().filter(|t| !t.trim().is_empty()) {
                debug!(stderr = %tail, "standalone setup stderr");
            }
        }
    }
}

/// The idempotency scenario.
#[derive(Debug, Clone)]
pub struct IdempotencySuite {
    config: IdempotencyConfig,
    session_launch: LaunchSpec,
    setup_launch: LaunchSpec,
    invoker: ToolInvoker,
    terminate_grace: Duration,
}

impl IdempotencySuite {
    /// Suite over explicit launch specs.
    #[must_use]
    pub fn new(
        config: IdempotencyConfig,
        session_launch: LaunchSpec,
        setup_launch: LaunchSpec,
        invoker: ToolInvoker,
        terminate_grace: Duration,
    ) -> Self {
        Self {
            config,
            session_launch,
            setup_launch,
            invoker,
            terminate_grace,
        }
    }

    /// Suite built from the harness configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the `[idempotency]` section is missing.
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let idempotency = config
            .idempotency
            .clone()
            .ok_or_else(|| AppError::Config("missing [idempotency] section".into()))?;
        Ok(Self::new(
            idempotency,
            LaunchSpec::from_config(&config.server, LaunchMode::Session),
            LaunchSpec::from_config(&config.server, LaunchMode::SetupOnly),
            ToolInvoker::from_config(config),
            config.timeouts.terminate_grace(),
        ))
    }

    /// Fresh context with no processes started.
    #[must_use]
    pub fn context(&self) -> IdempotencyContext {
        IdempotencyContext {
            config: self.config.clone(),
            session_launch: self.session_launch.clone(),
            setup_launch: self.setup_launch.clone(),
            invoker: self.invoker.clone(),
            terminate_grace: self.terminate_grace,
            standalone: None,
            primary: None,
            setup_calls: 0,
            endpoints: Vec::new(),
        }
    }

    /// The suite's steps in execution order.
    #[must_use]
    pub fn steps() -> Vec<ScenarioStep<IdempotencyContext>> {
        vec![
            ScenarioStep::new(
                "first setup on a fresh session creates the resource",
                true,
                |ctx: &mut IdempotencyContext| ctx.first_setup_creates_resource().boxed(),
            ),
            ScenarioStep::new(
                "standalone setup provisions the resource",
                true,
                |ctx: &mut IdempotencyContext| ctx.provision_standalone().boxed(),
            ),
            ScenarioStep::new(
                "setup succeeds while the resource exists",
                true,
                |ctx: &mut IdempotencyContext| ctx.setup_on_primary().boxed(),
            ),
            ScenarioStep::new(
                "repeated setup in the same session succeeds",
                false,
                |ctx: &mut IdempotencyContext| ctx.repeat_setup_on_primary().boxed(),
            ),
            ScenarioStep::new(
                "setup from an independent session succeeds",
                false,
                |ctx: &mut IdempotencyContext| ctx.setup_on_independent_session().boxed(),
            ),
            ScenarioStep::new(
                "dependent calls with ensure-ready reuse the resource",
                true,
                |ctx: &mut IdempotencyContext| ctx.dependent_calls().boxed(),
            ),
            ScenarioStep::new(
                "no duplicate resource was created",
                true,
                |ctx: &mut IdempotencyContext| ctx.verify_single_resource().boxed(),
            ),
        ]
    }

    /// Run the suite, terminating every process it started before returning.
    pub async fn run(&self, runner: &ScenarioRunner, reporter: &mut dyn Reporter) -> ScenarioReport {
        let mut ctx = self.context();
        let report = runner
            .run("idempotency", &mut ctx, Self::steps(), reporter)
            .await;
        ctx.shutdown().await;
        report
    }
}

async fn probe(addr: &str) -> std::result::Result<(), String> {
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("connect timed out after {PROBE_TIMEOUT:?}")),
    }
}
