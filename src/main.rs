#![forbid(unsafe_code)]

//! `mcp-harness`: drives a line-delimited JSON-RPC tool server over stdio
//! and reports protocol conformance, latency and idempotency results.
//!
//! Diagnostics go to stderr through `tracing`; stdout carries only the
//! report, so it can be captured or diffed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_harness::config::SessionMode;
use mcp_harness::idempotency::IdempotencySuite;
use mcp_harness::invoker::ToolInvoker;
use mcp_harness::report::{ConsoleReporter, Reporter};
use mcp_harness::scenario::{
    connectivity_check, parse_tool_arguments, protocol_steps, single_call, BenchmarkRunner,
    ProtocolContext, ScenarioRunner,
};
use mcp_harness::session::{LaunchMode, LaunchSpec};
use mcp_harness::{AppError, HarnessConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Handshake and list tools against a single persistent session.
    Check,
    /// Run the configured `[[scenario]]` steps.
    Run,
    /// Time repeated calls to every `[[benchmark.tool]]`.
    Bench,
    /// Validate re-invocation of the configured setup tool.
    Idempotency,
    /// Handshake, then call one tool and print its outcome.
    Call {
        /// Tool name.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
}

#[derive(Debug, Parser)]
#[command(name = "mcp-harness", about = "Protocol test harness for stdio tool servers", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    let config = HarnessConfig::load_from_path(&args.config)?;
    info!(config = %args.config.display(), command = ?args.command, "configuration loaded");

    let interrupt = CancellationToken::new();
    let signal_token = interrupt.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("interrupt received, aborting run");
        signal_token.cancel();
    });

    let mut reporter = ConsoleReporter::new(std::io::stdout());
    let runner = ScenarioRunner::new(interrupt.clone());

    let passed = match args.command {
        Command::Check => {
            let mut ctx = ProtocolContext::new(
                LaunchSpec::from_config(&config.server, LaunchMode::Session),
                ToolInvoker::from_config(&config),
                SessionMode::Persistent,
                config.timeouts.terminate_grace(),
            );
            let steps = protocol_steps(&connectivity_check());
            let report = runner.run("check", &mut ctx, steps, &mut reporter).await;
            ctx.shutdown().await;
            report.completed()
        }
        Command::Run => {
            if config.steps.is_empty() {
                return Err(AppError::Config("no [[scenario]] steps configured".into()));
            }
            let mut ctx = ProtocolContext::from_config(&config);
            let steps = protocol_steps(&config.steps);
            let report = runner.run("scenario", &mut ctx, steps, &mut reporter).await;
            ctx.shutdown().await;
            report.completed()
        }
        Command::Bench => {
            if config.benchmark.tools.is_empty() {
                return Err(AppError::Config("no [[benchmark.tool]] entries configured".into()));
            }
            let mut ctx = ProtocolContext::from_config(&config)
                .with_handshake_on_spawn(config.session_mode == SessionMode::Persistent);
            let report = BenchmarkRunner::new(interrupt.clone())
                .run(&mut ctx, &config.benchmark, &mut reporter)
                .await;
            report.completed(&config.benchmark)
        }
        Command::Idempotency => {
            let suite = IdempotencySuite::from_config(&config)?;
            suite.run(&runner, &mut reporter).await.completed()
        }
        Command::Call { tool, arguments } => {
            let arguments = parse_tool_arguments(&arguments)?;
            let launch = LaunchSpec::from_config(&config.server, LaunchMode::Session);
            let invoker = ToolInvoker::from_config(&config);
            let call = single_call(
                &launch,
                &invoker,
                config.timeouts.terminate_grace(),
                &tool,
                arguments,
            );
            let timed = tokio::select! {
                timed = call => Some(timed),
                () = interrupt.cancelled() => None,
            };
            match timed {
                Some(timed) => {
                    reporter.sample_recorded(&tool, 1, &timed);
                    timed.outcome.is_success()
                }
                None => false,
            }
        }
    };

    signal_task.abort();
    info!(passed, "harness finished");

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
