//! Server process spawner.
//!
//! Builds the launch command for either server mode with:
//! - piped stdin/stdout/stderr, so the session owns all three streams;
//! - `kill_on_drop(true)`, so a dropped session never leaves a live child;
//! - the configured environment plus the pass-through variables copied
//!   from the harness environment without interpretation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::{AppError, Result};

/// Which server invocation mode a launch selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Persistent stdio session serving protocol requests.
    Session,
    /// Standalone setup-only mode that provisions a resource and stays resident.
    SetupOnly,
}

/// Everything needed to start one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Server executable.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Environment variables set on the child (on top of the inherited ones).
    pub env: BTreeMap<String, String>,
    /// Working directory.
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Launch spec for a bare program with arguments and no extra environment.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Derive a launch spec for `mode` from the server configuration.
    ///
    /// Pass-through variables absent from the harness environment are
    /// skipped; explicit `env` entries take precedence over them.
    #[must_use]
    pub fn from_config(server: &ServerConfig, mode: LaunchMode) -> Self {
        let args = match mode {
            LaunchMode::Session => server.args.clone(),
            LaunchMode::SetupOnly => server.setup_args.clone(),
        };

        let mut env = BTreeMap::new();
        for key in &server.passthrough_env {
            if let Ok(val) = std::env::var(key) {
                env.insert(key.clone(), val);
            }
        }
        for (key, val) in &server.env {
            env.insert(key.clone(), val.clone());
        }

        Self {
            program: server.command.clone(),
            args,
            env,
            working_dir: server.working_dir.clone(),
        }
    }

    /// Add or replace one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env.insert(key.into(), val.into());
        self
    }

    /// Human-readable command line for logs and diagnostics.
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Spawn the process described by `spec` with all three streams piped.
///
/// # Errors
///
/// Returns `AppError::Process` if the OS refuses to start the program.
pub fn spawn_child(spec: &LaunchSpec) -> Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    debug!(command = %spec.display_command(), env_keys = spec.env.len(), "spawning server");

    let child = cmd.spawn().map_err(|err| {
        AppError::Process(format!(
            "failed to spawn '{}': {err}",
            spec.program.display()
        ))
    })?;

    info!(
        pid = child.id().unwrap_or(0),
        command = %spec.display_command(),
        "server process spawned"
    );

    Ok(child)
}
