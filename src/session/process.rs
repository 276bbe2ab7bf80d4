//! One child process and its three standard streams.
//!
//! A [`ProcessSession`] is the only owner of a server's stdin/stdout/stderr.
//! Writes are single flushed lines; reads return one complete line or fail
//! with [`AppError::Timeout`] once the bound elapses. Stderr is drained by a
//! background task into a bounded tail buffer that becomes available as
//! diagnostics once the session is terminated.
//!
//! Termination is graceful first (close stdin, `SIGTERM` on Unix), then
//! forced after the grace period. The child is spawned with
//! `kill_on_drop(true)` so a session dropped mid-flight (for example when an
//! interrupted scenario future is discarded) still takes its process down.

use std::process::ExitStatus;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::protocol::correlator::RequestCorrelator;
use crate::session::codec::LineCodec;
use crate::session::spawner::{spawn_child, LaunchSpec};
use crate::{AppError, Result};

/// Bytes of stderr retained for diagnostics (the most recent ones win).
pub const STDERR_TAIL_BYTES: usize = 65_536;

/// Upper bound on waiting for the stderr drain task after the child exited.
const STDERR_DRAIN_BOUND: Duration = Duration::from_millis(500);

/// Stand-in deadline for bounds too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `timeout` from now, saturating rather than overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// The request/response half of a session: stdin writer plus framed stdout.
///
/// It can be lent to a worker task for the duration of one exchange and
/// handed back afterwards (see [`ProcessSession::take_io`]).
#[derive(Debug)]
pub struct SessionIo {
    stdin: ChildStdin,
    stdout: FramedRead<ChildStdout, LineCodec>,
}

impl SessionIo {
    /// Write `payload` as exactly one line and flush immediately.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if `payload` contains a line terminator.
    /// - `AppError::Process` if the pipe is closed or the write fails.
    pub async fn write(&mut self, payload: &str) -> Result<()> {
        if payload.contains('\n') {
            return Err(AppError::Protocol(
                "outbound payload must fit on a single line".into(),
            ));
        }

        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.extend_from_slice(payload.as_bytes());
        bytes.push(b'\n');

        self.stdin
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Process(format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| AppError::Process(format!("flush failed: {e}")))
    }

    /// Wait up to `timeout` for the next non-blank line.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout` when no complete line arrives within `timeout`.
    /// - `AppError::Process` when the server closes stdout or the read fails.
    /// - `AppError::Protocol` when a line exceeds the codec limit.
    pub async fn read_response(&mut self, timeout: Duration) -> Result<String> {
        let deadline = deadline_after(timeout);

        loop {
            let next = tokio::time::timeout_at(deadline, self.stdout.next())
                .await
                .map_err(|_| AppError::Timeout(timeout))?;

            match next {
                None => {
                    return Err(AppError::Process("server closed stdout".into()));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(line);
                }
            }
        }
    }
}

/// A spawned server process owned exclusively by the harness.
#[derive(Debug)]
pub struct ProcessSession {
    label: String,
    pid: Option<u32>,
    child: Option<Child>,
    io: Option<SessionIo>,
    correlator: RequestCorrelator,
    stderr_task: Option<JoinHandle<String>>,
    diagnostics: Option<String>,
    exit_status: Option<ExitStatus>,
    terminate_grace: Duration,
}

impl ProcessSession {
    /// Spawn the server described by `spec` and take ownership of its streams.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` on spawn failure or if a stream could not
    /// be captured.
    pub fn spawn(label: impl Into<String>, spec: &LaunchSpec, terminate_grace: Duration) -> Result<Self> {
        let label = label.into();
        let mut child = spawn_child(spec)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Process("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Process("failed to capture server stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Process("failed to capture server stderr".into()))?;

        let pid = child.id();
        debug!(session = %label, pid, "session streams captured");

        Ok(Self {
            label,
            pid,
            child: Some(child),
            io: Some(SessionIo {
                stdin,
                stdout: FramedRead::new(stdout, LineCodec::new()),
            }),
            correlator: RequestCorrelator::new(),
            stderr_task: Some(tokio::spawn(drain_stderr(stderr))),
            diagnostics: None,
            exit_status: None,
            terminate_grace,
        })
    }

    /// Session label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id captured at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether [`ProcessSession::terminate`] has completed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.child.is_none()
    }

    /// Whether the child is still running.
    ///
    /// A child that exited on its own is reaped here and its status kept.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                false
            }
            Err(err) => {
                warn!(session = %self.label, %err, "failed to poll server status");
                false
            }
        }
    }

    /// Exit status, once known.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Stderr tail captured up to termination.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    /// The session's request id source.
    pub fn correlator_mut(&mut self) -> &mut RequestCorrelator {
        &mut self.correlator
    }

    /// Write one line to the server. See [`SessionIo::write`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the streams are unavailable or the
    /// write fails, `AppError::Protocol` for multi-line payloads.
    pub async fn write(&mut self, payload: &str) -> Result<()> {
        self.io_mut()?.write(payload).await
    }

    /// Read one line from the server. See [`SessionIo::read_response`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` on expiry, `AppError::Process` on EOF or
    /// stream failure.
    pub async fn read_response(&mut self, timeout: Duration) -> Result<String> {
        self.io_mut()?.read_response(timeout).await
    }

    /// Lend the request/response streams out for one exchange.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the streams are already lent out or the
    /// session has been terminated.
    pub fn take_io(&mut self) -> Result<SessionIo> {
        self.io.take().ok_or_else(|| self.unavailable())
    }

    /// Return streams previously obtained from [`ProcessSession::take_io`].
    ///
    /// Streams handed back after termination are dropped.
    pub fn restore_io(&mut self, io: SessionIo) {
        if self.child.is_some() {
            self.io = Some(io);
        }
    }

    /// Stop the process: graceful signal, bounded wait, forced kill.
    ///
    /// Idempotent. Closing stdin and draining stderr happen on every call
    /// that actually stops a process; the stderr tail is retained.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        // Closing stdin is the first, politest stop request.
        self.io = None;

        let status = match child.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => {
                request_graceful_stop(&child, &self.label);
                match tokio::time::timeout(self.terminate_grace, child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(err)) => {
                        warn!(session = %self.label, %err, "wait on server failed, forcing kill");
                        force_kill(&mut child, &self.label, self.terminate_grace).await
                    }
                    Err(_elapsed) => {
                        warn!(
                            session = %self.label,
                            grace = ?self.terminate_grace,
                            "server ignored graceful stop, forcing kill"
                        );
                        force_kill(&mut child, &self.label, self.terminate_grace).await
                    }
                }
            }
        };

        self.exit_status = status.or(self.exit_status);

        if let Some(task) = self.stderr_task.take() {
            match tokio::time::timeout(STDERR_DRAIN_BOUND, task).await {
                Ok(Ok(tail)) => self.diagnostics = Some(tail),
                Ok(Err(err)) => warn!(session = %self.label, %err, "stderr drain task failed"),
                Err(_) => debug!(session = %self.label, "stderr still open after exit, dropping drain"),
            }
        }

        info!(
            session = %self.label,
            pid = self.pid,
            status = ?self.exit_status,
            "server process terminated"
        );
    }

    fn io_mut(&mut self) -> Result<&mut SessionIo> {
        if self.io.is_none() {
            return Err(self.unavailable());
        }
        self.io
            .as_mut()
            .ok_or_else(|| AppError::Process("session streams are unavailable".into()))
    }

    fn unavailable(&self) -> AppError {
        if self.child.is_none() {
            AppError::Process(format!("session '{}' has been terminated", self.label))
        } else {
            AppError::Process(format!("session '{}' streams are in use", self.label))
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            // kill_on_drop covers this too; the explicit call makes it
            // visible in logs.
            warn!(session = %self.label, pid = self.pid, "session dropped without terminate");
            if let Err(err) = child.start_kill() {
                debug!(session = %self.label, %err, "start_kill on drop failed");
            }
        }
    }
}

/// Run `f` against a freshly spawned session and terminate it afterwards,
/// whatever `f` returned.
///
/// # Errors
///
/// Returns the spawn error, or whatever `f` returned.
pub async fn with_session<T, F>(
    label: &str,
    spec: &LaunchSpec,
    terminate_grace: Duration,
    f: F,
) -> Result<T>
where
    F: for<'a> FnOnce(&'a mut ProcessSession) -> BoxFuture<'a, Result<T>>,
{
    let mut session = ProcessSession::spawn(label, spec, terminate_grace)?;
    let result = f(&mut session).await;
    session.terminate().await;
    result
}

#[cfg(unix)]
fn request_graceful_stop(child: &Child, label: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(session = label, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_graceful_stop(_child: &Child, label: &str) {
    // No portable graceful signal; closing stdin was the graceful request.
    debug!(session = label, "graceful stop relies on stdin closure on this platform");
}

async fn force_kill(child: &mut Child, label: &str, bound: Duration) -> Option<ExitStatus> {
    if let Err(err) = child.start_kill() {
        warn!(session = label, %err, "forced kill failed");
    }
    match tokio::time::timeout(bound, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(err)) => {
            warn!(session = label, %err, "wait after kill failed");
            None
        }
        Err(_) => {
            warn!(session = label, "server still running after forced kill");
            None
        }
    }
}

async fn drain_stderr(mut stderr: ChildStderr) -> String {
    let mut tail = String::new();
    let mut chunk = [0_u8; 4096];

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.push_str(&String::from_utf8_lossy(&chunk[..n]));
                trim_to_tail(&mut tail, STDERR_TAIL_BYTES);
            }
        }
    }

    tail
}

/// Drop leading bytes so `buf` is at most `limit` bytes, on a char boundary.
fn trim_to_tail(buf: &mut String, limit: usize) {
    if buf.len() <= limit {
        return;
    }
    let mut cut = buf.len() - limit;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}
