//! Wall-clock bounded execution of one protocol exchange.
//!
//! The operation runs on its own tokio task (the worker) while the caller
//! acts as the watchdog. The two share nothing but the join handle and a
//! [`CancellationToken`] handed to the worker. On expiry the watchdog:
//!
//! 1. cancels the token, so a cooperative worker stops at its next await;
//! 2. terminates the associated process, which unblocks any pending pipe
//!    read even if the worker ignores the token;
//! 3. waits at most `cancel_grace` for the worker and aborts it otherwise.
//!
//! The caller therefore returns within the bound plus the termination
//! escalation, and no child outlives the timed-out call.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::ProcessSession;
use crate::{AppError, Result};

/// Something the supervisor can stop when an operation overruns.
pub trait Terminate: Send {
    /// Stop the underlying resource. Must itself be bounded.
    fn terminate(&mut self) -> impl Future<Output = ()> + Send;
}

impl Terminate for ProcessSession {
    fn terminate(&mut self) -> impl Future<Output = ()> + Send {
        ProcessSession::terminate(self)
    }
}

/// Termination target for operations not tied to a process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTarget;

impl Terminate for NoTarget {
    async fn terminate(&mut self) {}
}

/// Runs operations under a hard deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    cancel_grace: Duration,
}

impl TimeoutSupervisor {
    /// Supervisor granting cancelled workers `cancel_grace` to wind down.
    #[must_use]
    pub fn new(cancel_grace: Duration) -> Self {
        Self { cancel_grace }
    }

    /// Grace window granted to a cancelled worker.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    /// Run `operation` on a worker task, waiting at most `duration`.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout(duration)` if the worker did not finish in time;
    ///   `target` has been terminated by the time this returns.
    /// - `AppError::Process` if the worker panicked.
    /// - Whatever error the operation itself returned.
    pub async fn run_with_timeout<T, F, Fut, K>(
        &self,
        operation: F,
        duration: Duration,
        target: &mut K,
    ) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        K: Terminate,
    {
        let token = CancellationToken::new();
        let mut worker = tokio::spawn(operation(token.clone()));
        let started = Instant::now();

        tokio::select! {
            joined = &mut worker => return flatten_join(joined),
            () = tokio::time::sleep(duration) => {}
        }

        warn!(bound = ?duration, "operation exceeded its bound, cancelling");
        token.cancel();

        let ((), settled) = tokio::join!(
            target.terminate(),
            tokio::time::timeout(self.cancel_grace, &mut worker)
        );

        if settled.is_err() {
            debug!(grace = ?self.cancel_grace, "worker ignored cancellation, aborting");
            worker.abort();
        }

        debug!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "timed-out operation reclaimed"
        );

        Err(AppError::Timeout(duration))
    }
}

fn flatten_join<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(AppError::Interrupted),
        Err(err) => Err(AppError::Process(format!("worker panicked: {err}"))),
    }
}
