//! Ordered step execution with required/optional failure policy.
//!
//! The runner is the recovery boundary of the harness: every error a step
//! returns is caught here, recorded with its category, and turned into a
//! pass/fail decision. A failed required step halts the scenario (later
//! steps are recorded as skipped); a failed optional step does not. The
//! interrupt token aborts the in-flight step and the remaining queue while
//! keeping every record gathered so far.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::report::Reporter;
use crate::Result;

/// Future returned by a step operation; `Ok` carries a diagnostic detail.
pub type StepFuture<'a> = BoxFuture<'a, Result<String>>;

type StepOperation<C> = Box<dyn for<'a> FnOnce(&'a mut C) -> StepFuture<'a> + Send>;

/// One named operation in a scenario.
pub struct ScenarioStep<C> {
    name: String,
    required: bool,
    operation: StepOperation<C>,
}

impl<C> ScenarioStep<C> {
    /// Build a step around `operation`.
    pub fn new<F>(name: impl Into<String>, required: bool, operation: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut C) -> StepFuture<'a> + Send + 'static,
    {
        Self {
            name: name.into(),
            required,
            operation: Box::new(operation),
        }
    }

    /// Step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a failure halts the scenario.
    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }
}

impl<C> std::fmt::Debug for ScenarioStep<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioStep")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Final state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The operation returned `Ok`.
    Passed,
    /// The operation returned an error.
    Failed,
    /// The operation never ran (halted or interrupted).
    Skipped,
}

/// Recorded result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// Step name.
    pub name: String,
    /// Whether the step was required.
    pub required: bool,
    /// Final state.
    pub status: StepStatus,
    /// Success detail, error message, or skip reason.
    pub detail: String,
    /// Error category for failed steps.
    pub error_kind: Option<&'static str>,
    /// Time spent in the operation.
    pub elapsed: Duration,
}

/// Pass/fail counts over executed steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Steps that passed.
    pub passed: u32,
    /// Steps that failed, required or not.
    pub failed: u32,
}

impl Tally {
    /// `passed / (passed + failed) × 100`, or 0 when nothing ran.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let total = self.passed.saturating_add(self.failed);
        if total == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(total) * 100.0
        }
    }
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// One record per declared step, in declared order.
    pub records: Vec<StepRecord>,
    /// Counts over executed steps.
    pub tally: Tally,
    /// Whether the interrupt token fired during the run.
    pub interrupted: bool,
}

impl ScenarioReport {
    /// True only when every required step passed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.records
            .iter()
            .filter(|record| record.required)
            .all(|record| record.status == StepStatus::Passed)
    }

    /// Every required step passed and the run was not interrupted.
    ///
    /// This is the verdict the binary turns into its exit status.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.success() && !self.interrupted
    }
}

/// Executes scenarios step by step.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    interrupt: CancellationToken,
}

impl ScenarioRunner {
    /// Runner that aborts when `interrupt` is cancelled.
    #[must_use]
    pub fn new(interrupt: CancellationToken) -> Self {
        Self { interrupt }
    }

    /// The runner's interrupt token.
    #[must_use]
    pub fn interrupt(&self) -> &CancellationToken {
        &self.interrupt
    }

    /// Run `steps` in declared order against `ctx`.
    pub async fn run<C: Send>(
        &self,
        name: &str,
        ctx: &mut C,
        steps: Vec<ScenarioStep<C>>,
        reporter: &mut dyn Reporter,
    ) -> ScenarioReport {
        let started_at = Utc::now();
        let mut records = Vec::with_capacity(steps.len());
        let mut tally = Tally::default();
        let mut halted_by: Option<String> = None;
        let mut interrupted = false;

        reporter.scenario_started(name, steps.len());

        for step in steps {
            let ScenarioStep {
                name: step_name,
                required,
                operation,
            } = step;

            let skip_reason = if interrupted || self.interrupt.is_cancelled() {
                interrupted = true;
                Some("interrupted before start".to_owned())
            } else {
                halted_by
                    .as_ref()
                    .map(|failed| format!("required step '{failed}' failed"))
            };

            if let Some(reason) = skip_reason {
                let record = StepRecord {
                    name: step_name,
                    required,
                    status: StepStatus::Skipped,
                    detail: reason,
                    error_kind: None,
                    elapsed: Duration::ZERO,
                };
                reporter.step_finished(&record);
                records.push(record);
                continue;
            }

            reporter.step_started(&step_name, required);
            let span = info_span!("step", step = %step_name, required);
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                () = self.interrupt.cancelled() => None,
                result = operation(ctx).instrument(span) => Some(result),
            };
            let elapsed = started.elapsed();

            let record = match result {
                None => {
                    warn!(step = %step_name, "step aborted by interrupt");
                    interrupted = true;
                    StepRecord {
                        name: step_name,
                        required,
                        status: StepStatus::Skipped,
                        detail: "interrupted while running".to_owned(),
                        error_kind: None,
                        elapsed,
                    }
                }
                Some(Ok(detail)) => {
                    tally.passed += 1;
                    info!(step = %step_name, ?elapsed, "step passed");
                    StepRecord {
                        name: step_name,
                        required,
                        status: StepStatus::Passed,
                        detail,
                        error_kind: None,
                        elapsed,
                    }
                }
                Some(Err(err)) => {
                    tally.failed += 1;
                    warn!(step = %step_name, required, error = %err, "step failed");
                    if required {
                        halted_by = Some(step_name.clone());
                    }
                    StepRecord {
                        name: step_name,
                        required,
                        status: StepStatus::Failed,
                        detail: err.to_string(),
                        error_kind: Some(err.kind()),
                        elapsed,
                    }
                }
            };

            reporter.step_finished(&record);
            records.push(record);
        }

        let report = ScenarioReport {
            name: name.to_owned(),
            started_at,
            records,
            tally,
            interrupted,
        };
        reporter.scenario_finished(&report);
        report
    }
}
