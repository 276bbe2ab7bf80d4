//! Reporting interface shared by scenario runs and benchmarks.
//!
//! Protocol code never prints. Runners emit events to a [`Reporter`], and
//! the reporter decides how they surface: [`ConsoleReporter`] renders the
//! human-readable report on any writer (stdout in the binary), while
//! [`LogReporter`] turns the same events into structured `tracing` records.

use std::io::Write;

use tracing::{info, warn};

use crate::invoker::TimedOutcome;
use crate::scenario::{ScenarioReport, StepRecord, StepStatus};
use crate::stats::ToolSummary;

/// Receives progress and result events from runners.
pub trait Reporter: Send {
    /// A scenario with `step_count` declared steps is starting.
    fn scenario_started(&mut self, _name: &str, _step_count: usize) {}

    /// A step is about to run.
    fn step_started(&mut self, _name: &str, _required: bool) {}

    /// A step reached its final state (including skipped).
    fn step_finished(&mut self, record: &StepRecord);

    /// The scenario is over; `report` holds every record and the tally.
    fn scenario_finished(&mut self, report: &ScenarioReport);

    /// One benchmark attempt finished.
    fn sample_recorded(&mut self, _tool: &str, _iteration: u32, _timed: &TimedOutcome) {}

    /// The benchmark is over.
    fn benchmark_finished(&mut self, summaries: &[ToolSummary]);
}

/// Human-readable report on an arbitrary writer.
#[derive(Debug)]
pub struct ConsoleReporter<W> {
    out: W,
}

impl<W: Write + Send> ConsoleReporter<W> {
    /// Reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(err) = writeln!(self.out, "{text}") {
            warn!(%err, "failed to write report line");
        }
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn scenario_started(&mut self, name: &str, step_count: usize) {
        self.line(&format!("== {name} ({step_count} steps) =="));
    }

    fn step_finished(&mut self, record: &StepRecord) {
        let marker = match record.status {
            StepStatus::Passed => "PASS",
            StepStatus::Failed => "FAIL",
            StepStatus::Skipped => "SKIP",
        };
        let required = if record.required { " (required)" } else { "" };
        let text = if record.status == StepStatus::Skipped {
            format!("[{marker}] {}{required}: {}", record.name, record.detail)
        } else {
            format!(
                "[{marker}] {}{required} {:.3}s: {}",
                record.name,
                record.elapsed.as_secs_f64(),
                record.detail
            )
        };
        self.line(&text);
    }

    fn scenario_finished(&mut self, report: &ScenarioReport) {
        let verdict = if report.completed() { "SUCCESS" } else { "FAILURE" };
        let interrupted = if report.interrupted { " (interrupted)" } else { "" };
        self.line(&format!(
            "-- passed {}, failed {}, success rate {:.1}%: {verdict}{interrupted}",
            report.tally.passed,
            report.tally.failed,
            report.tally.rate()
        ));
    }

    fn sample_recorded(&mut self, tool: &str, iteration: u32, timed: &TimedOutcome) {
        self.line(&format!(
            "  {tool} #{iteration}: {:.3}s {}",
            timed.elapsed.as_secs_f64(),
            timed.outcome.summary()
        ));
    }

    fn benchmark_finished(&mut self, summaries: &[ToolSummary]) {
        self.line(&format!(
            "{:<24} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9}",
            "tool", "attempts", "success", "avg(s)", "min(s)", "max(s)", "stddev"
        ));
        for summary in summaries {
            let timing = summary.timing.map_or_else(
                || format!("{:>9} {:>9} {:>9} {:>9}", "-", "-", "-", "-"),
                |t| {
                    format!(
                        "{:>9.3} {:>9.3} {:>9.3} {:>9.3}",
                        t.avg, t.min, t.max, t.stddev
                    )
                },
            );
            self.line(&format!(
                "{:<24} {:>8} {:>7.1}% {timing}",
                summary.tool, summary.attempts, summary.success_rate
            ));
        }
    }
}

/// Emits every event as a structured log record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn step_finished(&mut self, record: &StepRecord) {
        info!(
            step = %record.name,
            required = record.required,
            status = ?record.status,
            error_kind = record.error_kind,
            elapsed_ms = u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX),
            detail = %record.detail,
            "step finished"
        );
    }

    fn scenario_finished(&mut self, report: &ScenarioReport) {
        info!(
            scenario = %report.name,
            passed = report.tally.passed,
            failed = report.tally.failed,
            rate = report.tally.rate(),
            success = report.success(),
            interrupted = report.interrupted,
            "scenario finished"
        );
    }

    fn benchmark_finished(&mut self, summaries: &[ToolSummary]) {
        for summary in summaries {
            info!(
                tool = %summary.tool,
                attempts = summary.attempts,
                successes = summary.successes,
                success_rate = summary.success_rate,
                avg = summary.timing.map(|t| t.avg),
                stddev = summary.timing.map(|t| t.stddev),
                "benchmark summary"
            );
        }
    }
}
