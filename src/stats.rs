//! Per-tool latency and success statistics.
//!
//! Samples are append-only: recording never overwrites or reorders earlier
//! samples, so re-running a benchmark only ever adds evidence. Timing
//! figures are computed over successful samples only; the success rate is
//! computed over every attempt.

use std::time::Duration;

use crate::invoker::TimedOutcome;

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    /// Tool name.
    pub tool: String,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Whether the attempt succeeded.
    pub success: bool,
}

/// Timing figures over successful samples, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingStats {
    /// Arithmetic mean.
    pub avg: f64,
    /// Fastest success.
    pub min: f64,
    /// Slowest success.
    pub max: f64,
    /// Sample standard deviation; zero with fewer than two successes.
    pub stddev: f64,
}

/// Summary for one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSummary {
    /// Tool name.
    pub tool: String,
    /// Recorded attempts.
    pub attempts: u32,
    /// Successful attempts.
    pub successes: u32,
    /// `successes / attempts × 100`.
    pub success_rate: f64,
    /// Present when at least one attempt succeeded.
    pub timing: Option<TimingStats>,
}

/// Accumulates [`LatencySample`]s and summarizes them per tool.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAggregator {
    samples: Vec<LatencySample>,
}

impl StatisticsAggregator {
    /// Empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sample.
    pub fn record(&mut self, tool: &str, duration: Duration, success: bool) {
        self.samples.push(LatencySample {
            tool: tool.to_owned(),
            duration,
            success,
        });
    }

    /// Append the sample described by an invoker outcome.
    pub fn record_outcome(&mut self, tool: &str, timed: &TimedOutcome) {
        self.record(tool, timed.elapsed, timed.outcome.is_success());
    }

    /// All samples in recording order.
    #[must_use]
    pub fn samples(&self) -> &[LatencySample] {
        &self.samples
    }

    /// Tools in order of their first recorded sample.
    #[must_use]
    pub fn tools(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for sample in &self.samples {
            if !seen.contains(&sample.tool.as_str()) {
                seen.push(&sample.tool);
            }
        }
        seen
    }

    /// Summary for `tool`, or `None` if it has no samples.
    #[must_use]
    pub fn summary(&self, tool: &str) -> Option<ToolSummary> {
        let mut attempts: u32 = 0;
        let mut durations: Vec<f64> = Vec::new();

        for sample in self.samples.iter().filter(|s| s.tool == tool) {
            attempts = attempts.saturating_add(1);
            if sample.success {
                durations.push(sample.duration.as_secs_f64());
            }
        }

        if attempts == 0 {
            return None;
        }

        let successes = u32::try_from(durations.len()).unwrap_or(u32::MAX);

        Some(ToolSummary {
            tool: tool.to_owned(),
            attempts,
            successes,
            success_rate: f64::from(successes) / f64::from(attempts) * 100.0,
            timing: timing_stats(&durations, successes),
        })
    }

    /// Summaries for every tool, in first-recorded order.
    #[must_use]
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools()
            .into_iter()
            .filter_map(|tool| self.summary(tool))
            .collect()
    }
}

fn timing_stats(durations: &[f64], count: u32) -> Option<TimingStats> {
    let (&first, rest) = durations.split_first()?;

    let n = f64::from(count);
    let (min, max, sum) = rest
        .iter()
        .fold((first, first, first), |(lo, hi, total), &d| {
            (lo.min(d), hi.max(d), total + d)
        });
    let avg = sum / n;

    let stddev = if count < 2 {
        0.0
    } else {
        let squares: f64 = durations.iter().map(|d| (d - avg).powi(2)).sum();
        (squares / (n - 1.0)).sqrt()
    };

    Some(TimingStats {
        avg,
        min,
        max,
        stddev,
    })
}
