//! Repeated timed tool calls feeding a [`StatisticsAggregator`].

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{BenchmarkConfig, SessionMode};
use crate::report::Reporter;
use crate::scenario::steps::ProtocolContext;
use crate::stats::StatisticsAggregator;

/// Result of a benchmark run.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkReport {
    /// Every recorded sample.
    pub stats: StatisticsAggregator,
    /// Whether the interrupt token cut the run short.
    pub interrupted: bool,
}

impl BenchmarkReport {
    /// True when every configured tool has at least one successful sample.
    #[must_use]
    pub fn success(&self, config: &BenchmarkConfig) -> bool {
        !config.tools.is_empty()
            && config.tools.iter().all(|tool| {
                self.stats
                    .summary(&tool.name)
                    .is_some_and(|summary| summary.successes > 0)
            })
    }

    /// [`BenchmarkReport::success`] for a run that was not interrupted.
    #[must_use]
    pub fn completed(&self, config: &BenchmarkConfig) -> bool {
        self.success(config) && !self.interrupted
    }
}

/// Runs `iterations` attempts per configured tool.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRunner {
    interrupt: CancellationToken,
}

impl BenchmarkRunner {
    /// Runner that stops between attempts once `interrupt` is cancelled.
    #[must_use]
    pub fn new(interrupt: CancellationToken) -> Self {
        Self { interrupt }
    }

    /// Benchmark every tool in `config`, one attempt at a time.
    ///
    /// Every attempt is recorded whatever its outcome. In persistent mode
    /// the shared session is handshaken when spawned and terminated when
    /// the run ends.
    pub async fn run(
        &self,
        ctx: &mut ProtocolContext,
        config: &BenchmarkConfig,
        reporter: &mut dyn Reporter,
    ) -> BenchmarkReport {
        let mut report = BenchmarkReport::default();

        'tools: for tool in &config.tools {
            let span = info_span!("benchmark", tool = %tool.name, iterations = config.iterations);
            for iteration in 1..=config.iterations {
                let timeout = ctx.invoker().call_timeout();
                let attempt = ctx
                    .call_timed(&tool.name, tool.arguments.clone(), timeout)
                    .instrument(span.clone());

                let timed = tokio::select! {
                    biased;
                    () = self.interrupt.cancelled() => None,
                    timed = attempt => Some(timed),
                };
                let Some(timed) = timed else {
                    warn!(tool = %tool.name, iteration, "benchmark interrupted");
                    report.interrupted = true;
                    break 'tools;
                };

                report.stats.record_outcome(&tool.name, &timed);
                reporter.sample_recorded(&tool.name, iteration, &timed);
            }
        }

        if ctx.mode() == SessionMode::Persistent {
            ctx.shutdown().await;
        }

        let summaries = report.stats.summaries();
        info!(tools = summaries.len(), samples = report.stats.samples().len(), "benchmark complete");
        reporter.benchmark_finished(&summaries);
        report
    }
}
