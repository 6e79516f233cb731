//! Sequential multi-target benchmark runs.
//!
//! Each target goes through the same lifecycle:
//!
//! ```text
//! Idle ─► Monitoring ─► Attacking ─► Finalizing ─► Cooldown ─► (next target)
//!                                              └──────────────► Done (last target)
//! ```
//!
//! Monitoring only happens when the target names a local port. The summary is persisted
//! before the cooldown starts, so an interrupted run keeps every finished target.

use std::sync::Arc;

use chrono::Utc;
use gatebench_core::{
    summarize, BenchConfig, LoadMode, MetricsAggregator, Result, ResultStore, RunSummary, Target,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::concurrency::ConcurrencyModeEngine;
use crate::executor::RequestExecutor;
use crate::rate::RateModeEngine;
use crate::report::print_report;
use crate::sampler::MemorySampler;
use crate::AttackReport;

/// Lifecycle stage of one target's run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Monitoring,
    Attacking,
    Finalizing,
    Cooldown,
    Done,
}

/// Outcome of one target's run
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub name: String,
    pub summary: RunSummary,
    pub attack: AttackReport,
    /// Phases the target passed through, in order
    pub phases: Vec<RunPhase>,
}

/// Runs every target in order with the configured load mode
pub struct BenchmarkOrchestrator {
    config: BenchConfig,
    mode: LoadMode,
    executor: Arc<dyn RequestExecutor>,
    sampler: Option<MemorySampler>,
    store: Option<ResultStore>,
    cancel: CancellationToken,
    print_reports: bool,
}

impl BenchmarkOrchestrator {
    /// Fails on an invalid configuration before anything runs
    pub fn new(
        config: BenchConfig,
        executor: Arc<dyn RequestExecutor>,
        sampler: Option<MemorySampler>,
        store: Option<ResultStore>,
    ) -> Result<Self> {
        let mode = config.validate()?;
        Ok(Self {
            config,
            mode,
            executor,
            sampler,
            store,
            cancel: CancellationToken::new(),
            print_reports: true,
        })
    }

    /// Print each target's boxed report as it finishes
    pub fn with_console_reports(mut self, enabled: bool) -> Self {
        self.print_reports = enabled;
        self
    }

    /// Token that stops the current attack and skips the remaining targets
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    /// Benchmark `targets` one after another.
    ///
    /// A failed result write aborts the run; reports of targets that already finished are
    /// on disk at that point.
    pub async fn run(&self, targets: &[Arc<Target>]) -> Result<Vec<TargetReport>> {
        if targets.is_empty() {
            warn!("No targets to benchmark");
            return Ok(Vec::new());
        }

        info!(mode = %self.mode, targets = targets.len(), "Starting benchmark");
        let mut reports = Vec::with_capacity(targets.len());

        for (index, target) in targets.iter().enumerate() {
            let is_last = index + 1 == targets.len();
            let report = self.run_target(target, is_last).await?;
            reports.push(report);

            if self.cancel.is_cancelled() {
                let skipped = targets.len() - index - 1;
                if skipped > 0 {
                    warn!(skipped, "Benchmark cancelled, skipping remaining targets");
                }
                break;
            }
        }

        info!(completed = reports.len(), "Benchmark finished");
        Ok(reports)
    }

    async fn run_target(&self, target: &Arc<Target>, is_last: bool) -> Result<TargetReport> {
        let mut phases = vec![RunPhase::Idle];
        info!(target_name = target.name(), url = target.url(), "Benchmarking target");

        let sampler = match (target.port(), &self.sampler) {
            (Some(port), Some(sampler)) => {
                phases.push(RunPhase::Monitoring);
                Some(sampler.start(port))
            }
            _ => None,
        };

        phases.push(RunPhase::Attacking);
        let aggregator = Arc::new(MetricsAggregator::new());
        let attack = self.attack(Arc::clone(target), Arc::clone(&aggregator)).await;

        phases.push(RunPhase::Finalizing);
        let samples = match sampler {
            Some(handle) => handle.stop().await,
            None => Vec::new(),
        };
        let summary = summarize(&aggregator.snapshot(), &samples, attack.elapsed, Utc::now());

        if let Some(store) = &self.store {
            store.merge_and_save(&target.result_key(), &summary)?;
        }

        if self.print_reports {
            print_report(target.name(), &summary);
        }

        let cooldown = self.config.cooldown();
        if !is_last && !cooldown.is_zero() && !self.cancel.is_cancelled() {
            phases.push(RunPhase::Cooldown);
            info!(secs = cooldown.as_secs(), "Cooling down before next target");
            tokio::select! {
                _ = sleep(cooldown) => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        phases.push(RunPhase::Done);
        Ok(TargetReport {
            name: target.name().to_string(),
            summary,
            attack,
            phases,
        })
    }

    async fn attack(&self, target: Arc<Target>, aggregator: Arc<MetricsAggregator>) -> AttackReport {
        let executor = Arc::clone(&self.executor);
        match self.mode {
            LoadMode::Rate { rps } => {
                RateModeEngine::new(rps, self.config.duration(), executor)
                    .with_max_attack(self.config.max_attack())
                    .with_max_in_flight(self.config.max_in_flight)
                    .with_cancellation(self.cancel.clone())
                    .run(target, aggregator)
                    .await
            }
            LoadMode::Concurrency { workers, ramp_up } => {
                let mut engine = ConcurrencyModeEngine::new(workers, self.config.duration(), executor)
                    .with_cancellation(self.cancel.clone());
                if let Some(ramp) = ramp_up {
                    engine = engine.with_ramp_up(ramp);
                }
                engine.run(target, aggregator).await
            }
        }
    }
}
