//! Outcome aggregation.
//!
//! [`MetricsAggregator`] is the only shared mutable state the load engines touch: every
//! worker calls [`MetricsAggregator::record`] once per request, and the orchestrator takes
//! a [`MetricsAggregator::snapshot`] after the engine has joined all of its tasks.
//! [`summarize`] then reduces a snapshot plus the memory samples into a [`RunSummary`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tracing::warn;

use crate::types::{MemorySample, RequestOutcome, RunSummary, BYTES_PER_MB};

/// Drop reason recorded once when a run is cut short by its safety deadline
pub const CONTEXT_TIMEOUT: &str = "context_timeout";

/// Highest latency the histogram tracks, in microseconds (1 hour)
const HISTOGRAM_MAX_US: u64 = 3_600_000_000;

#[derive(Debug)]
struct AggregateState {
    total: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,
    status_counts: BTreeMap<String, u64>,
    drop_reasons: BTreeMap<String, u64>,
    outcomes: Vec<RequestOutcome>,
    /// Absent if the histogram could not be allocated; percentiles then report 0
    histogram: Option<Histogram<u64>>,
}

/// Lock-protected accumulator for request outcomes
#[derive(Debug)]
pub struct MetricsAggregator {
    state: Mutex<AggregateState>,
    keep_outcomes: bool,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        let histogram = match Histogram::new_with_bounds(1, HISTOGRAM_MAX_US, 3) {
            Ok(hist) => Some(hist),
            Err(e) => {
                warn!("Latency histogram unavailable, percentiles disabled: {}", e);
                None
            }
        };

        Self {
            state: Mutex::new(AggregateState {
                total: 0,
                successes: 0,
                failures: 0,
                total_latency: Duration::ZERO,
                min_latency: None,
                max_latency: Duration::ZERO,
                status_counts: BTreeMap::new(),
                drop_reasons: BTreeMap::new(),
                outcomes: Vec::new(),
                histogram,
            }),
            keep_outcomes: true,
        }
    }

    /// Aggregate counters only; individual outcomes are not retained.
    ///
    /// Long soak runs at high rates would otherwise hold every outcome in memory.
    pub fn without_outcome_log() -> Self {
        Self {
            keep_outcomes: false,
            ..Self::new()
        }
    }

    /// Record one finished request
    pub fn record(&self, outcome: RequestOutcome) {
        let latency = outcome.latency();
        let status_key = outcome.status_key();

        let mut state = self.state.lock();
        state.total += 1;
        if outcome.is_success() {
            state.successes += 1;
        } else {
            state.failures += 1;
            if let Some(reason) = outcome.failure_reason() {
                *state.drop_reasons.entry(reason.to_string()).or_insert(0) += 1;
            }
        }

        state.total_latency += latency;
        if latency > state.max_latency {
            state.max_latency = latency;
        }
        if state.min_latency.map_or(true, |min| latency < min) {
            state.min_latency = Some(latency);
        }

        *state.status_counts.entry(status_key).or_insert(0) += 1;

        if let Some(hist) = state.histogram.as_mut() {
            let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
            hist.saturating_record(micros.max(1));
        }

        if self.keep_outcomes {
            state.outcomes.push(outcome);
        }
    }

    /// Record a run-level drop reason that does not correspond to a request
    pub fn mark_aborted(&self, reason: &str) {
        let mut state = self.state.lock();
        *state.drop_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Number of outcomes recorded so far
    pub fn recorded(&self) -> u64 {
        self.state.lock().total
    }

    /// Copy the current state
    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.state.lock();
        let (p50, p99) = state
            .histogram
            .as_ref()
            .filter(|hist| !hist.is_empty())
            .map(|hist| {
                // Bucket edges can overshoot the observed extremes
                let min = state.min_latency.unwrap_or(Duration::ZERO);
                let quantile = |q: f64| {
                    Duration::from_micros(hist.value_at_quantile(q)).clamp(min, state.max_latency)
                };
                (quantile(0.50), quantile(0.99))
            })
            .unwrap_or((Duration::ZERO, Duration::ZERO));

        AggregateSnapshot {
            total: state.total,
            successes: state.successes,
            failures: state.failures,
            total_latency: state.total_latency,
            min_latency: state.min_latency.unwrap_or(Duration::ZERO),
            max_latency: state.max_latency,
            p50_latency: p50,
            p99_latency: p99,
            status_counts: state.status_counts.clone(),
            drop_reasons: state.drop_reasons.clone(),
            outcomes: state.outcomes.clone(),
        }
    }
}

/// Immutable copy of the aggregator state
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub p50_latency: Duration,
    pub p99_latency: Duration,
    pub status_counts: BTreeMap<String, u64>,
    pub drop_reasons: BTreeMap<String, u64>,
    pub outcomes: Vec<RequestOutcome>,
}

impl AggregateSnapshot {
    /// Percentage of successful requests; 0 when nothing was attempted
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 / self.total as f64 * 100.0
        }
    }

    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.total) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
            Err(_) => Duration::from_secs_f64(self.total_latency.as_secs_f64() / self.total as f64),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Peak and average RSS in MB; both 0 without samples
pub fn memory_stats(samples: &[MemorySample]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let peak = samples.iter().map(|s| s.rss_bytes).max().unwrap_or(0);
    let total: u128 = samples.iter().map(|s| s.rss_bytes as u128).sum();
    let avg = total as f64 / samples.len() as f64;
    (peak as f64 / BYTES_PER_MB, avg / BYTES_PER_MB)
}

/// Reduce a run's outcomes and memory samples into its summary
pub fn summarize(
    snapshot: &AggregateSnapshot,
    samples: &[MemorySample],
    elapsed: Duration,
    finished_at: DateTime<Utc>,
) -> RunSummary {
    let secs = elapsed.as_secs_f64();
    let per_second = |count: u64| if secs > 0.0 { count as f64 / secs } else { 0.0 };
    let (peak_mb, avg_mb) = memory_stats(samples);

    RunSummary {
        requests: snapshot.total,
        success_count: snapshot.successes,
        failure_count: snapshot.failures,
        rate: per_second(snapshot.total),
        success_rate: snapshot.success_rate(),
        mean_latency_ms: millis(snapshot.mean_latency()),
        p50_latency_ms: millis(snapshot.p50_latency),
        p99_latency_ms: millis(snapshot.p99_latency),
        min_latency_ms: millis(snapshot.min_latency),
        max_latency_ms: millis(snapshot.max_latency),
        throughput_rps: per_second(snapshot.successes),
        duration_secs: secs,
        timestamp: finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        status_code_counts: snapshot.status_counts.clone(),
        server_peak_memory_mb: peak_mb,
        server_avg_memory_mb: avg_mb,
        memory_samples: samples.len(),
        drop_reasons: snapshot.drop_reasons.clone(),
    }
}
