//! Fixed-rate load generation.
//!
//! An emitter ticks every `1 / rate` seconds and hands each request to a freshly spawned
//! task. Execution is bounded by an admission semaphore of `max_in_flight` permits; the
//! emitter never waits on it, so a slow target cannot delay the next emission slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatebench_core::{MetricsAggregator, Target, CONTEXT_TIMEOUT};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::{run_one, RequestExecutor};
use crate::AttackReport;

/// Emits requests at a fixed frequency for a bounded duration
pub struct RateModeEngine {
    rate: u32,
    duration: Duration,
    max_attack: Duration,
    max_in_flight: usize,
    executor: Arc<dyn RequestExecutor>,
    cancel: CancellationToken,
}

impl RateModeEngine {
    pub fn new(rate: u32, duration: Duration, executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            rate: rate.max(1),
            duration,
            max_attack: Duration::from_secs(240),
            max_in_flight: 10_000,
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop emitting early when `cancel` fires; in-flight requests still complete
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Hard ceiling on emission plus draining
    pub fn with_max_attack(mut self, max_attack: Duration) -> Self {
        self.max_attack = max_attack;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate as f64)
    }

    /// Run the attack; returns once every admitted request has been recorded.
    ///
    /// Requests still waiting for a slot when the hard deadline passes or the attack is
    /// cancelled are dropped without being sent.
    pub async fn run(&self, target: Arc<Target>, aggregator: Arc<MetricsAggregator>) -> AttackReport {
        info!(
            target_name = target.name(),
            rate = self.rate,
            duration_secs = self.duration.as_secs_f64(),
            "Starting rate attack"
        );

        let start = Instant::now();
        let hard_deadline = start + self.max_attack;
        let emit_until = start + self.duration.min(self.max_attack);
        let gate = Arc::new(Semaphore::new(self.max_in_flight));

        let mut ticker = interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        // Fired at the hard deadline and on external cancellation; queued requests check it
        // before they are admitted
        let stop = self.cancel.child_token();
        let admitted = Arc::new(AtomicU64::new(0));

        let mut tasks = JoinSet::new();
        let mut queued: u64 = 0;
        let mut timed_out = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(target_name = target.name(), "Rate attack cancelled");
                    break;
                }
                _ = sleep_until(emit_until) => break,
                tick = ticker.tick() => {
                    if tick >= emit_until {
                        break;
                    }
                    tasks.spawn(admit(
                        Arc::clone(&gate),
                        stop.clone(),
                        hard_deadline,
                        Arc::clone(&admitted),
                        Arc::clone(&self.executor),
                        Arc::clone(&target),
                        Arc::clone(&aggregator),
                    ));
                    queued += 1;
                }
            }

            // Reap finished tasks so the set does not grow with the run
            while let Some(joined) = tasks.try_join_next() {
                log_join_error(joined);
            }
        }

        if self.duration > self.max_attack && !self.cancel.is_cancelled() {
            warn!(target_name = target.name(), "Attack timed out before its configured duration");
            timed_out = true;
            stop.cancel();
        }

        debug!(target_name = target.name(), in_flight = tasks.len(), "Emission finished, draining");
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => log_join_error(joined),
                    None => break,
                },
                _ = sleep_until(hard_deadline), if !timed_out => {
                    warn!(
                        target_name = target.name(),
                        in_flight = tasks.len(),
                        "Attack timed out while requests were in flight"
                    );
                    timed_out = true;
                    stop.cancel();
                }
            }
        }

        let emitted = admitted.load(Ordering::SeqCst);
        if queued > emitted {
            debug!(
                target_name = target.name(),
                abandoned = queued - emitted,
                "Queued requests dropped without being sent"
            );
        }

        if timed_out {
            aggregator.mark_aborted(CONTEXT_TIMEOUT);
        }

        let elapsed = start.elapsed();
        info!(
            target_name = target.name(),
            emitted,
            elapsed_secs = elapsed.as_secs_f64(),
            "Rate attack complete"
        );

        AttackReport {
            emitted,
            elapsed,
            timed_out,
            workers_started: 0,
        }
    }
}

/// Wait for an admission slot, then perform one request unless the attack has stopped
async fn admit(
    gate: Arc<Semaphore>,
    stop: CancellationToken,
    hard_deadline: Instant,
    admitted: Arc<AtomicU64>,
    executor: Arc<dyn RequestExecutor>,
    target: Arc<Target>,
    aggregator: Arc<MetricsAggregator>,
) {
    let permit = tokio::select! {
        biased;
        _ = stop.cancelled() => return,
        permit = gate.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    // A slot freed at the deadline can wake this task before the stop token fires
    if stop.is_cancelled() || Instant::now() >= hard_deadline {
        return;
    }

    admitted.fetch_add(1, Ordering::SeqCst);
    let _permit = permit;
    run_one(executor, target, aggregator).await;
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!("Request task failed to join: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gatebench_core::{FixedRequest, RequestDescriptor, RequestOutcome};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct DelayExecutor {
        delay: Duration,
        status: u16,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl DelayExecutor {
        fn new(delay: Duration, status: u16) -> Self {
            Self {
                delay,
                status,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RequestExecutor for DelayExecutor {
        async fn execute(&self, _request: RequestDescriptor) -> RequestOutcome {
            let start = Instant::now();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            RequestOutcome::from_status(self.status, start.elapsed())
        }
    }

    fn target() -> Arc<Target> {
        Arc::new(Target::new(
            "mock",
            "http://localhost:8000",
            None,
            Arc::new(FixedRequest(RequestDescriptor::get("http://localhost:8000"))),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_rate_times_duration() {
        let executor = Arc::new(DelayExecutor::new(Duration::from_millis(10), 200));
        let engine = RateModeEngine::new(50, Duration::from_secs(4), executor);
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        assert!((195..=201).contains(&report.emitted), "emitted {}", report.emitted);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total, report.emitted);
        assert_eq!(snapshot.successes, report.emitted);
        assert!(!report.timed_out);
        assert!(snapshot.drop_reasons.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_requests_do_not_delay_emission() {
        // Each request takes far longer than the emission interval
        let executor = Arc::new(DelayExecutor::new(Duration::from_secs(1), 200));
        let engine = RateModeEngine::new(100, Duration::from_secs(2), Arc::clone(&executor) as Arc<dyn RequestExecutor>);
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        assert!((195..=201).contains(&report.emitted), "emitted {}", report.emitted);
        assert_eq!(aggregator.snapshot().total, report.emitted);
        assert!(executor.max_in_flight.load(Ordering::SeqCst) >= 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_bound() {
        let executor = Arc::new(DelayExecutor::new(Duration::from_millis(500), 200));
        let engine = RateModeEngine::new(100, Duration::from_secs(1), Arc::clone(&executor) as Arc<dyn RequestExecutor>)
            .with_max_in_flight(5);
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 5);
        // Queued requests still run to completion after emission stops
        assert_eq!(aggregator.snapshot().total, report.emitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded() {
        let executor = Arc::new(DelayExecutor::new(Duration::from_millis(5), 500));
        let engine = RateModeEngine::new(50, Duration::from_secs(4), executor);
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        let snapshot = aggregator.snapshot();
        assert!((195..=201).contains(&snapshot.total));
        assert_eq!(snapshot.successes, 0);
        assert_eq!(snapshot.success_rate(), 0.0);
        assert_eq!(snapshot.failures, report.emitted);
        assert_eq!(snapshot.drop_reasons.get("HTTP 500"), Some(&report.emitted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_deadline_marks_context_timeout_once() {
        let executor = Arc::new(DelayExecutor::new(Duration::from_secs(3), 200));
        let engine = RateModeEngine::new(10, Duration::from_secs(5), executor)
            .with_max_attack(Duration::from_secs(2));
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        assert!(report.timed_out);
        assert!((19..=21).contains(&report.emitted), "emitted {}", report.emitted);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.drop_reasons.get(CONTEXT_TIMEOUT), Some(&1));
        // In-flight requests still finished and were counted
        assert_eq!(snapshot.total, report.emitted);
        assert_eq!(snapshot.total, snapshot.successes + snapshot.failures);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_past_hard_deadline() {
        let executor = Arc::new(DelayExecutor::new(Duration::from_secs(5), 200));
        let engine = RateModeEngine::new(10, Duration::from_secs(1), executor)
            .with_max_attack(Duration::from_secs(2));
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        assert!(report.timed_out);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.drop_reasons.get(CONTEXT_TIMEOUT), Some(&1));
        assert_eq!(snapshot.total, report.emitted);
    }

    struct StartLog {
        origin: Instant,
        delay: Duration,
        starts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl RequestExecutor for StartLog {
        async fn execute(&self, _request: RequestDescriptor) -> RequestOutcome {
            let start = Instant::now();
            self.starts.lock().push(start - self.origin);
            tokio::time::sleep(self.delay).await;
            RequestOutcome::from_status(200, start.elapsed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_requests_not_started_after_hard_deadline() {
        let executor = Arc::new(StartLog {
            origin: Instant::now(),
            delay: Duration::from_secs(1),
            starts: Mutex::new(Vec::new()),
        });
        let engine = RateModeEngine::new(10, Duration::from_secs(1), Arc::clone(&executor) as Arc<dyn RequestExecutor>)
            .with_max_attack(Duration::from_secs(2))
            .with_max_in_flight(1);
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        let starts = executor.starts.lock().clone();
        assert!(report.timed_out);
        assert!(
            starts.iter().all(|s| *s < Duration::from_secs(2)),
            "requests started at {:?}",
            starts
        );
        assert_eq!(starts.len() as u64, report.emitted);
        assert_eq!(aggregator.snapshot().total, report.emitted);
        assert!(report.elapsed <= Duration::from_secs(3), "elapsed {:?}", report.elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_drops_queued_requests() {
        let executor = Arc::new(StartLog {
            origin: Instant::now(),
            delay: Duration::from_secs(1),
            starts: Mutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let engine = RateModeEngine::new(20, Duration::from_secs(10), Arc::clone(&executor) as Arc<dyn RequestExecutor>)
            .with_max_in_flight(2)
            .with_cancellation(cancel.clone());
        let aggregator = Arc::new(MetricsAggregator::new());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            cancel.cancel();
        });
        let report = engine.run(target(), Arc::clone(&aggregator)).await;
        canceller.await.unwrap();

        let starts = executor.starts.lock().clone();
        assert!(starts.iter().all(|s| *s < Duration::from_millis(1_500)), "{:?}", starts);
        assert_eq!(aggregator.snapshot().total, report.emitted);
        assert!(report.elapsed < Duration::from_millis(2_600));
        assert!(!report.timed_out);
    }
}
