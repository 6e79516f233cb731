//! Fixed-concurrency load generation with optional linear ramp-up.
//!
//! Every started worker contributes one dispatcher task and one permit to the admission
//! gate. Dispatchers loop acquiring a permit and spawning a detached task that performs a
//! single request while holding it, so the number of requests executing at once never
//! exceeds the number of started workers, which never exceeds the configured concurrency.
//!
//! ```text
//!   ramp scheduler ──start_worker()──► +1 permit, +1 dispatcher
//!                                             │ acquire_owned()
//!                                             ▼
//!                                   request task (holds permit) ──► run_one() ──► aggregator
//! ```
//!
//! Every task is spawned on one [`TaskTracker`]; `run` returns only after it drains.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatebench_core::{MetricsAggregator, Target};
use tokio::sync::Semaphore;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::executor::{run_one, RequestExecutor};
use crate::AttackReport;

/// Ramp scheduler tick
pub const RAMP_TICK: Duration = Duration::from_millis(100);

/// Number of workers that should be running `elapsed` into a ramp of length `ramp`
pub fn ramp_target(workers: usize, elapsed: Duration, ramp: Duration) -> usize {
    let workers = workers.max(1);
    if ramp.is_zero() || elapsed >= ramp {
        return workers;
    }
    let target = (workers as f64 * elapsed.as_secs_f64() / ramp.as_secs_f64()).floor() as usize;
    target.clamp(1, workers)
}

/// Live counters for an in-progress run
#[derive(Debug, Default)]
pub struct WorkerProgress {
    started: AtomicUsize,
    admitted: AtomicU64,
}

impl WorkerProgress {
    /// Workers started so far
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Requests admitted through the gate so far
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::SeqCst)
    }
}

/// Keeps up to N requests in flight for a fixed duration
pub struct ConcurrencyModeEngine {
    concurrency: usize,
    duration: Duration,
    ramp_up: Option<Duration>,
    tick: Duration,
    executor: Arc<dyn RequestExecutor>,
    cancel: CancellationToken,
    progress: Arc<WorkerProgress>,
}

impl ConcurrencyModeEngine {
    pub fn new(concurrency: usize, duration: Duration, executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            duration,
            ramp_up: None,
            tick: RAMP_TICK,
            executor,
            cancel: CancellationToken::new(),
            progress: Arc::new(WorkerProgress::default()),
        }
    }

    /// Grow from 1 to N workers linearly over `ramp_up`
    pub fn with_ramp_up(mut self, ramp_up: Duration) -> Self {
        self.ramp_up = (!ramp_up.is_zero()).then_some(ramp_up.min(self.duration));
        self
    }

    /// Abort early when `cancel` fires; in-flight requests still complete
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> Arc<WorkerProgress> {
        Arc::clone(&self.progress)
    }

    /// Run the attack; returns after every dispatcher and request task has finished
    pub async fn run(&self, target: Arc<Target>, aggregator: Arc<MetricsAggregator>) -> AttackReport {
        info!(
            target_name = target.name(),
            concurrency = self.concurrency,
            duration_secs = self.duration.as_secs_f64(),
            ramp_up_secs = self.ramp_up.map(|r| r.as_secs_f64()),
            "Starting concurrency attack"
        );

        let start = Instant::now();
        let cancel = self.cancel.child_token();
        let tracker = TaskTracker::new();

        let pool = WorkerPool {
            limit: self.concurrency,
            gate: Arc::new(Semaphore::new(0)),
            tracker: tracker.clone(),
            cancel: cancel.clone(),
            executor: Arc::clone(&self.executor),
            target: Arc::clone(&target),
            aggregator,
            progress: Arc::clone(&self.progress),
        };

        match self.ramp_up {
            Some(ramp) => {
                tracker.spawn(pool.clone().ramp(start, ramp, self.tick));
            }
            None => {
                while pool.start_worker() {}
            }
        }

        tokio::select! {
            _ = sleep(self.duration) => {}
            _ = cancel.cancelled() => info!(target_name = target.name(), "Concurrency attack cancelled"),
        }
        cancel.cancel();

        debug!(target_name = target.name(), in_flight = tracker.len(), "Deadline reached, draining");
        tracker.close();
        tracker.wait().await;

        let elapsed = start.elapsed();
        let emitted = self.progress.admitted();
        info!(
            target_name = target.name(),
            emitted,
            workers = self.progress.started(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Concurrency attack complete"
        );

        AttackReport {
            emitted,
            elapsed,
            timed_out: false,
            workers_started: self.progress.started(),
        }
    }
}

#[derive(Clone)]
struct WorkerPool {
    limit: usize,
    gate: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    executor: Arc<dyn RequestExecutor>,
    target: Arc<Target>,
    aggregator: Arc<MetricsAggregator>,
    progress: Arc<WorkerProgress>,
}

impl WorkerPool {
    /// Add one admission slot and its dispatcher; false once the limit is reached
    fn start_worker(&self) -> bool {
        let claimed = self
            .progress
            .started
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.limit).then_some(n + 1));
        if claimed.is_err() {
            return false;
        }
        self.gate.add_permits(1);
        self.tracker.spawn(self.clone().dispatch());
        true
    }

    async fn ramp(self, start: Instant, ramp: Duration, tick: Duration) {
        self.start_worker();

        let mut ticker = interval_at(start + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let elapsed = start.elapsed();
                    let wanted = ramp_target(self.limit, elapsed, ramp);
                    while self.progress.started() < wanted && self.start_worker() {}
                    debug!(workers = self.progress.started(), wanted, "Ramp-up tick");
                    if elapsed >= ramp {
                        return;
                    }
                }
            }
        }
    }

    async fn dispatch(self) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            if self.cancel.is_cancelled() {
                return;
            }

            self.progress.admitted.fetch_add(1, Ordering::SeqCst);
            let executor = Arc::clone(&self.executor);
            let target = Arc::clone(&self.target);
            let aggregator = Arc::clone(&self.aggregator);
            self.tracker.spawn(async move {
                // Released on every exit path, including unwinding
                let _permit = permit;
                run_one(executor, target, aggregator).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gatebench_core::{FixedRequest, RequestDescriptor, RequestOutcome};

    struct DelayExecutor {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl DelayExecutor {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn max(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
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
            RequestOutcome::from_status(200, start.elapsed())
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

    #[test]
    fn test_ramp_target() {
        let ramp = Duration::from_secs(10);
        assert_eq!(ramp_target(10, Duration::ZERO, ramp), 1);
        assert_eq!(ramp_target(10, Duration::from_millis(500), ramp), 1);
        assert_eq!(ramp_target(10, Duration::from_secs(3), ramp), 3);
        assert_eq!(ramp_target(10, Duration::from_millis(9_999), ramp), 9);
        assert_eq!(ramp_target(10, ramp, ramp), 10);
        assert_eq!(ramp_target(10, Duration::from_secs(60), ramp), 10);
        assert_eq!(ramp_target(4, Duration::from_secs(1), Duration::ZERO), 4);
        assert_eq!(ramp_target(0, Duration::ZERO, ramp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency() {
        for n in [1usize, 3, 8] {
            let executor = DelayExecutor::new(Duration::from_millis(7));
            let engine = ConcurrencyModeEngine::new(n, Duration::from_millis(500), executor.clone());
            let aggregator = Arc::new(MetricsAggregator::new());

            let report = engine.run(target(), Arc::clone(&aggregator)).await;

            assert!(executor.max() <= n, "n={} max={}", n, executor.max());
            assert_eq!(executor.max(), n);
            assert_eq!(report.workers_started, n);
            assert_eq!(aggregator.snapshot().total, report.emitted);
            assert_eq!(executor.in_flight.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_state_throughput() {
        let executor = DelayExecutor::new(Duration::from_millis(10));
        let engine = ConcurrencyModeEngine::new(10, Duration::from_secs(2), executor.clone());
        let aggregator = Arc::new(MetricsAggregator::new());

        let report = engine.run(target(), Arc::clone(&aggregator)).await;

        let snapshot = aggregator.snapshot();
        assert!((1900..=2010).contains(&snapshot.total), "total {}", snapshot.total);
        assert_eq!(snapshot.success_rate(), 100.0);
        let mean = snapshot.mean_latency();
        assert!(mean >= Duration::from_millis(10) && mean < Duration::from_millis(12), "mean {:?}", mean);
        // Outstanding requests finish after the deadline without being aborted
        assert!(report.elapsed < Duration::from_millis(2_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_checkpoints() {
        let executor = DelayExecutor::new(Duration::from_millis(50));
        let engine = ConcurrencyModeEngine::new(10, Duration::from_secs(2), executor.clone())
            .with_ramp_up(Duration::from_secs(1));
        let progress = engine.progress();
        let aggregator = Arc::new(MetricsAggregator::new());
        let start = Instant::now();

        let run = tokio::spawn(async move { engine.run(target(), aggregator).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(progress.started(), 1);

        for (at_ms, expected) in [(250u64, 2usize), (550, 5), (850, 8), (1_050, 10)] {
            tokio::time::sleep_until(start + Duration::from_millis(at_ms)).await;
            let started = progress.started();
            assert!(
                started + 1 >= expected && started <= expected + 1,
                "at {}ms expected ~{} workers, got {}",
                at_ms,
                expected,
                started
            );
            assert!(executor.in_flight.load(Ordering::SeqCst) <= started);
        }

        let report = run.await.unwrap();
        assert_eq!(report.workers_started, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation() {
        let executor = DelayExecutor::new(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let engine = ConcurrencyModeEngine::new(4, Duration::from_secs(60), executor.clone())
            .with_cancellation(cancel.clone());
        let aggregator = Arc::new(MetricsAggregator::new());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let report = engine.run(target(), Arc::clone(&aggregator)).await;
        canceller.await.unwrap();

        assert!(report.elapsed < Duration::from_millis(400));
        assert_eq!(aggregator.snapshot().total, report.emitted);
        assert_eq!(executor.in_flight.load(Ordering::SeqCst), 0);
    }
}
