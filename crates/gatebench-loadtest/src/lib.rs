//! # gatebench load generation
//!
//! Benchmarks HTTP gateways one after another under either a fixed request rate or a fixed
//! number of in-flight requests, sampling the memory of the gateway process while the
//! attack runs and merging each target's summary into a shared JSON result file.
//!
//! ## Modules
//!
//! - [`rate`] - fixed-frequency emission with a hard attack deadline
//! - [`concurrency`] - fixed in-flight requests with optional linear ramp-up
//! - [`sampler`] - port-to-process resolution and periodic RSS sampling
//! - [`executor`] - reqwest transport and single-request classification
//! - [`provider`] - templated request bodies and header credentials
//! - [`orchestrator`] - sequential per-target lifecycle and persistence
//! - [`report`] - console output
//!
//! ## Usage
//!
//! ```bash
//! # 100 req/s for 30 seconds against every configured target
//! gatebench --config gateways.toml --rate 100 --duration 30
//!
//! # 50 concurrent requests, ramped over 10 seconds, one target only
//! gatebench --config gateways.toml --concurrency 50 --ramp-up 10 --target bifrost
//!
//! # Ad-hoc target without a config file
//! gatebench --url http://localhost:8080/v1/chat/completions --name bifrost --port 8080 --rate 20
//! ```

use std::time::Duration;

pub mod concurrency;
pub mod executor;
pub mod orchestrator;
pub mod provider;
pub mod rate;
pub mod report;
pub mod sampler;

pub use concurrency::{ramp_target, ConcurrencyModeEngine, WorkerProgress};
pub use executor::{run_one, HttpExecutor, HttpSettings, RequestExecutor};
pub use orchestrator::{BenchmarkOrchestrator, RunPhase, TargetReport};
pub use provider::{target_from_config, TemplateProvider};
pub use rate::RateModeEngine;
pub use report::{print_comparison, print_report};
pub use sampler::{MemorySampler, PortResolver, ProcNetResolver, MemoryReader, SamplerHandle, SysinfoReader};

/// What an engine did during one attack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttackReport {
    /// Requests handed to the executor
    pub emitted: u64,
    /// Wall time from start until the last request was recorded
    pub elapsed: Duration,
    /// Whether the attack deadline cut emission or draining short
    pub timed_out: bool,
    /// Workers started; 0 in rate mode
    pub workers_started: usize,
}
