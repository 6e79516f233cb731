//! # gatebench core
//!
//! Data model, aggregation and persistence shared by the gatebench load engines.
//!
//! - [`types`] - targets, request outcomes, memory samples and run summaries
//! - [`aggregator`] - lock-scoped outcome accumulation and the summary reduction
//! - [`store`] - read-merge-write of the multi-target result document
//! - [`config`] - benchmark configuration and load mode selection
//!
//! ```text
//!   engine workers ──record()──► MetricsAggregator ──snapshot()──┐
//!                                                                ├─► summarize() ─► RunSummary ─► ResultStore
//!   memory sampler ──────────────── Vec<MemorySample> ───────────┘
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use aggregator::{summarize, AggregateSnapshot, MetricsAggregator, CONTEXT_TIMEOUT};
pub use config::{BenchConfig, LoadMode, TargetConfig};
pub use error::{BenchError, Result};
pub use store::{ResultDocument, ResultStore};
pub use types::*;
