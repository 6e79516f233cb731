//! Benchmark configuration types

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Complete benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Requests per second (rate mode); 0 disables rate mode
    pub rate: u32,

    /// Concurrent in-flight requests (concurrency mode); 0 disables concurrency mode
    pub concurrency: usize,

    /// Attack duration per target in seconds
    pub duration_secs: u64,

    /// Linear ramp-up from 1 to `concurrency` workers, in seconds; 0 starts all at once
    pub ramp_up_secs: u64,

    /// Pause between targets in seconds
    pub cooldown_secs: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Hard ceiling on one target's attack, in seconds
    pub max_attack_secs: u64,

    /// Upper bound on simultaneously executing requests in rate mode
    pub max_in_flight: usize,

    /// Memory sampling interval in milliseconds
    pub sample_interval_ms: u64,

    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds
    pub pool_idle_timeout_secs: u64,

    /// Result document path
    pub output: PathBuf,

    /// Targets to benchmark, in order
    pub targets: Vec<TargetConfig>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            rate: 0,
            concurrency: 0,
            duration_secs: 10,
            ramp_up_secs: 0,
            cooldown_secs: 60,
            request_timeout_secs: 240,
            max_attack_secs: 240,
            max_in_flight: 10_000,
            sample_interval_ms: 100,
            pool_max_idle_per_host: 100_000,
            pool_idle_timeout_secs: 10,
            output: PathBuf::from("results.json"),
            targets: Vec::new(),
        }
    }
}

/// Selected load generation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Fixed emission rate
    Rate { rps: u32 },
    /// Fixed number of in-flight requests, optionally ramped
    Concurrency {
        workers: usize,
        ramp_up: Option<Duration>,
    },
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadMode::Rate { rps } => write!(f, "rate {} req/s", rps),
            LoadMode::Concurrency {
                workers,
                ramp_up: Some(ramp),
            } => write!(f, "concurrency {} (ramp-up {:?})", workers, ramp),
            LoadMode::Concurrency { workers, .. } => write!(f, "concurrency {}", workers),
        }
    }
}

impl BenchConfig {
    /// Load from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| BenchError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_attack(&self) -> Duration {
        Duration::from_secs(self.max_attack_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    /// Resolve the load mode: exactly one of rate and concurrency must be set
    pub fn mode(&self) -> Result<LoadMode> {
        match (self.rate, self.concurrency) {
            (0, 0) => Err(BenchError::NoLoadMode),
            (rate, 0) => Ok(LoadMode::Rate { rps: rate }),
            (0, workers) => {
                let ramp_up = (self.ramp_up_secs > 0).then(|| Duration::from_secs(self.ramp_up_secs));
                Ok(LoadMode::Concurrency { workers, ramp_up })
            }
            (rate, concurrency) => Err(BenchError::ConflictingModes { rate, concurrency }),
        }
    }

    /// Check every setting; called before any target runs
    pub fn validate(&self) -> Result<LoadMode> {
        let mode = self.mode()?;

        if self.duration_secs == 0 {
            return Err(BenchError::InvalidConfig("duration must be greater than 0".into()));
        }
        if self.ramp_up_secs > self.duration_secs {
            return Err(BenchError::InvalidConfig(format!(
                "ramp-up ({}s) must not exceed duration ({}s)",
                self.ramp_up_secs, self.duration_secs
            )));
        }
        if self.ramp_up_secs > 0 && self.rate > 0 {
            return Err(BenchError::InvalidConfig(
                "ramp-up only applies to concurrency mode".into(),
            ));
        }
        if self.sample_interval_ms == 0 {
            return Err(BenchError::InvalidConfig("sample interval must be greater than 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(BenchError::InvalidConfig("request timeout must be greater than 0".into()));
        }
        if self.max_in_flight == 0 {
            return Err(BenchError::InvalidConfig("max_in_flight must be greater than 0".into()));
        }
        if self.max_attack_secs == 0 {
            return Err(BenchError::InvalidConfig("max_attack_secs must be greater than 0".into()));
        }
        for target in &self.targets {
            target.validate()?;
        }

        Ok(mode)
    }

    /// Keep only the target named `name` (case-insensitive)
    pub fn select_target(&mut self, name: &str) -> Result<()> {
        let available: Vec<String> = self.targets.iter().map(|t| t.name.to_lowercase()).collect();
        self.targets.retain(|t| t.name.eq_ignore_ascii_case(name));
        if self.targets.is_empty() {
            return Err(BenchError::UnknownTarget {
                name: name.to_string(),
                available,
            });
        }
        self.targets.truncate(1);
        Ok(())
    }
}

/// One endpoint to benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    pub url: String,

    /// Local port of the server process to sample; omit if it runs elsewhere
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_method")]
    pub method: String,

    /// Extra headers; values may reference environment variables as `${NAME}`
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body template. Supports `#{request_index}`, `#{timestamp}` and `#{model}`.
    /// Defaults to a chat-completions payload.
    #[serde(default)]
    pub body: Option<String>,

    /// Models substituted for `#{model}`, one picked at random per request
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Use the long analysis prompt in the default payload
    #[serde(default)]
    pub big_payload: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_models() -> Vec<String> {
    vec!["openai/gpt-4o-mini".to_string()]
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            port: None,
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            models: default_models(),
            big_payload: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::InvalidConfig("target name must not be empty".into()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(BenchError::InvalidConfig(format!(
                "target '{}' has a non-HTTP url: {}",
                self.name, self.url
            )));
        }
        if self.models.is_empty() {
            return Err(BenchError::InvalidConfig(format!(
                "target '{}' needs at least one model",
                self.name
            )));
        }
        Ok(())
    }
}
