//! # gatebench CLI
//!
//! ```bash
//! # Rate mode against every target in a config file
//! gatebench --config gateways.toml --rate 100 --duration 30
//!
//! # Concurrency mode with ramp-up, single target
//! gatebench --config gateways.toml --concurrency 50 --ramp-up 10 --target litellm
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use gatebench_core::{BenchConfig, ResultStore, TargetConfig};
use gatebench_loadtest::{
    print_comparison, target_from_config, BenchmarkOrchestrator, HttpExecutor, HttpSettings,
    MemorySampler,
};
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gatebench")]
#[command(version)]
#[command(about = "Benchmark HTTP gateways under fixed rate or fixed concurrency", long_about = None)]
struct Cli {
    /// TOML configuration file with targets and defaults
    #[arg(short, long, env = "GATEBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Requests per second (rate mode)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Concurrent in-flight requests (concurrency mode)
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,

    /// Attack duration per target in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Ramp-up in seconds, concurrency mode only
    #[arg(long)]
    ramp_up: Option<u64>,

    /// Pause between targets in seconds
    #[arg(long)]
    cooldown: Option<u64>,

    /// Result document path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only run the target with this name
    #[arg(short, long)]
    target: Option<String>,

    /// Ad-hoc target URL; replaces configured targets
    #[arg(long)]
    url: Option<String>,

    /// Name for the ad-hoc target
    #[arg(long, default_value = "target", requires = "url")]
    name: String,

    /// Local port of the ad-hoc target's server process, enables memory sampling
    #[arg(long, requires = "url")]
    port: Option<u16>,

    /// Use the long prompt in default payloads
    #[arg(long)]
    big_payload: bool,

    /// Model for the ad-hoc target, repeatable
    #[arg(long = "model", requires = "url")]
    models: Vec<String>,

    /// Memory sampling interval in milliseconds
    #[arg(long)]
    sample_interval_ms: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Skip memory sampling even when targets name a port
    #[arg(long)]
    no_memory: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BenchConfig::default(),
        };

        // Flags override the file; a mode given on the command line replaces the file's mode
        if self.rate.is_some() || self.concurrency.is_some() {
            config.rate = self.rate.unwrap_or(0);
            config.concurrency = self.concurrency.unwrap_or(0);
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        if let Some(ramp_up) = self.ramp_up {
            config.ramp_up_secs = ramp_up;
        }
        if let Some(cooldown) = self.cooldown {
            config.cooldown_secs = cooldown;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(interval) = self.sample_interval_ms {
            config.sample_interval_ms = interval;
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout_secs = timeout;
        }

        if let Some(url) = self.url {
            let mut target = TargetConfig::new(self.name, url);
            target.port = self.port;
            if !self.models.is_empty() {
                target.models = self.models;
            }
            config.targets = vec![target];
        }
        if self.big_payload {
            for target in &mut config.targets {
                target.big_payload = true;
            }
        }
        if let Some(name) = &self.target {
            config.select_target(name)?;
        }

        if config.targets.is_empty() {
            bail!("no targets configured; pass --config or --url");
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_thread_ids(false))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let no_memory = cli.no_memory;
    let config = cli.into_config()?;

    let executor = HttpExecutor::new(&HttpSettings {
        request_timeout: config.request_timeout(),
        pool_max_idle_per_host: config.pool_max_idle_per_host,
        pool_idle_timeout: config.pool_idle_timeout(),
    })?;
    let sampler = (!no_memory).then(|| MemorySampler::system(config.sample_interval()));
    let store = ResultStore::new(config.output.clone());
    let targets: Vec<_> = config
        .targets
        .iter()
        .map(|t| Arc::new(target_from_config(t)))
        .collect();

    let orchestrator =
        BenchmarkOrchestrator::new(config, Arc::new(executor), sampler, Some(store.clone()))?;
    info!(mode = %orchestrator.mode(), targets = targets.len(), "gatebench v{}", env!("CARGO_PKG_VERSION"));

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight requests finish");
            cancel.cancel();
        }
    });

    let reports = orchestrator.run(&targets).await?;

    let document = store.load();
    if reports.len() > 1 || document.len() > 1 {
        print_comparison(&document);
    }
    info!(path = %store.path().display(), "Done");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
