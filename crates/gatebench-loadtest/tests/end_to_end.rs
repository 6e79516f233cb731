//! Full runs against local mock gateways

use std::sync::Arc;

use gatebench_core::{BenchConfig, BenchError, ResultStore, TargetConfig};
use gatebench_loadtest::{
    target_from_config, BenchmarkOrchestrator, HttpExecutor, HttpSettings, MemorySampler, RequestExecutor,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor() -> Arc<dyn RequestExecutor> {
    Arc::new(HttpExecutor::new(&HttpSettings::default()).unwrap())
}

fn config(rate: u32, concurrency: usize, duration_secs: u64) -> BenchConfig {
    BenchConfig {
        rate,
        concurrency,
        duration_secs,
        cooldown_secs: 0,
        ..Default::default()
    }
}

fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn rate_mode_against_failing_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path().join("results.json"));
    let target = TargetConfig::new("Flaky", format!("{}/v1/chat/completions", server.uri()));

    let orchestrator = BenchmarkOrchestrator::new(config(20, 0, 1), executor(), None, Some(store.clone()))
        .unwrap()
        .with_console_reports(false);
    let reports = orchestrator
        .run(&[Arc::new(target_from_config(&target))])
        .await
        .unwrap();

    let summary = &reports[0].summary;
    assert!((15..=21).contains(&summary.requests), "requests {}", summary.requests);
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(summary.throughput_rps, 0.0);
    assert_eq!(summary.drop_reasons.get("HTTP 500"), Some(&summary.requests));

    let saved = store.load().get("flaky").unwrap();
    assert_eq!(saved.requests, summary.requests);
    assert_eq!(server.received_requests().await.unwrap().len() as u64, summary.requests);
}

#[tokio::test]
async fn concurrency_mode_against_healthy_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"choices":[]}"#))
        .mount(&server)
        .await;

    let target = TargetConfig::new("healthy", server.uri());
    let orchestrator = BenchmarkOrchestrator::new(config(0, 4, 1), executor(), None, None)
        .unwrap()
        .with_console_reports(false);
    let reports = orchestrator
        .run(&[Arc::new(target_from_config(&target))])
        .await
        .unwrap();

    let summary = &reports[0].summary;
    assert!(summary.requests > 0);
    assert_eq!(summary.success_rate, 100.0);
    assert_eq!(summary.status_code_counts.get("200"), Some(&summary.requests));
    assert!(summary.min_latency_ms <= summary.p50_latency_ms);
    assert!(summary.p50_latency_ms <= summary.p99_latency_ms);
    assert!(summary.p99_latency_ms <= summary.max_latency_ms);
    assert_eq!(reports[0].attack.workers_started, 4);
}

#[tokio::test]
async fn port_without_listener_reports_no_memory() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut target = TargetConfig::new("remote", server.uri());
    target.port = Some(unused_port());

    let sampler = MemorySampler::system(std::time::Duration::from_millis(50));
    let orchestrator = BenchmarkOrchestrator::new(config(10, 0, 1), executor(), Some(sampler), None)
        .unwrap()
        .with_console_reports(false);
    let reports = orchestrator
        .run(&[Arc::new(target_from_config(&target))])
        .await
        .unwrap();

    let summary = &reports[0].summary;
    assert!(summary.requests > 0);
    assert_eq!(summary.server_peak_memory_mb, 0.0);
    assert_eq!(summary.server_avg_memory_mb, 0.0);
    assert_eq!(summary.memory_samples, 0);
}

#[tokio::test]
async fn merge_preserves_unrelated_entries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("results.json");
    let existing = r#"{"x":{"requests":7,"rate":1.0,"success_rate":100.0,"mean_latency_ms":1.0,"max_latency_ms":1.0,"throughput_rps":1.0,"timestamp":"2025-01-01T00:00:00Z","status_code_counts":{},"server_peak_memory_mb":0.0,"server_avg_memory_mb":0.0,"drop_reasons":{},"note":"kept"}}"#;
    std::fs::write(&file, existing).unwrap();

    let store = ResultStore::new(&file);
    let target = TargetConfig::new("y", server.uri());
    let orchestrator = BenchmarkOrchestrator::new(config(5, 0, 1), executor(), None, Some(store.clone()))
        .unwrap()
        .with_console_reports(false);
    orchestrator
        .run(&[Arc::new(target_from_config(&target))])
        .await
        .unwrap();

    let document = store.load();
    assert_eq!(document.names().collect::<Vec<_>>(), vec!["x", "y"]);
    let x = document.raw("x").unwrap();
    assert_eq!(x["requests"], 7);
    assert_eq!(x["note"], "kept");
    assert!(document.get("y").unwrap().requests > 0);
}

#[tokio::test]
async fn conflicting_modes_fail_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut cfg = config(10, 5, 1);
    cfg.targets = vec![TargetConfig::new("a", server.uri())];

    let err = BenchmarkOrchestrator::new(cfg, executor(), None, None).err().unwrap();
    assert!(matches!(err, BenchError::ConflictingModes { rate: 10, concurrency: 5 }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn toml_config_drives_a_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(header("x-gateway", "bench"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let toml = format!(
        r#"
concurrency = 2
duration_secs = 1
cooldown_secs = 0

[[targets]]
name = "Bifrost"
url = "{}/chat"
models = ["openai/gpt-4o-mini", "anthropic/claude-3-haiku"]

[targets.headers]
x-gateway = "bench"
"#,
        server.uri()
    );
    let config = BenchConfig::from_toml_str(&toml).unwrap();
    let targets: Vec<_> = config
        .targets
        .iter()
        .map(|t| Arc::new(target_from_config(t)))
        .collect();

    let orchestrator = BenchmarkOrchestrator::new(config, executor(), None, None)
        .unwrap()
        .with_console_reports(false);
    let reports = orchestrator.run(&targets).await.unwrap();
    assert_eq!(reports[0].name, "Bifrost");
    // Requests missing the configured header would hit the 404 fallback
    assert_eq!(reports[0].summary.success_rate, 100.0);
}
