//! Benchmark data model: targets, per-request outcomes, memory samples and run summaries

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// TARGETS
// ============================================================================

/// A fully formed outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestDescriptor {
    /// POST with a JSON body
    pub fn post_json(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.into(),
        }
    }

    /// Plain GET
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

/// Produces one request per call.
///
/// Called concurrently from many workers. A failure (for example a missing credential)
/// becomes a failed outcome for that request only.
pub trait RequestProvider: Send + Sync {
    fn next_request(&self) -> Result<RequestDescriptor>;
}

/// A provider that replays the same request every time
#[derive(Debug, Clone)]
pub struct FixedRequest(pub RequestDescriptor);

impl RequestProvider for FixedRequest {
    fn next_request(&self) -> Result<RequestDescriptor> {
        Ok(self.0.clone())
    }
}

/// A named endpoint to benchmark
#[derive(Clone)]
pub struct Target {
    name: String,
    url: String,
    port: Option<u16>,
    provider: Arc<dyn RequestProvider>,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        port: Option<u16>,
        provider: Arc<dyn RequestProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            port,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Local listening port, if the target process can be monitored
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Key under which this target's summary is persisted
    pub fn result_key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn next_request(&self) -> Result<RequestDescriptor> {
        self.provider.next_request()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Result of one attempted request.
///
/// Success is derived, never stored: a 2xx status with no failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    status: u16,
    latency: Duration,
    failure: Option<String>,
}

impl RequestOutcome {
    /// Outcome of a request that produced an HTTP response
    pub fn from_status(status: u16, latency: Duration) -> Self {
        let failure = if (200..300).contains(&status) {
            None
        } else {
            Some(format!("HTTP {}", status))
        };
        Self {
            status,
            latency,
            failure,
        }
    }

    /// Outcome of a request that never produced a response
    pub fn transport_failure(reason: impl Into<String>, latency: Duration) -> Self {
        Self {
            status: 0,
            latency,
            failure: Some(reason.into()),
        }
    }

    /// Status code, 0 for transport-level failures
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.failure.is_none()
    }

    /// Key for the status histogram: the code, or the failure reason when no response came back
    pub fn status_key(&self) -> String {
        match (&self.failure, self.status) {
            (Some(reason), 0) => reason.clone(),
            _ => self.status.to_string(),
        }
    }
}

// ============================================================================
// MEMORY SAMPLES
// ============================================================================

/// Point-in-time memory footprint of the monitored server process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Monotonic offset from sampler start
    pub offset: Duration,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// Resident set size in bytes
    pub rss_bytes: u64,
    /// Virtual memory size in bytes
    pub vms_bytes: u64,
    /// RSS as a percentage of total system memory
    pub mem_percent: f64,
}

pub(crate) const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ============================================================================
// RUN SUMMARY
// ============================================================================

/// Reduced view of one target's run, in the persisted result schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total requests attempted
    pub requests: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    /// Attempted requests per second
    pub rate: f64,
    /// Percentage of successful requests, 0 when nothing was attempted
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    #[serde(default)]
    pub p50_latency_ms: f64,
    #[serde(default)]
    pub p99_latency_ms: f64,
    #[serde(default)]
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Successful requests per second
    pub throughput_rps: f64,
    #[serde(default)]
    pub duration_secs: f64,
    /// RFC 3339 completion time
    pub timestamp: String,
    pub status_code_counts: BTreeMap<String, u64>,
    pub server_peak_memory_mb: f64,
    pub server_avg_memory_mb: f64,
    #[serde(default)]
    pub memory_samples: usize,
    pub drop_reasons: BTreeMap<String, u64>,
}

impl RunSummary {
    pub fn has_memory_data(&self) -> bool {
        self.memory_samples > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_derivation() {
        let ok = RequestOutcome::from_status(200, Duration::from_millis(10));
        assert!(ok.is_success());
        assert_eq!(ok.failure_reason(), None);

        let created = RequestOutcome::from_status(204, Duration::from_millis(1));
        assert!(created.is_success());

        let redirect = RequestOutcome::from_status(302, Duration::from_millis(1));
        assert!(!redirect.is_success());
        assert_eq!(redirect.failure_reason(), Some("HTTP 302"));

        let server_error = RequestOutcome::from_status(500, Duration::from_millis(3));
        assert!(!server_error.is_success());
        assert_eq!(server_error.failure_reason(), Some("HTTP 500"));
        assert_eq!(server_error.status_key(), "500");
    }

    #[test]
    fn test_transport_failure_keys_by_reason() {
        let outcome = RequestOutcome::transport_failure("connection refused", Duration::ZERO);
        assert_eq!(outcome.status(), 0);
        assert!(!outcome.is_success());
        assert_eq!(outcome.status_key(), "connection refused");
    }

    #[test]
    fn test_target_result_key_is_lowercase() {
        let target = Target::new(
            "Bifrost",
            "http://localhost:8080/v1/chat/completions",
            Some(8080),
            Arc::new(FixedRequest(RequestDescriptor::get("http://localhost:8080"))),
        );
        assert_eq!(target.result_key(), "bifrost");
        assert_eq!(target.port(), Some(8080));
        assert_eq!(target.next_request().unwrap().method, "GET");
    }

    #[test]
    fn test_summary_tolerates_older_documents() {
        let json = r#"{
            "requests": 10,
            "rate": 5.0,
            "success_rate": 100.0,
            "mean_latency_ms": 12.5,
            "max_latency_ms": 30.0,
            "throughput_rps": 5.0,
            "timestamp": "2024-05-01T10:00:00Z",
            "status_code_counts": {"200": 10},
            "server_peak_memory_mb": 0.0,
            "server_avg_memory_mb": 0.0,
            "drop_reasons": {}
        }"#;
        let summary: RunSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.requests, 10);
        assert_eq!(summary.p99_latency_ms, 0.0);
        assert!(!summary.has_memory_data());
    }
}
