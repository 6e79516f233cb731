//! Single-request execution

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use gatebench_core::{BenchError, MetricsAggregator, RequestDescriptor, RequestOutcome, Result, Target};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Performs one request and classifies the outcome.
///
/// Implementations never fail: every error becomes a failed [`RequestOutcome`] carrying the
/// elapsed time up to the point of failure.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: RequestDescriptor) -> RequestOutcome;
}

/// Transport settings for [`HttpExecutor`]
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(240),
            pool_max_idle_per_host: 100_000,
            pool_idle_timeout: Duration::from_secs(10),
        }
    }
}

/// reqwest-backed executor
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .build()
            .map_err(|e| BenchError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    fn build(&self, request: RequestDescriptor) -> std::result::Result<reqwest::Request, String> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| format!("invalid method {}: {}", request.method, e))?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("invalid header name {}: {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| format!("invalid header value for {}: {}", name, e))?;
            headers.insert(name, value);
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }
        builder
            .build()
            .map_err(|e| format!("failed to create http request: {}", e))
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: RequestDescriptor) -> RequestOutcome {
        let start = Instant::now();

        let http_request = match self.build(request) {
            Ok(req) => req,
            Err(reason) => return RequestOutcome::transport_failure(reason, start.elapsed()),
        };

        let response = match self.client.execute(http_request).await {
            Ok(response) => response,
            Err(e) => {
                return RequestOutcome::transport_failure(
                    format!("request failed: {}", e),
                    start.elapsed(),
                )
            }
        };

        let status = response.status().as_u16();
        // Drain the body so the connection returns to the pool and latency covers the full exchange
        match response.bytes().await {
            Ok(_) => RequestOutcome::from_status(status, start.elapsed()),
            Err(e) => RequestOutcome::transport_failure(
                format!("response read failed: {}", e),
                start.elapsed(),
            ),
        }
    }
}

/// Produce, execute and record one request for `target`.
///
/// Exactly one outcome is recorded per call, including when the provider fails or the
/// executor panics.
pub async fn run_one(
    executor: Arc<dyn RequestExecutor>,
    target: Arc<Target>,
    aggregator: Arc<MetricsAggregator>,
) {
    let start = Instant::now();

    let outcome = match target.next_request() {
        Ok(request) => {
            match AssertUnwindSafe(executor.execute(request)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(target_name = target.name(), "Request executor panicked");
                    RequestOutcome::transport_failure("executor panicked", start.elapsed())
                }
            }
        }
        Err(e) => {
            debug!(target_name = target.name(), "Request generation failed: {}", e);
            RequestOutcome::transport_failure(e.to_string(), start.elapsed())
        }
    };

    aggregator.record(outcome);
}
