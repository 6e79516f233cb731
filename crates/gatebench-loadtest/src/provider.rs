//! Request providers built from target configuration

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use gatebench_core::{BenchError, RequestDescriptor, RequestProvider, Result, Target, TargetConfig};
use rand::seq::SliceRandom;

const SMALL_PROMPT: &str =
    "This is a benchmark request #{request_index} at #{timestamp}. How are you?";

const BIG_PROMPT: &str = "This is a benchmark request #{request_index} at #{timestamp}. \
Please provide a comprehensive analysis of the following topics: \
1. Explain the concept of Proxy Gateway in the context of AI, including its architecture, benefits, and use cases. \
2. Discuss the role of load balancing and request routing in AI proxy gateways. \
3. Analyze the impact of caching and rate limiting on AI service performance. \
4. Describe common challenges in implementing AI proxy gateways and potential solutions. \
5. Compare different AI proxy gateway implementations and their trade-offs. \
6. What is the difference between a proxy gateway and a reverse proxy? \
7. What is the difference between a proxy gateway and a load balancer? \
8. What is the difference between a proxy gateway and a web server? \
9. What is the difference between a proxy gateway and a CDN? \
10. What is the difference between a proxy gateway and a firewall? \
11. What is the difference between a proxy gateway and a VPN? \
12. What is the difference between a proxy gateway and a WAF? \
13. What is the difference between a proxy gateway and a DDoS protection service? \
14. What is the difference between a proxy gateway and a DNS server? \
15. What is the difference between a proxy gateway and a web application firewall? \
16. What is the difference between a proxy gateway and a load balancer? \
17. What is the difference between a proxy gateway and a web server? \
18. What is the difference between a proxy gateway and a CDN? \
19. What is the difference between a proxy gateway and a firewall? \
20. What is the difference between a proxy gateway and a VPN? \
Please provide detailed explanations with examples and technical details for each point. ";

/// Default chat-completions body for a prompt
fn chat_body(prompt: &str) -> String {
    serde_json::json!({
        "model": "#{model}",
        "messages": [{ "role": "user", "content": prompt }],
    })
    .to_string()
}

/// Produces requests from a body template, substituting per-request placeholders.
///
/// `#{request_index}` counts from 1 per provider, `#{timestamp}` is RFC 3339 and
/// `#{model}` is drawn uniformly from the configured models. Header values may reference
/// environment variables as `${NAME}`; an unset variable fails that request.
#[derive(Debug)]
pub struct TemplateProvider {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body_template: String,
    models: Vec<String>,
    counter: AtomicU64,
    env: BTreeMap<String, String>,
}

impl TemplateProvider {
    pub fn from_config(config: &TargetConfig) -> Self {
        let body_template = config.body.clone().unwrap_or_else(|| {
            chat_body(if config.big_payload { BIG_PROMPT } else { SMALL_PROMPT })
        });

        let mut headers: Vec<(String, String)> = config
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !body_template.is_empty()
            && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        Self {
            method: config.method.to_uppercase(),
            url: config.url.clone(),
            headers,
            body_template,
            models: config.models.clone(),
            counter: AtomicU64::new(0),
            env: BTreeMap::new(),
        }
    }

    /// Resolve `${NAME}` references from this map before the process environment
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
    }

    fn expand_env(&self, value: &str) -> Result<String> {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| BenchError::RequestGeneration(format!("unterminated ${{ in header value: {}", value)))?;
            let name = &after[..end];
            let resolved = self
                .lookup(name)
                .ok_or_else(|| BenchError::RequestGeneration(format!("{} is not set", name)))?;
            out.push_str(&resolved);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl RequestProvider for TemplateProvider {
    fn next_request(&self) -> Result<RequestDescriptor> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let model = self
            .models
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default();

        let body = self
            .body_template
            .replace("#{request_index}", &index.to_string())
            .replace("#{timestamp}", &timestamp)
            .replace("#{model}", model);

        let headers = self
            .headers
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.expand_env(v)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(RequestDescriptor {
            method: self.method.clone(),
            url: self.url.clone(),
            headers,
            body: body.into_bytes(),
        })
    }
}

/// Build a runnable target from its configuration
pub fn target_from_config(config: &TargetConfig) -> Target {
    Target::new(
        config.name.clone(),
        config.url.clone(),
        config.port,
        Arc::new(TemplateProvider::from_config(config)),
    )
}
