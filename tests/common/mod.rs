//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use resource_scanner::config::{Config, RateLimitConfig, RetryConfig};

pub const VALID_API_KEY: &str = "valid_api_key";

/// Sample resource `res_<i>`; every third resource holds sensitive data
pub fn sample_resource(i: usize) -> Value {
    let kinds = ["storage", "compute", "network", "database"];
    let regions = ["us-east-1", "us-west-2", "eu-west-1"];
    json!({
        "id": format!("res_{}", i),
        "type": kinds[i % kinds.len()],
        "name": format!("resource_{}", i),
        "metadata": {
            "region": regions[i % regions.len()],
            "created_at": "2024-01-01"
        },
        "sensitive_data": i % 3 == 0
    })
}

/// In-process stand-in for the resource API
///
/// Serves `/health`, `/resources?page&limit` and `/resources/{id}`, checks
/// the `api-key` header and enforces its own sliding-window request quota.
pub struct MockResourceApi {
    resources: Vec<Value>,
    quota: usize,
    window: Duration,
    retry_after_secs: Option<u64>,
    failures_remaining: AtomicU32,
    history: Mutex<VecDeque<Instant>>,
    throttled: AtomicU32,
}

impl MockResourceApi {
    /// API with `count` resources and an effectively unlimited quota
    pub fn new(count: usize) -> Self {
        Self {
            resources: (1..=count).map(sample_resource).collect(),
            quota: usize::MAX,
            window: Duration::from_secs(60),
            retry_after_secs: None,
            failures_remaining: AtomicU32::new(0),
            history: Mutex::new(VecDeque::new()),
            throttled: AtomicU32::new(0),
        }
    }

    /// Server-side quota; excess requests get 429
    pub fn with_rate_limit(mut self, quota: usize, window: Duration) -> Self {
        self.quota = quota;
        self.window = window;
        self
    }

    /// Retry-After seconds sent with every 429
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Answer the first `n` authenticated requests with 500
    pub fn with_failures(self, n: u32) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Number of 429 responses sent so far
    pub fn throttled(&self) -> u32 {
        self.throttled.load(Ordering::SeqCst)
    }

    fn admit(&self) -> bool {
        let mut history = self.history.lock().unwrap();
        let now = Instant::now();
        while let Some(oldest) = history.front() {
            if now.duration_since(*oldest) >= self.window {
                history.pop_front();
            } else {
                break;
            }
        }
        if history.len() >= self.quota {
            return false;
        }
        history.push_back(now);
        true
    }

    fn list(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str, default: usize| {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.parse::<usize>().ok())
                .unwrap_or(default)
        };
        let page = param("page", 1);
        let limit = param("limit", 10);

        let total_items = self.resources.len();
        let total_pages = (total_items + limit - 1) / limit;
        if page == 0 || page > total_pages {
            return ResponseTemplate::new(404).set_body_json(json!({"detail": "Page not found"}));
        }

        let start = (page - 1) * limit;
        let end = (start + limit).min(total_items);
        ResponseTemplate::new(200).set_body_json(json!({
            "resources": &self.resources[start..end],
            "page": page,
            "total_pages": total_pages,
            "total_items": total_items
        }))
    }

    fn get(&self, id: &str) -> ResponseTemplate {
        match self.resources.iter().find(|r| r["id"] == id) {
            Some(resource) => ResponseTemplate::new(200).set_body_json(resource),
            None => {
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Resource not found"}))
            }
        }
    }
}

impl Respond for MockResourceApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path().to_string();
        if path == "/health" {
            return ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"}));
        }

        let api_key = request
            .headers
            .get("api-key")
            .and_then(|v| v.to_str().ok());
        if api_key != Some(VALID_API_KEY) {
            return ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid API key"}));
        }

        if !self.admit() {
            self.throttled.fetch_add(1, Ordering::SeqCst);
            let template = ResponseTemplate::new(429)
                .set_body_json(json!({"detail": "Rate limit exceeded"}));
            return match self.retry_after_secs {
                Some(secs) => template.insert_header("Retry-After", secs.to_string().as_str()),
                None => template,
            };
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return ResponseTemplate::new(500)
                .set_body_json(json!({"detail": "Internal server error"}));
        }

        match path.strip_prefix("/resources") {
            Some("") => self.list(request),
            Some(rest) if rest.starts_with('/') => self.get(&rest[1..]),
            _ => ResponseTemplate::new(404).set_body_json(json!({"detail": "Not Found"})),
        }
    }
}

/// Start a mock server answering every request with `api`
pub async fn start_mock_api(api: MockResourceApi) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any()).respond_with(api).mount(&server).await;
    server
}

/// Configuration pointing at `base_url` with fast retries
pub fn create_test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.client.base_url = base_url.to_string();
    config.client.api_key = Some(VALID_API_KEY.to_string());
    config.client.request_timeout_ms = 5_000;
    config.rate_limit = RateLimitConfig {
        quota: 1_000,
        window_ms: 60_000,
    };
    config.retry = RetryConfig {
        max_attempts: 5,
        base_delay_ms: 20,
        max_delay_ms: 200,
        max_total_delay_ms: None,
        max_retry_after_ms: 60_000,
        jitter: false,
    };
    config
}
