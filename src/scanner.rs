//! Resource scanner facade
//!
//! Wires configuration into the dispatch engine and exposes the scanner
//! operations: health check, single page listing, single resource lookup,
//! full scan and sensitive-resource filtering. Every call, including the
//! health check, goes through the same rate limiter and retry policy.

use crate::config::Config;
use crate::dispatch::{
    HttpTransport, RateLimiter, RawResponse, RequestExecutor, RequestSpec, RetryPolicy, Transport,
};
use crate::error::{ScanError, TransportError};
use crate::models::{HealthStatus, Resource, ResourcePage};
use crate::scan::{ResourceDescriptor, ScanOrchestrator, ScanResult};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Name of the descriptor scanned when none is configured
pub const DEFAULT_DESCRIPTOR: &str = "resources";

/// Client for the resource API
pub struct ResourceScanner {
    executor: Arc<RequestExecutor>,
    orchestrator: ScanOrchestrator,
    descriptors: Vec<ResourceDescriptor>,
}

impl ResourceScanner {
    /// Create a scanner talking HTTP to `config.client.base_url`
    pub fn new(config: &Config) -> Result<Self, ScanError> {
        config.validate()?;
        let transport = HttpTransport::new(&config.client)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a scanner over a custom transport
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, ScanError> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit)?);
        let policy = RetryPolicy::new(&config.retry)?;
        let executor = Arc::new(
            RequestExecutor::new(transport, limiter, policy)
                .with_request_timeout(config.client.request_timeout()),
        );
        let orchestrator = ScanOrchestrator::new(Arc::clone(&executor), config.scan.fan_out)?;

        let descriptors = if config.scan.descriptors.is_empty() {
            vec![ResourceDescriptor::new(
                DEFAULT_DESCRIPTOR,
                RequestSpec::get("/resources").with_query("limit", config.scan.page_size.to_string()),
            )]
        } else {
            config
                .scan
                .descriptors
                .iter()
                .map(|d| ResourceDescriptor::from_config(d, config.scan.page_size))
                .collect()
        };

        info!(
            base_url = %config.client.base_url,
            quota = config.rate_limit.quota,
            window_ms = config.rate_limit.window_ms,
            fan_out = config.scan.fan_out,
            descriptors = descriptors.len(),
            "Scanner initialized"
        );

        Ok(Self {
            executor,
            orchestrator,
            descriptors,
        })
    }

    /// Executor shared by every operation of this scanner
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// Descriptors covered by [`scan_all`](Self::scan_all)
    pub fn descriptors(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }

    /// Check whether the API reports itself healthy
    ///
    /// Failures are logged and reported as unhealthy.
    pub async fn check_health(&self) -> bool {
        match self.fetch_health().await {
            Ok(status) => {
                let healthy = status.is_healthy();
                info!(healthy = healthy, status = %status.status, "Health check result");
                healthy
            }
            Err(e) => {
                error!(error = %e, "Health check failed");
                false
            }
        }
    }

    async fn fetch_health(&self) -> Result<HealthStatus, ScanError> {
        let response = self.executor.execute(&RequestSpec::get("/health")).await?;
        decode(&response)
    }

    /// Fetch one page of the resource listing
    pub async fn list_resources(&self, page: u32, limit: u32) -> Result<ResourcePage, ScanError> {
        info!(page = page, limit = limit, "Listing resources");
        let request = RequestSpec::get("/resources")
            .with_query("page", page.to_string())
            .with_query("limit", limit.to_string());
        let response = self.executor.execute(&request).await?;
        decode(&response)
    }

    /// Fetch a single resource by id
    ///
    /// The id is sent as one percent-encoded path segment.
    pub async fn get_resource(&self, id: &str) -> Result<Resource, ScanError> {
        if matches!(id, "" | "." | "..") {
            return Err(TransportError::InvalidRequest(format!("invalid resource id '{}'", id)).into());
        }
        info!(resource_id = %id, "Fetching resource");
        let request = RequestSpec::get(format!("/resources/{}", urlencoding::encode(id)));
        let response = self.executor.execute(&request).await?;
        decode(&response)
    }

    /// Scan every configured descriptor
    pub async fn scan_all(&self) -> ScanResult {
        self.scan_all_with_cancel(CancellationToken::new()).await
    }

    /// Scan every configured descriptor until done or cancelled
    pub async fn scan_all_with_cancel(&self, cancel: CancellationToken) -> ScanResult {
        self.orchestrator
            .run_with_cancel(self.descriptors.clone(), cancel)
            .await
    }

    /// Resources of a scan flagged as holding sensitive data
    ///
    /// Items that are not resources are skipped.
    pub fn sensitive_resources(result: &ScanResult) -> Vec<Resource> {
        let resources: Vec<Resource> = result
            .resources
            .iter()
            .filter_map(|(id, item)| match serde_json::from_value(item.clone()) {
                Ok(resource) => Some(resource),
                Err(e) => {
                    debug!(id = %id, error = %e, "Skipping item that is not a resource");
                    None
                }
            })
            .collect();

        let total = resources.len();
        let sensitive: Vec<Resource> = resources.into_iter().filter(|r| r.sensitive_data).collect();
        let percentage = if total == 0 {
            0.0
        } else {
            (sensitive.len() as f64 / total as f64 * 1000.0).round() / 10.0
        };

        info!(
            sensitive_count = sensitive.len(),
            total_scanned = total,
            sensitive_percentage = percentage,
            "Sensitive scan completed"
        );
        sensitive
    }
}

fn decode<T: DeserializeOwned>(response: &RawResponse) -> Result<T, ScanError> {
    response
        .json()
        .map_err(|e| ScanError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RetryConfig};
    use crate::error::{Classification, ExecError};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        let mut config = Config::default();
        config.client.base_url = base_url.to_string();
        config.client.api_key = Some("valid_api_key".to_string());
        config.rate_limit = RateLimitConfig {
            quota: 100,
            window_ms: 60_000,
        };
        config.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            max_total_delay_ms: None,
            max_retry_after_ms: 60_000,
            jitter: false,
        };
        config
    }

    fn resource(i: u32, sensitive: bool) -> serde_json::Value {
        json!({
            "id": format!("res_{}", i),
            "type": "storage",
            "name": format!("resource_{}", i),
            "metadata": {"region": "us-east-1", "created_at": "2024-01-01"},
            "sensitive_data": sensitive
        })
    }

    // Test 1: Healthy service
    #[tokio::test]
    async fn test_check_health() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&mock_server)
            .await;

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();

        assert!(scanner.check_health().await);
    }

    // Test 2: Unreachable service is unhealthy
    #[tokio::test]
    async fn test_check_health_unreachable() {
        let mut config = test_config("http://127.0.0.1:1");
        config.retry.max_attempts = 1;
        let scanner = ResourceScanner::new(&config).unwrap();

        assert!(!scanner.check_health().await);
    }

    // Test 3: Listing sends page, limit and api key
    #[tokio::test]
    async fn test_list_resources() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources"))
            .and(query_param("page", "2"))
            .and(query_param("limit", "5"))
            .and(header("api-key", "valid_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [resource(6, false), resource(7, true)],
                "page": 2,
                "total_pages": 5,
                "total_items": 25
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();
        let page = scanner.list_resources(2, 5).await.unwrap();

        assert_eq!(page.page, 2);
        assert_eq!(page.resources.len(), 2);
        assert_eq!(page.resources[1].id, "res_7");
        assert!(!page.is_last());
    }

    // Test 4: Missing resource is rejected without retry
    #[tokio::test]
    async fn test_get_resource_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/res_999"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Resource not found"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();
        let result = scanner.get_resource("res_999").await;

        match result {
            Err(ScanError::Exec(ExecError::Rejected {
                classification,
                attempts,
            })) => {
                assert_eq!(classification, Classification::ClientError(404));
                assert_eq!(attempts, 1);
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    // Test 5: Server error is retried until success
    #[tokio::test]
    async fn test_get_resource_retries_server_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/res_1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resources/res_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(resource(1, true)))
            .mount(&mock_server)
            .await;

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();
        let resource = scanner.get_resource("res_1").await.unwrap();

        assert_eq!(resource.id, "res_1");
        assert!(resource.sensitive_data);
        assert_eq!(scanner.executor().limiter().in_window().await, 2);
    }

    // Test 6: Undecodable body
    #[tokio::test]
    async fn test_decode_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/res_1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();

        assert!(matches!(
            scanner.get_resource("res_1").await,
            Err(ScanError::Decode(_))
        ));
    }

    // Test 7: Default descriptor pages through /resources
    #[tokio::test]
    async fn test_scan_all_default_descriptor() {
        let mock_server = MockServer::start().await;
        for page in 1..=2u32 {
            let resources: Vec<_> = (1..=2).map(|i| resource((page - 1) * 2 + i, i == 1)).collect();
            Mock::given(method("GET"))
                .and(path("/resources"))
                .and(query_param("page", page.to_string()))
                .and(query_param("limit", "10"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "resources": resources,
                    "page": page,
                    "total_pages": 2,
                    "total_items": 4
                })))
                .expect(1)
                .mount(&mock_server)
                .await;
        }

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();
        assert_eq!(scanner.descriptors()[0].name, DEFAULT_DESCRIPTOR);

        let result = scanner.scan_all().await;

        assert!(result.is_complete_success());
        assert_eq!(result.resources.len(), 4);

        let sensitive = ResourceScanner::sensitive_resources(&result);
        let ids: Vec<_> = sensitive.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["res_1", "res_3"]);
    }

    // Test 8: Sensitive filter skips non-resource items
    #[test]
    fn test_sensitive_resources_skips_foreign_items() {
        let mut result = ScanResult {
            started_at: chrono::Utc::now(),
            completed_at: chrono::Utc::now(),
            resources: Default::default(),
            descriptors: Default::default(),
            cancelled: false,
        };
        result
            .resources
            .insert("resources/res_1".to_string(), resource(1, true));
        result
            .resources
            .insert("resources/res_2".to_string(), resource(2, false));
        result
            .resources
            .insert("other/#0".to_string(), json!({"unrelated": true}));

        let sensitive = ResourceScanner::sensitive_resources(&result);

        assert_eq!(sensitive.len(), 1);
        assert_eq!(sensitive[0].id, "res_1");
    }

    // Test 9: Invalid configuration is rejected
    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config("http://localhost:8000");
        config.scan.fan_out = 0;

        assert!(matches!(
            ResourceScanner::new(&config),
            Err(ScanError::Config(_))
        ));
    }

    // Test 10: Resource ids are sent as a single encoded path segment
    #[tokio::test]
    async fn test_get_resource_encodes_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resources/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(resource(7, false)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();
        let fetched = scanner.get_resource("a/b?c#d").await.unwrap();
        assert_eq!(fetched.id, "res_7");

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.query(), None);
    }

    // Test 11: Dot segments and empty ids are refused before any request
    #[tokio::test]
    async fn test_get_resource_rejects_dot_segments() {
        let mock_server = MockServer::start().await;
        let scanner = ResourceScanner::new(&test_config(&mock_server.uri())).unwrap();

        for id in ["", ".", ".."] {
            assert!(matches!(
                scanner.get_resource(id).await,
                Err(ScanError::Transport(TransportError::InvalidRequest(_)))
            ));
        }
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }
}
