//! Rate-limited HTTP client for upstream API calls
//!
//! This module provides an HTTP client with a concurrency cap, a per-host
//! minimum request interval, and quota-header capture into the shared
//! [`RateLimitMonitor`].

use crate::config::RateLimitConfig;
use crate::error::SyncError;
use crate::sync::rate_monitor::{QuotaSnapshot, RateLimitMonitor};
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Successful upstream response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response body
    pub body: Bytes,
    /// Quota reported by the upstream, if it sent the headers
    pub quota: Option<QuotaSnapshot>,
}

/// HTTP client with rate limiting capabilities
///
/// Features:
/// - Per-host request interval enforcement
/// - Global concurrent request limiting via semaphore
/// - `x-ratelimit-*` header capture into a shared monitor
/// - HTTP 429 handling with Retry-After support
#[derive(Debug)]
pub struct HttpClientWithRateLimit {
    client: Client,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
    monitor: Option<Arc<RateLimitMonitor>>,
    config: RateLimitConfig,
}

impl HttpClientWithRateLimit {
    /// Create a new rate-limited HTTP client with the given request timeout
    pub fn new(config: RateLimitConfig, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a rate-limited HTTP client with a custom reqwest Client
    pub fn with_client(client: Client, config: RateLimitConfig) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            last_request: Arc::new(Mutex::new(HashMap::new())),
            monitor: None,
            config,
        }
    }

    /// Report every request and rejection to the given monitor
    pub fn with_monitor(mut self, monitor: Arc<RateLimitMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Perform a GET request
    pub async fn get(&self, url: &str) -> Result<HttpResponse, SyncError> {
        self.get_with_query(url, &[]).await
    }

    /// Perform a GET request with query parameters
    pub async fn get_with_query(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<HttpResponse, SyncError> {
        // Acquire semaphore permit to limit concurrent requests
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::Network("HTTP client is shutting down".to_string()))?;

        // Wait for rate limit interval if needed
        self.wait_for_rate_limit(url).await;

        debug!(url = url, "Sending HTTP GET request");

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::NetworkTimeout
                } else if e.is_connect() {
                    SyncError::ConnectionRefused
                } else {
                    SyncError::Network(e.to_string())
                }
            })?;

        let quota = QuotaSnapshot::from_headers(response.headers(), Utc::now());
        if let Some(monitor) = &self.monitor {
            monitor.record_request(quota);
        }

        match response.status() {
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| SyncError::Network(e.to_string()))?;

                debug!(
                    url = url,
                    status = status.as_u16(),
                    body_size = body.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    remaining = quota.and_then(|q| q.remaining),
                    "Received response"
                );

                Ok(HttpResponse { body, quota })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                // Handle rate limiting with Retry-After header
                let wait = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.config.rate_limit_wait_secs);

                if let Some(monitor) = &self.monitor {
                    monitor.record_rate_limit_hit(Duration::from_secs(wait));
                }

                warn!(url = url, retry_after = wait, "Rate limited by upstream");
                Err(SyncError::RateLimited(wait))
            }
            StatusCode::BAD_REQUEST => {
                let detail = response.text().await.unwrap_or_default();
                let detail: String = detail.chars().take(200).collect();
                warn!(url = url, detail = %detail, "Bad request");
                Err(SyncError::BadRequest(detail))
            }
            StatusCode::NOT_FOUND => {
                debug!(url = url, "Resource not found (404)");
                Err(SyncError::NotFound)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = url, status = ?response.status(), "Unauthorized");
                Err(SyncError::Unauthorized)
            }
            status if status.is_server_error() => {
                warn!(url = url, status = status.as_u16(), "Server error");
                Err(SyncError::ServerError(status.as_u16()))
            }
            status => {
                warn!(url = url, status = status.as_u16(), "Unexpected status");
                Err(SyncError::ServerError(status.as_u16()))
            }
        }
    }

    /// Wait for the rate limit interval to pass for the given URL's host
    async fn wait_for_rate_limit(&self, url: &str) {
        let domain = extract_domain(url);
        let min_interval = Duration::from_millis(self.config.min_interval_ms);

        let mut last_requests = self.last_request.lock().await;

        if let Some(last) = last_requests.get(&domain) {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!(
                    domain = domain,
                    wait_ms = wait_time.as_millis() as u64,
                    "Waiting for rate limit"
                );
                drop(last_requests); // Release lock while waiting
                tokio::time::sleep(wait_time).await;
                last_requests = self.last_request.lock().await;
            }
        }

        last_requests.insert(domain, Instant::now());
    }

    /// Get number of available permits (concurrent request slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Extract host from URL for rate limiting purposes
fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            min_interval_ms: 0,
            max_concurrent: 2,
            rate_limit_wait_secs: 60,
            ..Default::default()
        }
    }

    fn client(config: RateLimitConfig) -> HttpClientWithRateLimit {
        HttpClientWithRateLimit::new(config, Duration::from_secs(5)).unwrap()
    }

    // Test 1: Basic GET request returns body and query params are sent
    #[tokio::test]
    async fn test_get_with_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bill"))
            .and(query_param("api_key", "secret"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&mock_server)
            .await;

        let client = client(test_config());
        let result = client
            .get_with_query(
                &format!("{}/bill", mock_server.uri()),
                &[("api_key", "secret".to_string()), ("limit", "20".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(result.body, Bytes::from("{}"));
        assert!(result.quota.is_none());
    }

    // Test 2: Quota headers are captured and recorded
    #[tokio::test]
    async fn test_quota_headers_recorded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/member"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .insert_header("x-ratelimit-limit", "5000")
                    .insert_header("x-ratelimit-remaining", "4999"),
            )
            .mount(&mock_server)
            .await;

        let monitor = Arc::new(RateLimitMonitor::new(&test_config(), 5000));
        let client = client(test_config()).with_monitor(monitor.clone());

        let result = client
            .get(&format!("{}/member", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(result.quota.and_then(|q| q.remaining), Some(4999));
        let stats = monitor.get_stats();
        assert_eq!(stats.requests_last_hour, 1);
        assert_eq!(stats.quota.and_then(|q| q.limit), Some(5000));
    }

    // Test 3: HTTP 429 returns RateLimited and flags the monitor
    #[tokio::test]
    async fn test_429_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&mock_server)
            .await;

        let monitor = Arc::new(RateLimitMonitor::new(&test_config(), 5000));
        let client = client(test_config()).with_monitor(monitor.clone());

        let result = client.get(&format!("{}/limited", mock_server.uri())).await;

        match result.unwrap_err() {
            SyncError::RateLimited(secs) => assert_eq!(secs, 120),
            err => panic!("Expected RateLimited error, got {:?}", err),
        }
        assert!(monitor.get_stats().rate_limit_hit);
        assert!(monitor.should_throttle().throttle);
    }

    // Test 4: HTTP 429 without Retry-After uses default
    #[tokio::test]
    async fn test_429_uses_default_wait() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let client = client(RateLimitConfig {
            rate_limit_wait_secs: 30,
            ..test_config()
        });

        let result = client.get(&format!("{}/limited", mock_server.uri())).await;

        assert_eq!(result.unwrap_err(), SyncError::RateLimited(30));
    }

    // Test 5: Status codes map to typed errors
    #[tokio::test]
    async fn test_status_mapping() {
        let mock_server = MockServer::start().await;
        for (p, code) in [("/missing", 404), ("/bad", 400), ("/auth", 403), ("/down", 503)] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(code).set_body_string("invalid limit"))
                .mount(&mock_server)
                .await;
        }

        let client = client(test_config());
        let base = mock_server.uri();

        assert_eq!(
            client.get(&format!("{}/missing", base)).await.unwrap_err(),
            SyncError::NotFound
        );
        assert_eq!(
            client.get(&format!("{}/bad", base)).await.unwrap_err(),
            SyncError::BadRequest("invalid limit".to_string())
        );
        assert_eq!(
            client.get(&format!("{}/auth", base)).await.unwrap_err(),
            SyncError::Unauthorized
        );
        assert_eq!(
            client.get(&format!("{}/down", base)).await.unwrap_err(),
            SyncError::ServerError(503)
        );
    }

    // Test 6: Connection failures map to ConnectionRefused
    #[tokio::test]
    async fn test_connection_refused() {
        let client = client(test_config());
        let result = client.get("http://127.0.0.1:1/unreachable").await;
        assert!(matches!(
            result.unwrap_err(),
            SyncError::ConnectionRefused | SyncError::Network(_)
        ));
    }

    // Test 7: Concurrent request limiting
    #[tokio::test]
    async fn test_concurrent_request_limiting() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = Arc::new(client(test_config()));
        let url = format!("{}/slow", mock_server.uri());

        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let c = client.clone();
                let u = url.clone();
                tokio::spawn(async move { c.get(&u).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // With max_concurrent=2, 3 requests of 100ms each take ~200ms
        assert!(
            start.elapsed() >= Duration::from_millis(150),
            "Requests should be limited: {:?}",
            start.elapsed()
        );
        assert_eq!(client.available_permits(), 2);
    }

    // Test 8: Host rate limiting enforces minimum interval
    #[tokio::test]
    async fn test_domain_rate_limiting() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = client(RateLimitConfig {
            min_interval_ms: 100,
            max_concurrent: 10,
            ..test_config()
        });

        let url = format!("{}/fast", mock_server.uri());

        let start = Instant::now();
        client.get(&url).await.unwrap();
        client.get(&url).await.unwrap();

        assert!(
            start.elapsed() >= Duration::from_millis(90),
            "Rate limiting should enforce minimum interval: {:?}",
            start.elapsed()
        );
    }

    // Test 9: Host extraction from URL
    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://api.congress.gov/v3/bill"), "api.congress.gov");
        assert_eq!(
            extract_domain("http://127.0.0.1:8080/resource"),
            "127.0.0.1:8080"
        );
        assert_eq!(extract_domain("invalid"), "invalid");
    }
}
