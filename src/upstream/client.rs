//! Congress.gov v3 client
//!
//! Builds collection and detail URLs, attaches the API key and response
//! format, and unwraps the collection key (`bills`, `members`, `hearings`)
//! plus the pagination cursor from each response.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CongressApi, Page, Pagination, SyncFilter};
use crate::config::{RateLimitConfig, UpstreamConfig};
use crate::error::SyncError;
use crate::models::ResourceType;
use crate::otel::SyncMetrics;
use crate::sync::{HttpClientWithRateLimit, RateLimitMonitor};

const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// reqwest-backed implementation of [`CongressApi`]
pub struct CongressClient {
    http: HttpClientWithRateLimit,
    base_url: String,
    api_key: Option<String>,
    format: String,
    metrics: Option<Arc<SyncMetrics>>,
}

impl CongressClient {
    /// Create a client that reports every request to `monitor`
    pub fn new(
        upstream: &UpstreamConfig,
        rate_limit: RateLimitConfig,
        monitor: Arc<RateLimitMonitor>,
    ) -> Result<Self, SyncError> {
        let http = HttpClientWithRateLimit::new(
            rate_limit,
            Duration::from_secs(upstream.request_timeout_secs),
        )?
        .with_monitor(monitor);

        Ok(Self::with_http(http, upstream))
    }

    pub fn with_http(http: HttpClientWithRateLimit, upstream: &UpstreamConfig) -> Self {
        Self {
            http,
            base_url: upstream.base_url.trim_end_matches('/').to_string(),
            api_key: upstream.api_key.clone(),
            format: upstream.format.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn collection_key(resource: ResourceType) -> &'static str {
        match resource {
            ResourceType::Bills => "bills",
            ResourceType::Members => "members",
            ResourceType::Hearings => "hearings",
        }
    }

    /// Collection URL for a resource, narrowed by congress/type/chamber when given
    fn list_url(&self, resource: ResourceType, filter: &SyncFilter) -> String {
        let mut url = match resource {
            ResourceType::Bills => format!("{}/bill", self.base_url),
            ResourceType::Members => format!("{}/member", self.base_url),
            ResourceType::Hearings => format!("{}/hearing", self.base_url),
        };

        if let Some(congress) = filter.congress {
            match resource {
                ResourceType::Members => url.push_str(&format!("/congress/{}", congress)),
                ResourceType::Bills => {
                    url.push_str(&format!("/{}", congress));
                    if let Some(bill_type) = &filter.bill_type {
                        url.push_str(&format!("/{}", bill_type.to_lowercase()));
                    }
                }
                ResourceType::Hearings => {
                    url.push_str(&format!("/{}", congress));
                    if let Some(chamber) = &filter.chamber {
                        url.push_str(&format!("/{}", chamber.to_lowercase()));
                    }
                }
            }
        }

        url
    }

    fn base_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("format", self.format.clone())];
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.clone()));
        }
        query
    }

    fn list_query(&self, filter: &SyncFilter) -> Vec<(&'static str, String)> {
        let mut query = self.base_query();
        query.push(("limit", filter.limit.to_string()));
        query.push(("offset", filter.offset.to_string()));
        if let Some(from) = filter.from_date_time {
            query.push(("fromDateTime", from.format(DATE_TIME_FORMAT).to_string()));
        }
        if let Some(to) = filter.to_date_time {
            query.push(("toDateTime", to.format(DATE_TIME_FORMAT).to_string()));
        }
        query
    }

    fn parse_json(body: &[u8]) -> Result<Value, SyncError> {
        serde_json::from_slice(body)
            .map_err(|e| SyncError::InvalidData(format!("Malformed upstream JSON: {}", e)))
    }
}

/// Split a collection response into its items and pagination cursor
fn parse_page(body: &Value, key: &str) -> Result<Page, SyncError> {
    let items = body
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| SyncError::InvalidData(format!("Response has no '{}' array", key)))?;

    let pagination = match body.get("pagination") {
        Some(p) => serde_json::from_value::<Pagination>(p.clone())
            .map_err(|e| SyncError::InvalidData(format!("Malformed pagination: {}", e)))?,
        None => Pagination {
            count: items.len() as u64,
            ..Default::default()
        },
    };

    Ok(Page { items, pagination })
}

#[async_trait]
impl CongressApi for CongressClient {
    async fn fetch_page(&self, resource: ResourceType, filter: &SyncFilter) -> Result<Page, SyncError> {
        let url = self.list_url(resource, filter);
        let query = self.list_query(filter);

        let started = Instant::now();
        let response = self.http.get_with_query(&url, &query).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_duration(resource, started.elapsed().as_secs_f64());
        }

        let body = Self::parse_json(&response.body)?;
        let page = parse_page(&body, Self::collection_key(resource))?;

        debug!(
            resource = %resource,
            items = page.items.len(),
            total = page.pagination.count,
            offset = filter.offset,
            "Fetched upstream page"
        );

        Ok(page)
    }

    async fn fetch_bill_detail(
        &self,
        congress: u32,
        bill_type: &str,
        number: &str,
    ) -> Result<Option<Value>, SyncError> {
        let url = format!(
            "{}/bill/{}/{}/{}",
            self.base_url,
            congress,
            bill_type.to_lowercase(),
            number
        );

        match self.http.get_with_query(&url, &self.base_query()).await {
            Ok(response) => Self::parse_json(&response.body).map(Some),
            Err(SyncError::NotFound) => {
                debug!(congress, bill_type, number, "Bill detail not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rate_limit() -> RateLimitConfig {
        RateLimitConfig {
            min_interval_ms: 0,
            ..Default::default()
        }
    }

    fn client_for(server: &MockServer) -> (CongressClient, Arc<RateLimitMonitor>) {
        let upstream = UpstreamConfig {
            base_url: format!("{}/v3/", server.uri()),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };
        let monitor = Arc::new(RateLimitMonitor::new(&rate_limit(), 5000));
        let client = CongressClient::new(&upstream, rate_limit(), monitor.clone()).unwrap();
        (client, monitor)
    }

    // Test 1: Bill list page with filters and pagination
    #[tokio::test]
    async fn test_fetch_bill_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/bill"))
            .and(query_param("api_key", "test-key"))
            .and(query_param("format", "json"))
            .and(query_param("limit", "20"))
            .and(query_param("offset", "0"))
            .and(query_param("fromDateTime", "2024-03-01T12:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bills": [
                    {"congress": 118, "type": "HR", "number": "1", "title": "One"},
                    {"congress": 118, "type": "S", "number": "2", "title": "Two"}
                ],
                "pagination": {"count": 2, "next": null}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, monitor) = client_for(&server);
        let filter = SyncFilter::new(20).with_from(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

        let page = client.fetch_page(ResourceType::Bills, &filter).await.unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1]["number"], "2");
        assert_eq!(page.pagination.count, 2);
        assert!(!page.pagination.has_next());
        assert_eq!(monitor.get_stats().requests_last_hour, 1);
    }

    // Test 2: Congress-scoped URLs per resource
    #[tokio::test]
    async fn test_congress_scoped_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/member/congress/118"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "members": [{"bioguideId": "A000001"}],
                "pagination": {"count": 540, "next": "https://api.congress.gov/v3/member?offset=1"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/hearing/118/house"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hearings": []})))
            .mount(&server)
            .await;

        let (client, _) = client_for(&server);

        let members = client
            .fetch_page(ResourceType::Members, &SyncFilter::new(1).with_congress(118))
            .await
            .unwrap();
        assert_eq!(members.items.len(), 1);
        assert!(members.pagination.has_next());
        assert_eq!(members.pagination.count, 540);

        let filter = SyncFilter {
            chamber: Some("House".to_string()),
            ..SyncFilter::new(10).with_congress(118)
        };
        let hearings = client.fetch_page(ResourceType::Hearings, &filter).await.unwrap();
        assert!(hearings.items.is_empty());
        assert_eq!(hearings.pagination.count, 0);
    }

    // Test 3: Detail 404 is not found, not an error
    #[tokio::test]
    async fn test_bill_detail_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/bill/118/hr/99999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (client, _) = client_for(&server);
        let detail = client.fetch_bill_detail(118, "HR", "99999").await.unwrap();

        assert!(detail.is_none());
    }

    // Test 4: Detail success returns the raw record
    #[tokio::test]
    async fn test_bill_detail_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/bill/118/s/5"))
            .and(query_param("api_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bill": {"congress": 118, "type": "S", "number": "5", "title": "Five"}
            })))
            .mount(&server)
            .await;

        let (client, _) = client_for(&server);
        let detail = client.fetch_bill_detail(118, "s", "5").await.unwrap().unwrap();

        assert_eq!(detail["bill"]["title"], "Five");
    }

    // Test 5: 429 surfaces as RateLimited and flags the monitor
    #[tokio::test]
    async fn test_rate_limited_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/bill"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let (client, monitor) = client_for(&server);
        let err = client
            .fetch_page(ResourceType::Bills, &SyncFilter::new(20))
            .await
            .unwrap_err();

        assert_eq!(err, SyncError::RateLimited(30));
        assert!(monitor.get_stats().rate_limit_hit);
    }

    // Test 6: Missing collection key is invalid data
    #[tokio::test]
    async fn test_missing_collection_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/hearing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "oops"})))
            .mount(&server)
            .await;

        let (client, _) = client_for(&server);
        let err = client
            .fetch_page(ResourceType::Hearings, &SyncFilter::new(5))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidData(msg) if msg.contains("hearings")));
    }

    // Test 7: Malformed body is invalid data
    #[test]
    fn test_parse_json_malformed() {
        assert!(matches!(
            CongressClient::parse_json(b"<html>"),
            Err(SyncError::InvalidData(_))
        ));
    }
}
