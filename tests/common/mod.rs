//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use legis_sync::changes::ChangeDetection;
use legis_sync::config::{
    AlertConfig, ExecutorConfig, QueueConfig, RateLimitConfig, RetryConfig, StrategyConfig,
    UpstreamConfig,
};
use legis_sync::database::SqliteDatabase;
use legis_sync::orchestrator::Orchestrator;
use legis_sync::queue::QueueLedger;
use legis_sync::resources::SyncContext;
use legis_sync::sync::{ErrorHandler, ParallelExecutor, RateLimitMonitor};
use legis_sync::upstream::CongressClient;

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Everything a test needs to drive the engine end to end
pub struct TestEngine {
    pub db: Arc<SqliteDatabase>,
    pub orchestrator: Arc<Orchestrator>,
    pub changes: Arc<ChangeDetection>,
    pub errors: Arc<ErrorHandler>,
    pub queue: Arc<QueueLedger>,
    pub monitor: Arc<RateLimitMonitor>,
}

/// Upstream config pointing at a mock server
pub fn upstream_config(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        ..Default::default()
    }
}

/// Rate limiting that never slows a test down
pub fn fast_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        min_interval_ms: 0,
        max_concurrent: 4,
        ..Default::default()
    }
}

/// Build the full engine against a mock upstream
pub async fn create_test_engine(server: &MockServer, strategies: StrategyConfig) -> TestEngine {
    let db = create_test_database().await;
    let monitor = Arc::new(RateLimitMonitor::new(&fast_rate_limit(), 5000));
    let client = CongressClient::new(&upstream_config(server), fast_rate_limit(), monitor.clone())
        .expect("Failed to create client");

    let retry = RetryConfig {
        max_attempts: 1,
        ..Default::default()
    };
    let errors = Arc::new(ErrorHandler::new(retry, AlertConfig::default()).with_database(db.clone()));
    let changes = Arc::new(ChangeDetection::new(db.clone()));
    let queue = Arc::new(QueueLedger::new(db.clone(), QueueConfig::default()));

    let ctx = SyncContext {
        api: Arc::new(client),
        db: db.clone(),
        errors: errors.clone(),
        monitor: monitor.clone(),
        executor: ParallelExecutor::new(ExecutorConfig {
            start_delay_ms: 0,
            retry_delay_ms: 0,
            ..Default::default()
        }),
        metrics: None,
    };
    let orchestrator = Arc::new(Orchestrator::with_default_services(
        ctx,
        changes.clone(),
        queue.clone(),
        strategies,
    ));

    TestEngine {
        db,
        orchestrator,
        changes,
        errors,
        queue,
        monitor,
    }
}

/// A bill list item as returned by `/bill`
pub fn bill_item(number: &str, title: &str, action_date: &str, action_text: &str) -> Value {
    json!({
        "congress": 118,
        "type": "HR",
        "number": number,
        "title": title,
        "originChamber": "House",
        "latestAction": {"actionDate": action_date, "text": action_text},
        "updateDate": "2024-03-01T12:00:00Z"
    })
}

/// Mount a `/bill` collection response
pub async fn mount_bills(server: &MockServer, items: Vec<Value>) {
    let count = items.len();
    Mock::given(method("GET"))
        .and(path("/bill"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bills": items,
            "pagination": {"count": count}
        })))
        .mount(server)
        .await;
}

/// Mount a `/member` collection response
pub async fn mount_members(server: &MockServer, items: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/member"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "members": items })))
        .mount(server)
        .await;
}

/// Mount a `/hearing` collection response
pub async fn mount_hearings(server: &MockServer, items: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/hearing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "hearings": items })))
        .mount(server)
        .await;
}
