//! Orchestrator integration tests
//!
//! Tests the orchestration layer including:
//! - Async dispatch through the queue ledger and draining
//! - Stale catch-up skipping fresh resources
//! - Full re-sync pagination
//! - Run statistics
//! - Scheduled strategy tasks
//! - Scheduled runs that overrun their time budget

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bill_item, create_test_engine, mount_bills, mount_members};
use legis_sync::config::{ScheduledSync, StrategyConfig};
use legis_sync::database::Database;
use legis_sync::models::{JobStatus, ResourceType, SyncRunStatus, SyncStrategy};
use legis_sync::orchestrator::SyncOptions;
use legis_sync::sync::{ScheduledTask, SchedulerConfig, StrategyTask, SyncScheduler};

/// Test 1: Async mode writes jobs that a later drain executes
#[tokio::test]
async fn test_async_dispatch_and_drain() {
    let server = MockServer::start().await;
    mount_bills(&server, vec![bill_item("1", "One", "2024-01-01", "Introduced")]).await;
    mount_members(&server, vec![json!({"bioguideId": "M000001", "name": "Member"})]).await;
    let engine = create_test_engine(&server, StrategyConfig::default()).await;

    let options = SyncOptions::new(
        SyncStrategy::Incremental,
        vec![ResourceType::Bills, ResourceType::Members],
    )
    .with_async(true);
    let summary = engine.orchestrator.sync(&options).await.unwrap();

    assert_eq!(summary.jobs_enqueued.len(), 2);
    assert_eq!(summary.totals.fetched, 0);
    assert!(engine.db.get_bill("118-hr-1").await.unwrap().is_none());
    assert_eq!(engine.queue.get_queue_stats().await.unwrap().pending, 2);

    let outcomes = engine.orchestrator.drain(10).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.status == JobStatus::Completed));
    assert!(engine.db.get_bill("118-hr-1").await.unwrap().is_some());
    assert!(engine.db.get_member("M000001").await.unwrap().is_some());

    let stats = engine.queue.get_queue_stats().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.pending, 0);

    for run in &summary.resources {
        let stored = engine.db.get_sync_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncRunStatus::Completed);
        assert_eq!(stored.counts.created, 1);
    }

    let job = engine.queue.get_job(summary.jobs_enqueued[0]).await.unwrap().unwrap();
    assert_eq!(job.result.unwrap()["counts"]["created"], 1);
}

/// Test 2: Stale catch-up only visits resources outside the freshness window
#[tokio::test]
async fn test_stale_catch_up() {
    let server = MockServer::start().await;
    mount_bills(&server, vec![bill_item("1", "One", "2024-01-01", "Introduced")]).await;
    mount_members(&server, vec![]).await;
    let engine = create_test_engine(&server, StrategyConfig::default()).await;

    engine
        .orchestrator
        .sync(&SyncOptions::new(SyncStrategy::Incremental, vec![ResourceType::Bills]))
        .await
        .unwrap();

    let summary = engine
        .orchestrator
        .sync(&SyncOptions::new(
            SyncStrategy::Stale,
            vec![ResourceType::Bills, ResourceType::Members],
        ))
        .await
        .unwrap();

    assert_eq!(summary.skipped, vec![ResourceType::Bills]);
    assert_eq!(summary.resources.len(), 1);
    assert_eq!(summary.resources[0].resource, ResourceType::Members);
    assert_eq!(summary.resources[0].status, SyncRunStatus::Completed);
}

/// Test 3: Full re-sync walks upstream pages for the requested congress
#[tokio::test]
async fn test_full_resync_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bill/117"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bills": [
                {"congress": 117, "type": "S", "number": "1", "title": "First"},
                {"congress": 117, "type": "S", "number": "2", "title": "Second"}
            ],
            "pagination": {"count": 3, "next": "page-2"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bill/117"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bills": [{"congress": 117, "type": "S", "number": "3", "title": "Third"}],
            "pagination": {"count": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let strategies = StrategyConfig {
        full_page_size: 2,
        ..Default::default()
    };
    let engine = create_test_engine(&server, strategies).await;

    let summary = engine
        .orchestrator
        .sync(&SyncOptions::new(SyncStrategy::Full, vec![ResourceType::Bills]).with_congress(117))
        .await
        .unwrap();

    assert_eq!(summary.totals.fetched, 3);
    assert_eq!(summary.totals.created, 3);
    assert!(engine.db.get_bill("117-s-3").await.unwrap().is_some());
}

/// Test 4: Stats reflect completed and failed runs per resource
#[tokio::test]
async fn test_sync_stats() {
    let server = MockServer::start().await;
    mount_bills(&server, vec![bill_item("1", "One", "2024-01-01", "Introduced")]).await;
    Mock::given(method("GET"))
        .and(path("/member"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad fromDateTime"))
        .mount(&server)
        .await;
    let engine = create_test_engine(&server, StrategyConfig::default()).await;

    for _ in 0..2 {
        engine
            .orchestrator
            .sync(&SyncOptions::new(SyncStrategy::Incremental, vec![ResourceType::Bills]))
            .await
            .unwrap();
    }
    let failed = engine
        .orchestrator
        .sync(&SyncOptions::new(SyncStrategy::Incremental, vec![ResourceType::Members]))
        .await;
    assert!(failed.is_err());

    let stats = engine.orchestrator.get_sync_stats(24).await.unwrap();

    assert_eq!(stats.total_runs, 3);
    assert!((stats.success_rate - 0.67).abs() < 0.01);
    assert_eq!(stats.by_resource["bills"].completed, 2);
    assert_eq!(stats.by_resource["bills"].failed, 0);
    assert_eq!(stats.by_resource["members"].completed, 0);
    assert_eq!(stats.by_resource["members"].failed, 1);
}

/// Test 5: Scheduled strategy tasks run on startup and on manual trigger
#[tokio::test]
async fn test_scheduled_strategy_task() {
    let server = MockServer::start().await;
    mount_bills(&server, vec![bill_item("1", "One", "2024-01-01", "Introduced")]).await;
    let engine = create_test_engine(&server, StrategyConfig::default()).await;

    let task = StrategyTask::new(
        ScheduledSync {
            strategy: SyncStrategy::Incremental,
            resources: vec![ResourceType::Bills],
            interval_secs: 3600,
            async_mode: false,
        },
        engine.orchestrator.clone(),
    );
    assert_eq!(task.name(), "incremental:bills");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = SyncScheduler::new(
        SchedulerConfig {
            initial_delay_secs: 0,
            jitter_secs: 0,
            sync_timeout_secs: 10,
        },
        vec![Arc::new(task)],
        shutdown_rx,
    );
    let manual = scheduler.manual_trigger_handle();
    let handle = tokio::spawn(scheduler.run());

    // Wait for the initial run
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.db.get_bill("118-hr-1").await.unwrap().is_some());

    let outcome = manual.trigger("incremental:bills").await.unwrap();
    assert_eq!(outcome.records_changed, 0);
    assert_eq!(outcome.errors, 0);
    assert!(!outcome.skipped);

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    let runs = engine
        .db
        .get_last_sync_run(ResourceType::Bills, SyncRunStatus::Completed)
        .await
        .unwrap();
    assert!(runs.is_some());
}

/// Test 6: A scheduled run slower than its time budget still finishes its sync run record
#[tokio::test]
async fn test_overrunning_scheduled_run_finishes_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bill"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "bills": [bill_item("1", "One", "2024-01-01", "Introduced")],
                    "pagination": {"count": 1}
                }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let engine = create_test_engine(&server, StrategyConfig::default()).await;

    let task = StrategyTask::new(
        ScheduledSync {
            strategy: SyncStrategy::Incremental,
            resources: vec![ResourceType::Bills],
            interval_secs: 3600,
            async_mode: false,
        },
        engine.orchestrator.clone(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = SyncScheduler::new(
        SchedulerConfig {
            initial_delay_secs: 0,
            jitter_secs: 0,
            sync_timeout_secs: 1,
        },
        vec![Arc::new(task)],
        shutdown_rx,
    );
    let started = chrono::Utc::now() - chrono::Duration::seconds(5);
    let handle = tokio::spawn(scheduler.run());

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let runs = engine.db.get_sync_runs_since(started).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, SyncRunStatus::Completed);
    assert!(runs[0].completed_at.is_some());
    assert!(engine.db.get_bill("118-hr-1").await.unwrap().is_some());

    shutdown_tx.send(()).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}
