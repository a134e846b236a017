//! Sync orchestrator
//!
//! Top-level entry point of the engine. For each requested resource the
//! orchestrator turns the strategy into a concrete fetch plan, opens a
//! SyncRun, and then either runs the resource's sync service inline or
//! writes a job to the queue ledger and returns.
//!
//! Resources are visited sequentially. A hard failure in one resource marks
//! its SyncRun `failed` and is returned to the caller; resources after it are
//! not attempted.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::changes::ChangeDetection;
use crate::config::StrategyConfig;
use crate::database::Database;
use crate::error::{AppError, DbError};
use crate::models::{
    EnqueueOptions, JobStatus, RecordError, ResourceSyncResult, ResourceType, SyncCounts,
    SyncJobPayload, SyncRun, SyncRunStatus, SyncStats, SyncStrategy, SYNC_JOB_TYPE,
};
use crate::otel::SyncMetrics;
use crate::queue::QueueLedger;
use crate::resources::{
    BillSyncService, HearingSyncService, MemberSyncService, ResourceSyncService, SyncContext,
};
use crate::upstream::SyncFilter;

/// What to sync and how
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    /// Resources to visit, in order; empty means all
    pub resources: Vec<ResourceType>,
    /// Enqueue jobs instead of syncing inline
    pub async_mode: bool,
    /// Congress scope; full runs fall back to the configured default
    pub congress: Option<u32>,
}

impl SyncOptions {
    pub fn new(strategy: SyncStrategy, resources: Vec<ResourceType>) -> Self {
        Self {
            strategy,
            resources,
            async_mode: false,
            congress: None,
        }
    }

    pub fn with_async(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_congress(mut self, congress: u32) -> Self {
        self.congress = Some(congress);
        self
    }

    fn resolved_resources(&self) -> Vec<ResourceType> {
        if self.resources.is_empty() {
            return ResourceType::ALL.to_vec();
        }
        let mut seen = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            if !seen.contains(resource) {
                seen.push(*resource);
            }
        }
        seen
    }
}

/// Outcome for one resource within a sync call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRunSummary {
    pub resource: ResourceType,
    pub run_id: i64,
    /// `running` for async dispatch, terminal otherwise
    pub status: SyncRunStatus,
    pub result: ResourceSyncResult,
    /// Set in async mode
    pub job_id: Option<i64>,
}

/// Aggregate result of [`Orchestrator::sync`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunSummary {
    pub strategy: SyncStrategy,
    pub resources: Vec<ResourceRunSummary>,
    pub totals: SyncCounts,
    pub error_count: u64,
    pub duration_ms: u64,
    pub jobs_enqueued: Vec<i64>,
    /// Resources left alone because they were fresh (stale strategy)
    pub skipped: Vec<ResourceType>,
}

impl SyncRunSummary {
    fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            resources: Vec::new(),
            totals: SyncCounts::default(),
            error_count: 0,
            duration_ms: 0,
            jobs_enqueued: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn push(&mut self, run: ResourceRunSummary) {
        self.totals.add(&run.result.counts);
        self.error_count += run.result.errors.len() as u64;
        if let Some(job_id) = run.job_id {
            self.jobs_enqueued.push(job_id);
        }
        self.resources.push(run);
    }
}

/// Outcome of draining one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: i64,
    pub run_id: Option<i64>,
    /// Resulting job status (`pending` when a retry remains)
    pub status: JobStatus,
    pub result: Option<ResourceSyncResult>,
    pub error: Option<String>,
}

/// Concrete fetch plan for one resource
#[derive(Debug, Clone, PartialEq)]
struct RunPlan {
    filter: SyncFilter,
    max_pages: u32,
    refresh_priority: bool,
}

pub struct Orchestrator {
    db: Arc<dyn Database>,
    queue: Arc<QueueLedger>,
    strategies: StrategyConfig,
    services: BTreeMap<ResourceType, Arc<dyn ResourceSyncService>>,
    metrics: Option<Arc<SyncMetrics>>,
}

impl Orchestrator {
    /// Create an orchestrator with no resource services registered
    pub fn new(db: Arc<dyn Database>, queue: Arc<QueueLedger>, strategies: StrategyConfig) -> Self {
        Self {
            db,
            queue,
            strategies,
            services: BTreeMap::new(),
            metrics: None,
        }
    }

    /// Create an orchestrator with the bill, member and hearing services
    pub fn with_default_services(
        ctx: SyncContext,
        changes: Arc<ChangeDetection>,
        queue: Arc<QueueLedger>,
        strategies: StrategyConfig,
    ) -> Self {
        let metrics = ctx.metrics.clone();
        let mut orchestrator = Self::new(ctx.db.clone(), queue, strategies)
            .with_service(Arc::new(BillSyncService::new(ctx.clone(), changes)))
            .with_service(Arc::new(MemberSyncService::new(ctx.clone())))
            .with_service(Arc::new(HearingSyncService::new(ctx)));
        orchestrator.metrics = metrics;
        orchestrator
    }

    /// Register (or replace) the service for its resource type
    pub fn with_service(mut self, service: Arc<dyn ResourceSyncService>) -> Self {
        self.services.insert(service.resource(), service);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn queue(&self) -> &Arc<QueueLedger> {
        &self.queue
    }

    fn service(&self, resource: ResourceType) -> Result<Arc<dyn ResourceSyncService>, AppError> {
        self.services
            .get(&resource)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("No sync service registered for {}", resource)))
    }

    /// Run a strategy over the requested resources
    pub async fn sync(&self, options: &SyncOptions) -> Result<SyncRunSummary, AppError> {
        let started = Instant::now();
        let mut summary = SyncRunSummary::new(options.strategy);

        info!(
            strategy = %options.strategy,
            async_mode = options.async_mode,
            "Sync started"
        );

        for resource in options.resolved_resources() {
            let service = self.service(resource)?;

            if options.strategy == SyncStrategy::Stale && self.is_fresh(resource).await? {
                info!(resource = %resource, "Resource is fresh, skipping");
                summary.skipped.push(resource);
                continue;
            }

            let plan = self.plan(resource, options.strategy, options.congress).await?;
            let run = SyncRun::new(resource, options.strategy).with_metadata(json!({
                "mode": if options.async_mode { "async" } else { "sync" },
                "congress": plan.filter.congress,
                "limit": plan.filter.limit,
                "max_pages": plan.max_pages,
            }));
            let run_id = self.db.create_sync_run(&run).await?;

            if options.async_mode {
                let job_id = self.dispatch(resource, options, run_id).await?;
                summary.push(ResourceRunSummary {
                    resource,
                    run_id,
                    status: SyncRunStatus::Running,
                    result: ResourceSyncResult::default(),
                    job_id: Some(job_id),
                });
                continue;
            }

            let result = match self.run_resource(service.as_ref(), run_id, &plan).await {
                Ok(result) => result,
                Err(failure) => {
                    self.mark_failed(resource, run_id, failure.partial, &failure.error)
                        .await;
                    return Err(failure.error);
                }
            };
            summary.push(ResourceRunSummary {
                resource,
                run_id,
                status: result.run_status(),
                result,
                job_id: None,
            });
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            strategy = %options.strategy,
            fetched = summary.totals.fetched,
            created = summary.totals.created,
            updated = summary.totals.updated,
            unchanged = summary.totals.unchanged,
            errors = summary.error_count,
            jobs = summary.jobs_enqueued.len(),
            skipped = summary.skipped.len(),
            duration_ms = summary.duration_ms,
            "Sync finished"
        );

        Ok(summary)
    }

    /// Aggregate SyncRuns started within the last `hours`
    pub async fn get_sync_stats(&self, hours: i64) -> Result<SyncStats, AppError> {
        let since = Utc::now() - ChronoDuration::hours(hours.max(0));
        let runs = self.db.get_sync_runs_since(since).await?;
        Ok(SyncStats::from_runs(hours, &runs))
    }

    /// Claim and execute one due job from the ledger
    ///
    /// Returns `None` when nothing is due. A failing job goes back to
    /// `pending` while it has attempts left; its SyncRun is only marked
    /// `failed` once the job is.
    pub async fn process_next_job(&self) -> Result<Option<JobOutcome>, AppError> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(None);
        };
        let job_id = job
            .id
            .ok_or_else(|| AppError::Internal("claimed job has no id".to_string()))?;

        if job.job_type != SYNC_JOB_TYPE {
            let message = format!("Unsupported job type: {}", job.job_type);
            return self.reject_job(job_id, message).await.map(Some);
        }
        let payload = match SyncJobPayload::from_value(&job.payload) {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("Invalid job payload: {}", e);
                return self.reject_job(job_id, message).await.map(Some);
            }
        };
        let run_id = payload.run_id;

        let outcome: Result<ResourceSyncResult, RunFailure> = async {
            let service = self.service(payload.resource)?;
            let plan = self
                .plan(payload.resource, payload.strategy, payload.congress)
                .await?;
            self.run_resource(service.as_ref(), run_id, &plan).await
        }
        .await;

        match outcome {
            Ok(result) => {
                let stored = serde_json::to_value(&result).map_err(DbError::from)?;
                self.queue.complete(job_id, Some(stored)).await?;
                Ok(Some(JobOutcome {
                    job_id,
                    run_id: Some(run_id),
                    status: JobStatus::Completed,
                    result: Some(result),
                    error: None,
                }))
            }
            Err(failure) => {
                let message = failure.error.to_string();
                let status = self.queue.fail(job_id, &message).await?;
                if status == JobStatus::Failed {
                    self.mark_failed(payload.resource, run_id, failure.partial, &failure.error)
                        .await;
                }
                Ok(Some(JobOutcome {
                    job_id,
                    run_id: Some(run_id),
                    status,
                    result: None,
                    error: Some(message),
                }))
            }
        }
    }

    /// Drain due jobs until the ledger is empty or `max_jobs` were processed
    pub async fn drain(&self, max_jobs: usize) -> Result<Vec<JobOutcome>, AppError> {
        let mut outcomes = Vec::new();
        while outcomes.len() < max_jobs {
            match self.process_next_job().await? {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        Ok(outcomes)
    }

    async fn reject_job(&self, job_id: i64, message: String) -> Result<JobOutcome, AppError> {
        warn!(job_id = job_id, error = %message, "Rejecting job");
        let status = self.queue.fail(job_id, &message).await?;
        Ok(JobOutcome {
            job_id,
            run_id: None,
            status,
            result: None,
            error: Some(message),
        })
    }

    async fn dispatch(
        &self,
        resource: ResourceType,
        options: &SyncOptions,
        run_id: i64,
    ) -> Result<i64, AppError> {
        let payload = SyncJobPayload {
            resource,
            strategy: options.strategy,
            run_id,
            congress: options.congress,
        };
        let value = payload.to_value().map_err(DbError::from)?;
        let priority = match options.strategy {
            SyncStrategy::Priority => 10,
            SyncStrategy::Incremental => 5,
            SyncStrategy::Stale | SyncStrategy::Full => 0,
        };

        let job_id = self
            .queue
            .enqueue(SYNC_JOB_TYPE, value, EnqueueOptions::new().with_priority(priority))
            .await?;
        info!(resource = %resource, run_id = run_id, job_id = job_id, "Sync job enqueued");
        Ok(job_id)
    }

    /// Whether the resource had a completed run inside the freshness window
    async fn is_fresh(&self, resource: ResourceType) -> Result<bool, AppError> {
        let window_start = Utc::now() - ChronoDuration::hours(self.strategies.stale_window_hours);
        let last = self
            .db
            .get_last_sync_run(resource, SyncRunStatus::Completed)
            .await?;
        Ok(last.is_some_and(|run| run.started_at >= window_start))
    }

    async fn plan(
        &self,
        resource: ResourceType,
        strategy: SyncStrategy,
        congress: Option<u32>,
    ) -> Result<RunPlan, AppError> {
        let cfg = &self.strategies;
        let now = Utc::now();

        let (mut filter, max_pages, refresh_priority) = match strategy {
            SyncStrategy::Incremental => {
                let from = now - ChronoDuration::hours(cfg.incremental_lookback_hours);
                (SyncFilter::new(cfg.incremental_page_size).with_from(from), 1, false)
            }
            SyncStrategy::Stale => {
                let from: DateTime<Utc> = self
                    .db
                    .get_last_sync_run(resource, SyncRunStatus::Completed)
                    .await?
                    .map(|run| run.started_at)
                    .unwrap_or_else(|| now - ChronoDuration::hours(cfg.stale_window_hours));
                (SyncFilter::new(cfg.stale_page_size).with_from(from), 1, false)
            }
            SyncStrategy::Priority => (SyncFilter::new(cfg.priority_page_size), 1, true),
            SyncStrategy::Full => {
                let filter = SyncFilter::new(cfg.full_page_size)
                    .with_congress(congress.unwrap_or(cfg.default_congress));
                (filter, cfg.full_max_pages.max(1), false)
            }
        };

        if let Some(congress) = congress {
            filter.congress = Some(congress);
        }

        Ok(RunPlan {
            filter,
            max_pages,
            refresh_priority,
        })
    }

    /// Execute a plan and finalise its SyncRun on success
    async fn run_resource(
        &self,
        service: &dyn ResourceSyncService,
        run_id: i64,
        plan: &RunPlan,
    ) -> Result<ResourceSyncResult, RunFailure> {
        let resource = service.resource();
        let started = Instant::now();
        let mut result = ResourceSyncResult::default();
        let mut filter = plan.filter.clone();

        for page in 0..plan.max_pages {
            let page_sync = match service.sync_page(&filter).await {
                Ok(page_sync) => page_sync,
                Err(error) => return Err(RunFailure::new(result, started, error)),
            };
            let fetched = page_sync.result.counts.fetched;
            result.merge(page_sync.result);

            if !page_sync.pagination.has_next() || fetched == 0 {
                break;
            }
            if page + 1 == plan.max_pages {
                warn!(resource = %resource, pages = plan.max_pages, "Page cap reached");
                break;
            }
            let offset = filter.offset.saturating_add(fetched as u32);
            filter = filter.with_offset(offset);
        }

        if plan.refresh_priority {
            match service.refresh_priority().await {
                Ok(Some(refreshed)) => result.merge(refreshed),
                Ok(None) => {}
                Err(error) => return Err(RunFailure::new(result, started, error)),
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        let status = result.run_status();
        if let Err(e) = self.db.finish_sync_run(run_id, status, &result).await {
            return Err(RunFailure::new(result, started, e.into()));
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_run(resource, status);
        }

        info!(
            resource = %resource,
            run_id = run_id,
            status = %status,
            fetched = result.counts.fetched,
            errors = result.errors.len(),
            "Resource sync finished"
        );
        Ok(result)
    }

    /// Finish a run as failed, keeping whatever its pages already recorded
    async fn mark_failed(
        &self,
        resource: ResourceType,
        run_id: i64,
        mut result: ResourceSyncResult,
        err: &AppError,
    ) {
        error!(
            resource = %resource,
            run_id = run_id,
            fetched = result.counts.fetched,
            error = %err,
            "Resource sync failed"
        );

        result.errors.push(RecordError::new("run", err.to_string()));
        if let Err(e) = self
            .db
            .finish_sync_run(run_id, SyncRunStatus::Failed, &result)
            .await
        {
            warn!(run_id = run_id, error = %e, "Failed to mark sync run failed");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_run(resource, SyncRunStatus::Failed);
        }
    }
}

/// A resource run that stopped early, with the work its pages had done
struct RunFailure {
    partial: ResourceSyncResult,
    error: AppError,
}

impl RunFailure {
    fn new(mut partial: ResourceSyncResult, started: Instant, error: AppError) -> Self {
        partial.duration_ms = started.elapsed().as_millis() as u64;
        Self { partial, error }
    }
}

impl From<AppError> for RunFailure {
    fn from(error: AppError) -> Self {
        Self {
            partial: ResourceSyncResult::default(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::database::SqliteDatabase;
    use crate::error::SyncError;
    use crate::resources::{test_context, PageSync};
    use crate::upstream::{MockCongressApi, Page, Pagination};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Service that returns scripted page results and records the filters it saw
    struct ScriptedService {
        resource: ResourceType,
        pages: Mutex<Vec<Result<PageSync, AppError>>>,
        filters: Mutex<Vec<SyncFilter>>,
    }

    impl ScriptedService {
        fn new(resource: ResourceType, pages: Vec<Result<PageSync, AppError>>) -> Arc<Self> {
            Arc::new(Self {
                resource,
                pages: Mutex::new(pages),
                filters: Mutex::new(Vec::new()),
            })
        }

        fn filters(&self) -> Vec<SyncFilter> {
            self.filters.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceSyncService for ScriptedService {
        fn resource(&self) -> ResourceType {
            self.resource
        }

        async fn sync_page(&self, filter: &SyncFilter) -> Result<PageSync, AppError> {
            self.filters.lock().unwrap().push(filter.clone());
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(PageSync::default());
            }
            pages.remove(0)
        }
    }

    fn page(fetched: u64, created: u64, errors: usize, next: bool) -> Result<PageSync, AppError> {
        let mut result = ResourceSyncResult::default();
        result.counts.fetched = fetched;
        result.counts.created = created;
        result.counts.unchanged = fetched - created - errors as u64;
        for i in 0..errors {
            result.errors.push(RecordError::new(format!("rec-{}", i), "bad"));
        }
        Ok(PageSync {
            result,
            pagination: Pagination {
                count: fetched,
                next: next.then(|| "next".to_string()),
                previous: None,
            },
        })
    }

    async fn setup() -> (Arc<SqliteDatabase>, Arc<QueueLedger>) {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let queue = Arc::new(QueueLedger::new(db.clone(), QueueConfig::default()));
        (db, queue)
    }

    // Test 1: Sync mode aggregates counts and finalises each run
    #[tokio::test]
    async fn test_sync_mode_aggregates() {
        let (db, queue) = setup().await;
        let bills = ScriptedService::new(ResourceType::Bills, vec![page(5, 3, 0, false)]);
        let members = ScriptedService::new(ResourceType::Members, vec![page(4, 1, 1, false)]);
        let orchestrator = Orchestrator::new(db.clone(), queue, StrategyConfig::default())
            .with_service(bills.clone())
            .with_service(members.clone());

        let options = SyncOptions::new(
            SyncStrategy::Incremental,
            vec![ResourceType::Bills, ResourceType::Members],
        );
        let summary = orchestrator.sync(&options).await.unwrap();

        assert_eq!(summary.totals.fetched, 9);
        assert_eq!(summary.totals.created, 4);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.resources.len(), 2);
        assert_eq!(summary.resources[0].status, SyncRunStatus::Completed);
        assert_eq!(summary.resources[1].status, SyncRunStatus::Partial);

        let run = db.get_sync_run(summary.resources[1].run_id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Partial);
        assert_eq!(run.errors.len(), 1);
        assert!(run.completed_at.is_some());

        let filter = &bills.filters()[0];
        assert_eq!(filter.limit, StrategyConfig::default().incremental_page_size);
        assert!(filter.from_date_time.is_some());
    }

    // Test 2: A hard failure marks the run failed and propagates
    #[tokio::test]
    async fn test_hard_failure_marks_run_failed() {
        let (db, queue) = setup().await;
        let bills = ScriptedService::new(
            ResourceType::Bills,
            vec![Err(AppError::Sync(SyncError::Unauthorized))],
        );
        let members = ScriptedService::new(ResourceType::Members, vec![page(1, 1, 0, false)]);
        let orchestrator = Orchestrator::new(db.clone(), queue, StrategyConfig::default())
            .with_service(bills)
            .with_service(members.clone());

        let options = SyncOptions::new(
            SyncStrategy::Incremental,
            vec![ResourceType::Bills, ResourceType::Members],
        );
        let result = orchestrator.sync(&options).await;

        assert!(matches!(result, Err(AppError::Sync(SyncError::Unauthorized))));
        let run = db
            .get_last_sync_run(ResourceType::Bills, SyncRunStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.errors[0].key, "run");
        // Later resources are not attempted
        assert!(members.filters().is_empty());
    }

    // Test 3: Async mode only writes the ledger
    #[tokio::test]
    async fn test_async_mode_enqueues() {
        let (db, queue) = setup().await;
        let bills = ScriptedService::new(ResourceType::Bills, vec![]);
        let orchestrator = Orchestrator::new(db.clone(), queue.clone(), StrategyConfig::default())
            .with_service(bills.clone());

        let options = SyncOptions::new(SyncStrategy::Priority, vec![ResourceType::Bills])
            .with_async(true);
        let summary = orchestrator.sync(&options).await.unwrap();

        assert_eq!(summary.jobs_enqueued.len(), 1);
        assert_eq!(summary.resources[0].status, SyncRunStatus::Running);
        assert!(bills.filters().is_empty());

        let job = queue.get_job(summary.jobs_enqueued[0]).await.unwrap().unwrap();
        assert_eq!(job.job_type, SYNC_JOB_TYPE);
        assert_eq!(job.priority, 10);
        let payload = SyncJobPayload::from_value(&job.payload).unwrap();
        assert_eq!(payload.run_id, summary.resources[0].run_id);
        assert_eq!(payload.strategy, SyncStrategy::Priority);
    }

    // Test 4: Draining a job executes the sync and finalises the run
    #[tokio::test]
    async fn test_process_next_job() {
        let (db, queue) = setup().await;
        let bills = ScriptedService::new(ResourceType::Bills, vec![page(2, 2, 0, false)]);
        let orchestrator = Orchestrator::new(db.clone(), queue.clone(), StrategyConfig::default())
            .with_service(bills);

        let options = SyncOptions::new(SyncStrategy::Incremental, vec![ResourceType::Bills])
            .with_async(true);
        let summary = orchestrator.sync(&options).await.unwrap();

        let outcome = orchestrator.process_next_job().await.unwrap().unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.result.unwrap().counts.created, 2);

        let run = db.get_sync_run(summary.resources[0].run_id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.counts.created, 2);

        assert!(orchestrator.process_next_job().await.unwrap().is_none());
    }

    // Test 5: A failing job retries before its run is marked failed
    #[tokio::test]
    async fn test_job_retry_then_failure() {
        let (db, _) = setup().await;
        let queue = Arc::new(QueueLedger::new(
            db.clone(),
            QueueConfig {
                default_max_attempts: 2,
                default_priority: 0,
            },
        ));
        let bills = ScriptedService::new(
            ResourceType::Bills,
            vec![
                Err(AppError::Sync(SyncError::ServerError(503))),
                Err(AppError::Sync(SyncError::ServerError(503))),
            ],
        );
        let orchestrator = Orchestrator::new(db.clone(), queue, StrategyConfig::default())
            .with_service(bills);

        let options = SyncOptions::new(SyncStrategy::Incremental, vec![ResourceType::Bills])
            .with_async(true);
        let run_id = orchestrator.sync(&options).await.unwrap().resources[0].run_id;

        let first = orchestrator.process_next_job().await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        let run = db.get_sync_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Running);

        let second = orchestrator.process_next_job().await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Failed);
        let run = db.get_sync_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Failed);
    }

    // Test 6: Stale strategy skips fresh resources
    #[tokio::test]
    async fn test_stale_skips_fresh() {
        let (db, queue) = setup().await;
        let fresh = db
            .create_sync_run(&SyncRun::new(ResourceType::Bills, SyncStrategy::Incremental))
            .await
            .unwrap();
        db.finish_sync_run(fresh, SyncRunStatus::Completed, &ResourceSyncResult::default())
            .await
            .unwrap();

        let bills = ScriptedService::new(ResourceType::Bills, vec![]);
        let members = ScriptedService::new(ResourceType::Members, vec![page(1, 1, 0, false)]);
        let orchestrator = Orchestrator::new(db.clone(), queue, StrategyConfig::default())
            .with_service(bills.clone())
            .with_service(members.clone());

        let options = SyncOptions::new(
            SyncStrategy::Stale,
            vec![ResourceType::Bills, ResourceType::Members],
        );
        let summary = orchestrator.sync(&options).await.unwrap();

        assert_eq!(summary.skipped, vec![ResourceType::Bills]);
        assert_eq!(summary.resources.len(), 1);
        assert!(bills.filters().is_empty());
        let filter = &members.filters()[0];
        assert_eq!(filter.limit, StrategyConfig::default().stale_page_size);
        assert!(filter.from_date_time.is_some());
    }

    // Test 7: Full strategy follows pagination up to the page cap
    #[tokio::test]
    async fn test_full_follows_pagination() {
        let (db, queue) = setup().await;
        let bills = ScriptedService::new(
            ResourceType::Bills,
            vec![page(3, 3, 0, true), page(3, 3, 0, true), page(3, 3, 0, true)],
        );
        let strategies = StrategyConfig {
            full_max_pages: 2,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(db, queue, strategies).with_service(bills.clone());

        let options = SyncOptions::new(SyncStrategy::Full, vec![ResourceType::Bills]);
        let summary = orchestrator.sync(&options).await.unwrap();

        assert_eq!(summary.totals.fetched, 6);
        let filters = bills.filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].offset, 0);
        assert_eq!(filters[1].offset, 3);
        assert_eq!(filters[0].congress, Some(StrategyConfig::default().default_congress));
    }

    // Test 8: Stats over recent runs
    #[tokio::test]
    async fn test_get_sync_stats() {
        let (db, queue) = setup().await;
        for (resource, status) in [
            (ResourceType::Bills, SyncRunStatus::Completed),
            (ResourceType::Bills, SyncRunStatus::Completed),
            (ResourceType::Members, SyncRunStatus::Failed),
        ] {
            let id = db
                .create_sync_run(&SyncRun::new(resource, SyncStrategy::Incremental))
                .await
                .unwrap();
            db.finish_sync_run(id, status, &ResourceSyncResult::default())
                .await
                .unwrap();
        }
        let orchestrator = Orchestrator::new(db, queue, StrategyConfig::default());

        let stats = orchestrator.get_sync_stats(24).await.unwrap();

        assert_eq!(stats.total_runs, 3);
        assert!((stats.success_rate - 0.67).abs() < 0.01);
        assert_eq!(stats.by_resource["bills"].completed, 2);
        assert_eq!(stats.by_resource["bills"].failed, 0);
        assert_eq!(stats.by_resource["members"].completed, 0);
        assert_eq!(stats.by_resource["members"].failed, 1);
    }

    // Test 9: Default services wire to the upstream API
    #[tokio::test]
    async fn test_default_services() {
        let (db, queue) = setup().await;
        let mut api = MockCongressApi::new();
        api.expect_fetch_page()
            .withf(|resource, _| *resource == ResourceType::Members)
            .times(1)
            .returning(|_, _| {
                Ok(Page {
                    items: vec![serde_json::json!({"bioguideId": "X000001", "name": "X"})],
                    ..Default::default()
                })
            });
        let ctx = test_context(Arc::new(api), db.clone());
        let changes = Arc::new(ChangeDetection::new(db.clone()));
        let orchestrator = Orchestrator::with_default_services(
            ctx,
            changes,
            queue,
            StrategyConfig::default(),
        );

        let summary = orchestrator
            .sync(&SyncOptions::new(SyncStrategy::Incremental, vec![ResourceType::Members]))
            .await
            .unwrap();

        assert_eq!(summary.totals.created, 1);
        assert!(db.get_member("X000001").await.unwrap().is_some());
    }

    // Test 10: Unregistered resources are rejected before any run is created
    #[tokio::test]
    async fn test_unregistered_resource() {
        let (db, queue) = setup().await;
        let orchestrator = Orchestrator::new(db.clone(), queue, StrategyConfig::default());

        let result = orchestrator
            .sync(&SyncOptions::new(SyncStrategy::Full, vec![ResourceType::Hearings]))
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(db
            .get_sync_runs_since(Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap()
            .is_empty());
    }

    // Test 11: A failure mid-pagination keeps the counts of pages already written
    #[tokio::test]
    async fn test_failed_run_keeps_partial_counts() {
        let (db, queue) = setup().await;
        let bills = ScriptedService::new(
            ResourceType::Bills,
            vec![
                page(5, 5, 0, true),
                Err(AppError::Sync(SyncError::ServerError(503))),
            ],
        );
        let orchestrator = Orchestrator::new(db.clone(), queue, StrategyConfig::default())
            .with_service(bills.clone());

        let result = orchestrator
            .sync(&SyncOptions::new(SyncStrategy::Full, vec![ResourceType::Bills]))
            .await;

        assert!(matches!(result, Err(AppError::Sync(SyncError::ServerError(503)))));
        assert_eq!(bills.filters().len(), 2);

        let run = db
            .get_last_sync_run(ResourceType::Bills, SyncRunStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.counts.fetched, 5);
        assert_eq!(run.counts.created, 5);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].key, "run");
        assert!(run.completed_at.is_some());
    }
}
