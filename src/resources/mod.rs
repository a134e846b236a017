//! Resource sync services
//!
//! Each service fetches one upstream page, parses every record into its
//! snapshot type, and reconciles it against the stored snapshot by natural
//! key: absent records are created, records whose significant fields differ
//! are updated, anything else is left untouched. A failing record is recorded
//! with its key and the page carries on.

pub mod bills;
pub mod hearings;
pub mod members;
pub mod traits;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{AppError, DbError, SyncError};
use crate::models::{RecordError, ResourceSyncResult, ResourceType, SyncCounts};
use crate::otel::SyncMetrics;
use crate::sync::{ErrorHandler, ParallelExecutor, RateLimitMonitor};
use crate::upstream::{CongressApi, Page, Pagination, SyncFilter};

pub use bills::BillSyncService;
pub use hearings::HearingSyncService;
pub use members::MemberSyncService;
pub use traits::ResourceSyncService;

/// Shared collaborators of every resource service
#[derive(Clone)]
pub struct SyncContext {
    pub api: Arc<dyn CongressApi>,
    pub db: Arc<dyn Database>,
    pub errors: Arc<ErrorHandler>,
    pub monitor: Arc<RateLimitMonitor>,
    pub executor: ParallelExecutor,
    pub metrics: Option<Arc<SyncMetrics>>,
}

impl SyncContext {
    /// Fetch one page through the classified retry executor, consulting the
    /// rate monitor before every attempt
    pub async fn fetch_page(&self, resource: ResourceType, filter: &SyncFilter) -> Result<Page, SyncError> {
        let operation = format!("fetch {} page", resource);
        self.errors
            .with_retry(&operation, move || async move {
                self.monitor.wait_if_needed().await;
                self.api.fetch_page(resource, filter).await
            })
            .await
    }

    /// Fetch one enriched bill the same way as [`fetch_page`](Self::fetch_page)
    pub async fn fetch_bill_detail(
        &self,
        congress: u32,
        bill_type: &str,
        number: &str,
    ) -> Result<Option<Value>, SyncError> {
        let operation = format!("fetch bill {}-{}-{}", congress, bill_type, number);
        self.errors
            .with_retry(&operation, move || async move {
                self.monitor.wait_if_needed().await;
                self.api.fetch_bill_detail(congress, bill_type, number).await
            })
            .await
    }

    fn record_counts(&self, resource: ResourceType, counts: &SyncCounts) {
        if let Some(metrics) = &self.metrics {
            metrics.record_counts(resource, counts);
        }
    }
}

/// Result of reconciling one page, plus the upstream cursor
#[derive(Debug, Clone, Default)]
pub struct PageSync {
    pub result: ResourceSyncResult,
    pub pagination: Pagination,
}

/// What happened to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    Unchanged,
}

impl RecordOutcome {
    fn count_into(self, counts: &mut SyncCounts) {
        match self {
            RecordOutcome::Created => counts.created += 1,
            RecordOutcome::Updated => counts.updated += 1,
            RecordOutcome::Unchanged => counts.unchanged += 1,
        }
    }
}

/// A snapshot type that can be reconciled by natural key
#[async_trait]
pub trait SnapshotRecord: Sized + Send + Sync {
    fn parse(payload: &Value) -> Result<Self, SyncError>;

    fn natural_key(&self) -> String;

    /// Best-effort key for a payload that failed to parse
    fn payload_key(payload: &Value, index: usize) -> String;

    /// Carry over stored fields the incoming record does not have
    fn merge_existing(&mut self, _existing: &Self) {}

    fn differs_from(&self, existing: &Self) -> bool;

    async fn load(db: &dyn Database, key: &str) -> Result<Option<Self>, DbError>;

    async fn store(&self, db: &dyn Database) -> Result<(), DbError>;
}

/// Runs after a snapshot write
#[async_trait]
pub trait ReconcileHook<S: SnapshotRecord>: Send + Sync {
    async fn after_write(&self, key: &str, previous: Option<&S>, current: &S);
}

/// Hook for resources without change tracking
pub struct NoHook;

#[async_trait]
impl<S: SnapshotRecord + 'static> ReconcileHook<S> for NoHook {
    async fn after_write(&self, _key: &str, _previous: Option<&S>, _current: &S) {}
}

/// Reconcile one parsed snapshot against storage
pub async fn reconcile_record<S, H>(db: &dyn Database, mut incoming: S, hook: &H) -> Result<RecordOutcome, AppError>
where
    S: SnapshotRecord,
    H: ReconcileHook<S> + ?Sized,
{
    let key = incoming.natural_key();

    match S::load(db, &key).await? {
        None => {
            incoming.store(db).await?;
            hook.after_write(&key, None, &incoming).await;
            debug!(key = %key, "Created snapshot");
            Ok(RecordOutcome::Created)
        }
        Some(existing) => {
            incoming.merge_existing(&existing);
            if !incoming.differs_from(&existing) {
                return Ok(RecordOutcome::Unchanged);
            }
            incoming.store(db).await?;
            hook.after_write(&key, Some(&existing), &incoming).await;
            debug!(key = %key, "Updated snapshot");
            Ok(RecordOutcome::Updated)
        }
    }
}

/// Fetch one page and reconcile every record in upstream order
pub async fn sync_page_with<S, H>(
    ctx: &SyncContext,
    resource: ResourceType,
    filter: &SyncFilter,
    hook: &H,
) -> Result<PageSync, AppError>
where
    S: SnapshotRecord,
    H: ReconcileHook<S> + ?Sized,
{
    let started = Instant::now();
    let page = ctx.fetch_page(resource, filter).await?;

    let mut result = ResourceSyncResult::default();
    result.counts.fetched = page.items.len() as u64;

    for (index, payload) in page.items.iter().enumerate() {
        let outcome = match S::parse(payload) {
            Ok(snapshot) => {
                let key = snapshot.natural_key();
                reconcile_record(ctx.db.as_ref(), snapshot, hook)
                    .await
                    .map_err(|e| (key, e))
            }
            Err(e) => Err((S::payload_key(payload, index), AppError::from(e))),
        };

        match outcome {
            Ok(outcome) => outcome.count_into(&mut result.counts),
            Err((key, err)) => {
                warn!(resource = %resource, key = %key, error = %err, "Record sync failed");
                ctx.errors.classify(
                    &err,
                    &[("resource", resource.as_str()), ("key", key.as_str())],
                );
                result.errors.push(RecordError::new(key, err.to_string()));
            }
        }
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    ctx.record_counts(resource, &result.counts);

    info!(
        resource = %resource,
        fetched = result.counts.fetched,
        created = result.counts.created,
        updated = result.counts.updated,
        unchanged = result.counts.unchanged,
        errors = result.errors.len(),
        duration_ms = result.duration_ms,
        "Page reconciled"
    );

    Ok(PageSync {
        result,
        pagination: page.pagination,
    })
}

#[cfg(test)]
pub(crate) fn test_context(api: Arc<dyn CongressApi>, db: Arc<dyn Database>) -> SyncContext {
    use crate::config::{AlertConfig, ExecutorConfig, RateLimitConfig, RetryConfig};

    let retry = RetryConfig {
        max_attempts: 1,
        ..Default::default()
    };
    SyncContext {
        api,
        db,
        errors: Arc::new(ErrorHandler::new(retry, AlertConfig::default())),
        monitor: Arc::new(RateLimitMonitor::new(&RateLimitConfig::default(), 5000)),
        executor: ParallelExecutor::new(ExecutorConfig::default()),
        metrics: None,
    }
}
