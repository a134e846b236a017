//! Bill sync service
//!
//! Besides the page reconcile loop, bills carry change detection on every
//! write and a watch list that the priority strategy refreshes record by
//! record through the parallel executor.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::{
    reconcile_record, sync_page_with, PageSync, ReconcileHook, RecordOutcome, ResourceSyncService,
    SnapshotRecord, SyncContext,
};
use crate::changes::ChangeDetection;
use crate::database::Database;
use crate::error::{AppError, DbError, SyncError};
use crate::models::{json_str, BillSnapshot, RecordError, ResourceSyncResult, ResourceType};
use crate::upstream::SyncFilter;

#[async_trait]
impl SnapshotRecord for BillSnapshot {
    fn parse(payload: &Value) -> Result<Self, SyncError> {
        BillSnapshot::from_payload(payload)
    }

    fn natural_key(&self) -> String {
        self.bill_id()
    }

    fn payload_key(payload: &Value, index: usize) -> String {
        let record = payload.get("bill").unwrap_or(payload);
        match (
            json_str(record, "congress"),
            json_str(record, "type"),
            json_str(record, "number"),
        ) {
            (Some(congress), Some(bill_type), Some(number)) => {
                format!("{}-{}-{}", congress, bill_type.to_lowercase(), number)
            }
            _ => format!("bill#{}", index),
        }
    }

    fn merge_existing(&mut self, existing: &Self) {
        self.fill_missing_from(existing);
    }

    fn differs_from(&self, existing: &Self) -> bool {
        self.significant_fields_differ(existing)
    }

    async fn load(db: &dyn Database, key: &str) -> Result<Option<Self>, DbError> {
        db.get_bill(key).await
    }

    async fn store(&self, db: &dyn Database) -> Result<(), DbError> {
        db.upsert_bill(self).await
    }
}

#[async_trait]
impl ReconcileHook<BillSnapshot> for ChangeDetection {
    async fn after_write(&self, key: &str, previous: Option<&BillSnapshot>, current: &BillSnapshot) {
        self.process(key, previous, current).await;
    }
}

pub struct BillSyncService {
    ctx: SyncContext,
    changes: Arc<ChangeDetection>,
}

impl BillSyncService {
    pub fn new(ctx: SyncContext, changes: Arc<ChangeDetection>) -> Self {
        Self { ctx, changes }
    }

    /// Re-fetch one watch-listed bill; `None` when the upstream no longer has it
    async fn refresh_one(&self, bill: BillSnapshot) -> Result<Option<RecordOutcome>, AppError> {
        let detail = self
            .ctx
            .fetch_bill_detail(bill.congress, &bill.bill_type, &bill.number)
            .await?;

        let Some(detail) = detail else {
            debug!(bill_id = %bill.bill_id(), "Watched bill not found upstream");
            return Ok(None);
        };

        let snapshot = BillSnapshot::from_payload(&detail)?;
        let outcome = reconcile_record(self.ctx.db.as_ref(), snapshot, self.changes.as_ref()).await?;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl ResourceSyncService for BillSyncService {
    fn resource(&self) -> ResourceType {
        ResourceType::Bills
    }

    async fn sync_page(&self, filter: &SyncFilter) -> Result<PageSync, AppError> {
        sync_page_with::<BillSnapshot, _>(&self.ctx, ResourceType::Bills, filter, self.changes.as_ref())
            .await
    }

    async fn refresh_priority(&self) -> Result<Option<ResourceSyncResult>, AppError> {
        let started = Instant::now();
        let watched = self.ctx.db.list_priority_bills().await?;
        let keys: Vec<String> = watched.iter().map(BillSnapshot::bill_id).collect();

        let report = self
            .ctx
            .executor
            .execute_chunked(watched, |bill| self.refresh_one(bill))
            .await;

        let mut result = ResourceSyncResult::default();
        for outcome in report.results.into_iter().flatten().flatten() {
            result.counts.fetched += 1;
            outcome.count_into(&mut result.counts);
        }
        for failure in report.failures {
            result
                .errors
                .push(RecordError::new(keys[failure.index].clone(), failure.error.to_string()));
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        self.ctx.record_counts(ResourceType::Bills, &result.counts);

        info!(
            watched = keys.len(),
            updated = result.counts.updated,
            errors = result.errors.len(),
            "Priority bills refreshed"
        );

        Ok(Some(result))
    }
}
