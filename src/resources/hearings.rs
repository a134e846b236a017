//! Hearing sync service

use async_trait::async_trait;
use serde_json::Value;

use super::{sync_page_with, NoHook, PageSync, ResourceSyncService, SnapshotRecord, SyncContext};
use crate::database::Database;
use crate::error::{AppError, DbError, SyncError};
use crate::models::{json_str, HearingSnapshot, ResourceType};
use crate::upstream::SyncFilter;

#[async_trait]
impl SnapshotRecord for HearingSnapshot {
    fn parse(payload: &Value) -> Result<Self, SyncError> {
        HearingSnapshot::from_payload(payload)
    }

    fn natural_key(&self) -> String {
        self.hearing_id()
    }

    fn payload_key(payload: &Value, index: usize) -> String {
        let record = payload.get("hearing").unwrap_or(payload);
        match json_str(record, "jacketNumber") {
            Some(jacket) => format!("hearing-{}", jacket),
            None => format!("hearing#{}", index),
        }
    }

    fn merge_existing(&mut self, existing: &Self) {
        self.fill_missing_from(existing);
    }

    fn differs_from(&self, existing: &Self) -> bool {
        self.significant_fields_differ(existing)
    }

    async fn load(db: &dyn Database, key: &str) -> Result<Option<Self>, DbError> {
        db.get_hearing(key).await
    }

    async fn store(&self, db: &dyn Database) -> Result<(), DbError> {
        db.upsert_hearing(self).await
    }
}

pub struct HearingSyncService {
    ctx: SyncContext,
}

impl HearingSyncService {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceSyncService for HearingSyncService {
    fn resource(&self) -> ResourceType {
        ResourceType::Hearings
    }

    async fn sync_page(&self, filter: &SyncFilter) -> Result<PageSync, AppError> {
        sync_page_with::<HearingSnapshot, _>(&self.ctx, ResourceType::Hearings, filter, &NoHook).await
    }
}
