//! Member sync service

use async_trait::async_trait;
use serde_json::Value;

use super::{sync_page_with, NoHook, PageSync, ResourceSyncService, SnapshotRecord, SyncContext};
use crate::database::Database;
use crate::error::{AppError, DbError, SyncError};
use crate::models::{json_str, MemberSnapshot, ResourceType};
use crate::upstream::SyncFilter;

#[async_trait]
impl SnapshotRecord for MemberSnapshot {
    fn parse(payload: &Value) -> Result<Self, SyncError> {
        MemberSnapshot::from_payload(payload)
    }

    fn natural_key(&self) -> String {
        self.bioguide_id.clone()
    }

    fn payload_key(payload: &Value, index: usize) -> String {
        let record = payload.get("member").unwrap_or(payload);
        json_str(record, "bioguideId").unwrap_or_else(|| format!("member#{}", index))
    }

    fn differs_from(&self, existing: &Self) -> bool {
        self.significant_fields_differ(existing)
    }

    async fn load(db: &dyn Database, key: &str) -> Result<Option<Self>, DbError> {
        db.get_member(key).await
    }

    async fn store(&self, db: &dyn Database) -> Result<(), DbError> {
        db.upsert_member(self).await
    }
}

pub struct MemberSyncService {
    ctx: SyncContext,
}

impl MemberSyncService {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ResourceSyncService for MemberSyncService {
    fn resource(&self) -> ResourceType {
        ResourceType::Members
    }

    async fn sync_page(&self, filter: &SyncFilter) -> Result<PageSync, AppError> {
        sync_page_with::<MemberSnapshot, _>(&self.ctx, ResourceType::Members, filter, &NoHook).await
    }
}
