//! Database layer for legis-sync
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{
    BillChangeSummary, BillSnapshot, ChangeLogEntry, ErrorLogEntry, HearingSnapshot, JobStatus,
    MemberSnapshot, QueueStats, ResourceSyncResult, ResourceType, SyncJob, SyncRun,
    SyncRunStatus,
};

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the engine.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Snapshot operations
    // =========================================================================

    /// Get a bill snapshot by natural key (`118-hr-1234`)
    async fn get_bill(&self, bill_id: &str) -> Result<Option<BillSnapshot>, DbError>;

    /// Insert or replace a bill snapshot by natural key
    async fn upsert_bill(&self, bill: &BillSnapshot) -> Result<(), DbError>;

    /// Flag or unflag a bill for the priority strategy
    async fn set_bill_priority(&self, bill_id: &str, priority: bool) -> Result<(), DbError>;

    /// All watch-listed bills
    async fn list_priority_bills(&self) -> Result<Vec<BillSnapshot>, DbError>;

    async fn get_member(&self, bioguide_id: &str) -> Result<Option<MemberSnapshot>, DbError>;

    async fn upsert_member(&self, member: &MemberSnapshot) -> Result<(), DbError>;

    async fn get_hearing(&self, hearing_id: &str) -> Result<Option<HearingSnapshot>, DbError>;

    async fn upsert_hearing(&self, hearing: &HearingSnapshot) -> Result<(), DbError>;

    // =========================================================================
    // Sync run operations
    // =========================================================================

    /// Insert a new run, returning its ID
    async fn create_sync_run(&self, run: &SyncRun) -> Result<i64, DbError>;

    /// Move a running SyncRun to a terminal status
    ///
    /// Returns `InvalidTransition` if the run is already terminal.
    async fn finish_sync_run(
        &self,
        id: i64,
        status: SyncRunStatus,
        result: &ResourceSyncResult,
    ) -> Result<(), DbError>;

    async fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>, DbError>;

    /// Runs started at or after `since`, newest first
    async fn get_sync_runs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncRun>, DbError>;

    /// Most recent run of a resource type with the given status
    async fn get_last_sync_run(
        &self,
        resource: ResourceType,
        status: SyncRunStatus,
    ) -> Result<Option<SyncRun>, DbError>;

    // =========================================================================
    // Change log operations
    // =========================================================================

    /// Insert one change entry, returning its ID
    async fn insert_change(&self, entry: &ChangeLogEntry) -> Result<i64, DbError>;

    async fn get_changes_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ChangeLogEntry>, DbError>;

    async fn get_changes_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeLogEntry>, DbError>;

    /// Oldest un-notified changes first
    async fn get_unnotified_changes(&self, limit: u32) -> Result<Vec<ChangeLogEntry>, DbError>;

    /// Flip `notified` to true; already-notified rows are left alone
    ///
    /// Returns the number of rows that changed.
    async fn mark_changes_notified(&self, ids: &[i64]) -> Result<u64, DbError>;

    async fn get_bills_with_recent_changes(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BillChangeSummary>, DbError>;

    // =========================================================================
    // Job ledger operations
    // =========================================================================

    /// Insert a job, returning its ID
    async fn insert_job(&self, job: &SyncJob) -> Result<i64, DbError>;

    async fn get_job(&self, id: i64) -> Result<Option<SyncJob>, DbError>;

    /// Atomically move the best due pending job to `processing`
    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<SyncJob>, DbError>;

    /// Mark a processing job completed
    async fn complete_job(
        &self,
        id: i64,
        result: Option<serde_json::Value>,
    ) -> Result<(), DbError>;

    /// Record a failed attempt
    ///
    /// The job returns to `pending` while attempts remain, otherwise it
    /// becomes `failed`. Returns the resulting status.
    async fn fail_job(&self, id: i64, error: &str) -> Result<JobStatus, DbError>;

    async fn get_queue_stats(&self) -> Result<QueueStats, DbError>;

    /// Most recently created jobs
    async fn get_recent_jobs(&self, limit: u32) -> Result<Vec<SyncJob>, DbError>;

    // =========================================================================
    // Error log operations
    // =========================================================================

    async fn insert_error_log(&self, entry: &ErrorLogEntry) -> Result<i64, DbError>;

    async fn get_error_logs_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ErrorLogEntry>, DbError>;
}
