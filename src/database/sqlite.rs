//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::Database;
use crate::error::DbError;
use crate::models::{
    BillChangeSummary, BillSnapshot, ChangeLogEntry, ErrorLogEntry, HearingSnapshot, JobStatus,
    MemberSnapshot, QueueStats, RecordError, ResourceSyncResult, ResourceType, Significance,
    SyncCounts, SyncJob, SyncRun, SyncRunStatus,
};

const BILL_COLUMNS: &str = "congress, bill_type, number, title, latest_action_date, \
    latest_action_text, sponsor_id, sponsor_name, policy_area, law_number, cosponsor_count, \
    origin_chamber, update_date, priority, schema_version, payload";

const RUN_COLUMNS: &str = "id, resource_type, strategy, status, started_at, completed_at, \
    records_fetched, records_created, records_updated, records_unchanged, errors, duration_ms, metadata";

const JOB_COLUMNS: &str = "id, job_type, payload, status, priority, attempts, max_attempts, \
    scheduled_for, created_at, started_at, completed_at, error, result";

const CHANGE_COLUMNS: &str =
    "id, resource_id, change_type, previous_value, new_value, significance, detected_at, notified";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        let version = migration_version();
        conn.call(move |conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", version)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

/// Outcome of a guarded status update
enum Transition<T> {
    Applied(T),
    Missing,
    Refused(String),
}

impl<T> Transition<T> {
    fn into_result(self) -> Result<T, DbError> {
        match self {
            Transition::Applied(value) => Ok(value),
            Transition::Missing => Err(DbError::NotFound),
            Transition::Refused(reason) => Err(DbError::InvalidTransition(reason)),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Snapshot operations
    // =========================================================================

    async fn get_bill(&self, bill_id: &str) -> Result<Option<BillSnapshot>, DbError> {
        let bill_id = bill_id.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM bills WHERE bill_id = ?1", BILL_COLUMNS);
                let bill = conn.query_row(&sql, [&bill_id], bill_from_row).optional()?;
                Ok(bill)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_bill(&self, bill: &BillSnapshot) -> Result<(), DbError> {
        let bill_id = bill.bill_id();
        let bill = bill.clone();
        let payload = serde_json::to_string(&bill.payload)?;
        let synced_at = fmt_datetime(&Utc::now());

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO bills
                    (bill_id, congress, bill_type, number, title, latest_action_date,
                     latest_action_text, sponsor_id, sponsor_name, policy_area, law_number,
                     cosponsor_count, origin_chamber, update_date, priority, schema_version,
                     payload, synced_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                    ON CONFLICT(bill_id) DO UPDATE SET
                        title = excluded.title,
                        latest_action_date = excluded.latest_action_date,
                        latest_action_text = excluded.latest_action_text,
                        sponsor_id = excluded.sponsor_id,
                        sponsor_name = excluded.sponsor_name,
                        policy_area = excluded.policy_area,
                        law_number = excluded.law_number,
                        cosponsor_count = excluded.cosponsor_count,
                        origin_chamber = excluded.origin_chamber,
                        update_date = excluded.update_date,
                        schema_version = excluded.schema_version,
                        payload = excluded.payload,
                        synced_at = excluded.synced_at
                    "#,
                    rusqlite::params![
                        bill_id,
                        bill.congress,
                        bill.bill_type,
                        bill.number,
                        bill.title,
                        bill.latest_action_date,
                        bill.latest_action_text,
                        bill.sponsor_id,
                        bill.sponsor_name,
                        bill.policy_area,
                        bill.law_number,
                        bill.cosponsor_count,
                        bill.origin_chamber,
                        bill.update_date,
                        bill.priority,
                        bill.schema_version,
                        payload,
                        synced_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn set_bill_priority(&self, bill_id: &str, priority: bool) -> Result<(), DbError> {
        let bill_id = bill_id.to_string();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE bills SET priority = ?1 WHERE bill_id = ?2",
                    rusqlite::params![priority, bill_id],
                )?;
                Ok(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn list_priority_bills(&self) -> Result<Vec<BillSnapshot>, DbError> {
        self.conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {} FROM bills WHERE priority = 1 ORDER BY congress DESC, bill_type, number",
                    BILL_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let bills = stmt
                    .query_map([], bill_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(bills)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_member(&self, bioguide_id: &str) -> Result<Option<MemberSnapshot>, DbError> {
        let bioguide_id = bioguide_id.to_string();

        self.conn
            .call(move |conn| {
                let member = conn
                    .query_row(
                        r#"
                        SELECT bioguide_id, name, party, state, district, chamber, current,
                               update_date, payload
                        FROM members
                        WHERE bioguide_id = ?1
                        "#,
                        [&bioguide_id],
                        |row| {
                            Ok(MemberSnapshot {
                                bioguide_id: row.get(0)?,
                                name: row.get(1)?,
                                party: row.get(2)?,
                                state: row.get(3)?,
                                district: row.get(4)?,
                                chamber: row.get(5)?,
                                current: row.get(6)?,
                                update_date: row.get(7)?,
                                payload: json_column(8, row.get(8)?)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(member)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_member(&self, member: &MemberSnapshot) -> Result<(), DbError> {
        let member = member.clone();
        let payload = serde_json::to_string(&member.payload)?;
        let synced_at = fmt_datetime(&Utc::now());

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO members
                    (bioguide_id, name, party, state, district, chamber, current, update_date,
                     payload, synced_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(bioguide_id) DO UPDATE SET
                        name = excluded.name,
                        party = excluded.party,
                        state = excluded.state,
                        district = excluded.district,
                        chamber = excluded.chamber,
                        current = excluded.current,
                        update_date = excluded.update_date,
                        payload = excluded.payload,
                        synced_at = excluded.synced_at
                    "#,
                    rusqlite::params![
                        member.bioguide_id,
                        member.name,
                        member.party,
                        member.state,
                        member.district,
                        member.chamber,
                        member.current,
                        member.update_date,
                        payload,
                        synced_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn get_hearing(&self, hearing_id: &str) -> Result<Option<HearingSnapshot>, DbError> {
        let hearing_id = hearing_id.to_string();

        self.conn
            .call(move |conn| {
                let hearing = conn
                    .query_row(
                        r#"
                        SELECT congress, chamber, jacket_number, title, date, committee,
                               update_date, payload
                        FROM hearings
                        WHERE hearing_id = ?1
                        "#,
                        [&hearing_id],
                        |row| {
                            Ok(HearingSnapshot {
                                congress: row.get(0)?,
                                chamber: row.get(1)?,
                                jacket_number: row.get(2)?,
                                title: row.get(3)?,
                                date: row.get(4)?,
                                committee: row.get(5)?,
                                update_date: row.get(6)?,
                                payload: json_column(7, row.get(7)?)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(hearing)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_hearing(&self, hearing: &HearingSnapshot) -> Result<(), DbError> {
        let hearing_id = hearing.hearing_id();
        let hearing = hearing.clone();
        let payload = serde_json::to_string(&hearing.payload)?;
        let synced_at = fmt_datetime(&Utc::now());

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO hearings
                    (hearing_id, congress, chamber, jacket_number, title, date, committee,
                     update_date, payload, synced_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(hearing_id) DO UPDATE SET
                        title = excluded.title,
                        date = excluded.date,
                        committee = excluded.committee,
                        update_date = excluded.update_date,
                        payload = excluded.payload,
                        synced_at = excluded.synced_at
                    "#,
                    rusqlite::params![
                        hearing_id,
                        hearing.congress,
                        hearing.chamber,
                        hearing.jacket_number,
                        hearing.title,
                        hearing.date,
                        hearing.committee,
                        hearing.update_date,
                        payload,
                        synced_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Sync run operations
    // =========================================================================

    async fn create_sync_run(&self, run: &SyncRun) -> Result<i64, DbError> {
        let resource_type = run.resource_type.to_string();
        let strategy = run.strategy.to_string();
        let status = run.status.to_string();
        let started_at = fmt_datetime(&run.started_at);
        let errors = serde_json::to_string(&run.errors)?;
        let metadata = serde_json::to_string(&run.metadata)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_runs (resource_type, strategy, status, started_at, errors, metadata)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![resource_type, strategy, status, started_at, errors, metadata],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn finish_sync_run(
        &self,
        id: i64,
        status: SyncRunStatus,
        result: &ResourceSyncResult,
    ) -> Result<(), DbError> {
        if !status.is_terminal() {
            return Err(DbError::InvalidTransition(format!(
                "sync run {} cannot be finished as {}",
                id, status
            )));
        }

        let status = status.to_string();
        let completed_at = fmt_datetime(&Utc::now());
        let counts = result.counts;
        let errors = serde_json::to_string(&result.errors)?;
        let duration_ms = result.duration_ms as i64;

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE sync_runs
                    SET status = ?1, completed_at = ?2, records_fetched = ?3, records_created = ?4,
                        records_updated = ?5, records_unchanged = ?6, errors = ?7, duration_ms = ?8
                    WHERE id = ?9 AND status = 'running'
                    "#,
                    rusqlite::params![
                        status,
                        completed_at,
                        counts.fetched as i64,
                        counts.created as i64,
                        counts.updated as i64,
                        counts.unchanged as i64,
                        errors,
                        duration_ms,
                        id
                    ],
                )?;
                if count > 0 {
                    return Ok(Transition::Applied(()));
                }

                let current: Option<String> = conn
                    .query_row("SELECT status FROM sync_runs WHERE id = ?1", [id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(match current {
                    None => Transition::Missing,
                    Some(current) => Transition::Refused(format!(
                        "sync run {} is already {}",
                        id, current
                    )),
                })
            })
            .await?
            .into_result()
    }

    async fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM sync_runs WHERE id = ?1", RUN_COLUMNS);
                let run = conn.query_row(&sql, [id], run_from_row).optional()?;
                Ok(run)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_sync_runs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncRun>, DbError> {
        let since = fmt_datetime(&since);

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM sync_runs WHERE started_at >= ?1 ORDER BY started_at DESC, id DESC",
                    RUN_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let runs = stmt
                    .query_map([&since], run_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(runs)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_last_sync_run(
        &self,
        resource: ResourceType,
        status: SyncRunStatus,
    ) -> Result<Option<SyncRun>, DbError> {
        let resource = resource.to_string();
        let status = status.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    r#"
                    SELECT {} FROM sync_runs
                    WHERE resource_type = ?1 AND status = ?2
                    ORDER BY started_at DESC, id DESC
                    LIMIT 1
                    "#,
                    RUN_COLUMNS
                );
                let run = conn
                    .query_row(&sql, [&resource, &status], run_from_row)
                    .optional()?;
                Ok(run)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Change log operations
    // =========================================================================

    async fn insert_change(&self, entry: &ChangeLogEntry) -> Result<i64, DbError> {
        let resource_id = entry.resource_id.clone();
        let change_type = entry.change_type.to_string();
        let previous_value = serde_json::to_string(&entry.previous_value)?;
        let new_value = serde_json::to_string(&entry.new_value)?;
        let significance = entry.significance.to_string();
        let detected_at = fmt_datetime(&entry.detected_at);
        let notified = entry.notified;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO change_log
                    (resource_id, change_type, previous_value, new_value, significance, detected_at, notified)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        resource_id,
                        change_type,
                        previous_value,
                        new_value,
                        significance,
                        detected_at,
                        notified
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_changes_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ChangeLogEntry>, DbError> {
        let resource_id = resource_id.to_string();

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM change_log WHERE resource_id = ?1 ORDER BY detected_at DESC, id DESC",
                    CHANGE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let entries = stmt
                    .query_map([&resource_id], change_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_changes_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeLogEntry>, DbError> {
        let since = fmt_datetime(&since);

        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM change_log WHERE detected_at >= ?1 ORDER BY detected_at DESC, id DESC",
                    CHANGE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let entries = stmt
                    .query_map([&since], change_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_unnotified_changes(&self, limit: u32) -> Result<Vec<ChangeLogEntry>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM change_log WHERE notified = 0 ORDER BY detected_at ASC, id ASC LIMIT ?1",
                    CHANGE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let entries = stmt
                    .query_map([limit], change_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }

    async fn mark_changes_notified(&self, ids: &[i64]) -> Result<u64, DbError> {
        let ids = ids.to_vec();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut changed = 0u64;
                {
                    let mut stmt = tx.prepare(
                        "UPDATE change_log SET notified = 1 WHERE id = ?1 AND notified = 0",
                    )?;
                    for id in &ids {
                        changed += stmt.execute([id])? as u64;
                    }
                }
                tx.commit()?;
                Ok(changed)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_bills_with_recent_changes(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BillChangeSummary>, DbError> {
        let since = fmt_datetime(&since);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT c.resource_id, b.title, COUNT(*) AS change_count,
                           MAX(c.detected_at) AS last_change_at,
                           MAX(CASE c.significance WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END)
                    FROM change_log c
                    JOIN bills b ON b.bill_id = c.resource_id
                    WHERE c.detected_at >= ?1
                    GROUP BY c.resource_id, b.title
                    ORDER BY last_change_at DESC
                    LIMIT ?2
                    "#,
                )?;

                let summaries = stmt
                    .query_map(rusqlite::params![since, limit], |row| {
                        let rank: i64 = row.get(4)?;
                        Ok(BillChangeSummary {
                            bill_id: row.get(0)?,
                            title: row.get(1)?,
                            change_count: row.get::<_, i64>(2)? as u64,
                            last_change_at: parse_datetime(row.get::<_, Option<String>>(3)?)
                                .unwrap_or_else(Utc::now),
                            highest_significance: match rank {
                                3 => Significance::High,
                                2 => Significance::Medium,
                                _ => Significance::Low,
                            },
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(summaries)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Job ledger operations
    // =========================================================================

    async fn insert_job(&self, job: &SyncJob) -> Result<i64, DbError> {
        let job_type = job.job_type.clone();
        let payload = serde_json::to_string(&job.payload)?;
        let status = job.status.to_string();
        let priority = job.priority;
        let max_attempts = job.max_attempts;
        let scheduled_for = fmt_datetime(&job.scheduled_for);
        let created_at = fmt_datetime(&job.created_at);

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_jobs
                    (job_type, payload, status, priority, attempts, max_attempts, scheduled_for, created_at)
                    VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)
                    "#,
                    rusqlite::params![
                        job_type,
                        payload,
                        status,
                        priority,
                        max_attempts,
                        scheduled_for,
                        created_at
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_job(&self, id: i64) -> Result<Option<SyncJob>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM sync_jobs WHERE id = ?1", JOB_COLUMNS);
                let job = conn.query_row(&sql, [id], job_from_row).optional()?;
                Ok(job)
            })
            .await
            .map_err(Into::into)
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<SyncJob>, DbError> {
        let now = fmt_datetime(&now);

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let next: Option<i64> = tx
                    .query_row(
                        r#"
                        SELECT id FROM sync_jobs
                        WHERE status = 'pending' AND scheduled_for <= ?1
                        ORDER BY priority DESC, created_at ASC, id ASC
                        LIMIT 1
                        "#,
                        [&now],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(id) = next else {
                    return Ok(None);
                };

                tx.execute(
                    r#"
                    UPDATE sync_jobs
                    SET status = 'processing', attempts = attempts + 1, started_at = ?1, error = NULL
                    WHERE id = ?2
                    "#,
                    rusqlite::params![now, id],
                )?;

                let sql = format!("SELECT {} FROM sync_jobs WHERE id = ?1", JOB_COLUMNS);
                let job = tx.query_row(&sql, [id], job_from_row)?;
                tx.commit()?;

                Ok(Some(job))
            })
            .await
            .map_err(Into::into)
    }

    async fn complete_job(
        &self,
        id: i64,
        result: Option<serde_json::Value>,
    ) -> Result<(), DbError> {
        let result = result.map(|r| serde_json::to_string(&r)).transpose()?;
        let completed_at = fmt_datetime(&Utc::now());

        self.conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE sync_jobs SET status = 'completed', completed_at = ?1, result = ?2
                    WHERE id = ?3 AND status = 'processing'
                    "#,
                    rusqlite::params![completed_at, result, id],
                )?;
                if count > 0 {
                    return Ok(Transition::Applied(()));
                }
                job_transition_refusal(conn, id, "completed")
            })
            .await?
            .into_result()
    }

    async fn fail_job(&self, id: i64, error: &str) -> Result<JobStatus, DbError> {
        let error = error.to_string();
        let now = fmt_datetime(&Utc::now());

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let row: Option<(String, u32, u32)> = tx
                    .query_row(
                        "SELECT status, attempts, max_attempts FROM sync_jobs WHERE id = ?1",
                        [id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let Some((status, attempts, max_attempts)) = row else {
                    return Ok(Transition::Missing);
                };
                if status != "processing" {
                    return Ok(Transition::Refused(format!(
                        "job {} is {} and cannot be failed",
                        id, status
                    )));
                }

                let next = if attempts < max_attempts {
                    JobStatus::Pending
                } else {
                    JobStatus::Failed
                };
                let completed_at = (next == JobStatus::Failed).then(|| now.clone());

                tx.execute(
                    "UPDATE sync_jobs SET status = ?1, error = ?2, completed_at = ?3 WHERE id = ?4",
                    rusqlite::params![next.to_string(), error, completed_at, id],
                )?;
                tx.commit()?;

                Ok(Transition::Applied(next))
            })
            .await?
            .into_result()
    }

    async fn get_queue_stats(&self) -> Result<QueueStats, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM sync_jobs GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut stats = QueueStats::default();
                for (status, count) in rows {
                    let count = count as u64;
                    match status.as_str() {
                        "pending" => stats.pending = count,
                        "processing" => stats.processing = count,
                        "completed" => stats.completed = count,
                        "failed" => stats.failed = count,
                        _ => {}
                    }
                }
                Ok(stats)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_recent_jobs(&self, limit: u32) -> Result<Vec<SyncJob>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM sync_jobs ORDER BY created_at DESC, id DESC LIMIT ?1",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let jobs = stmt
                    .query_map([limit], job_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Error log operations
    // =========================================================================

    async fn insert_error_log(&self, entry: &ErrorLogEntry) -> Result<i64, DbError> {
        let error_type = entry.error_type.to_string();
        let severity = entry.severity.to_string();
        let message = entry.message.clone();
        let original = entry.original.clone();
        let context = serde_json::to_string(&entry.context)?;
        let occurred_at = fmt_datetime(&entry.occurred_at);

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO error_log (error_type, severity, message, original, context, occurred_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    rusqlite::params![error_type, severity, message, original, context, occurred_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_error_logs_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ErrorLogEntry>, DbError> {
        let since = fmt_datetime(&since);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, error_type, severity, message, original, context, occurred_at
                    FROM error_log
                    WHERE occurred_at >= ?1
                    ORDER BY occurred_at DESC, id DESC
                    "#,
                )?;

                let entries = stmt
                    .query_map([&since], |row| {
                        Ok(ErrorLogEntry {
                            id: Some(row.get(0)?),
                            error_type: parse_text(1, row.get(1)?)?,
                            severity: parse_text(2, row.get(2)?)?,
                            message: row.get(3)?,
                            original: row.get(4)?,
                            context: json_column::<BTreeMap<String, String>>(5, row.get(5)?)?,
                            occurred_at: parse_datetime(row.get::<_, Option<String>>(6)?)
                                .unwrap_or_else(Utc::now),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await
            .map_err(Into::into)
    }
}

fn job_transition_refusal(
    conn: &rusqlite::Connection,
    id: i64,
    target: &str,
) -> rusqlite::Result<Transition<()>> {
    let current: Option<String> = conn
        .query_row("SELECT status FROM sync_jobs WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(match current {
        None => Transition::Missing,
        Some(current) => Transition::Refused(format!(
            "job {} is {} and cannot become {}",
            id, current, target
        )),
    })
}

fn bill_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BillSnapshot> {
    Ok(BillSnapshot {
        congress: row.get(0)?,
        bill_type: row.get(1)?,
        number: row.get(2)?,
        title: row.get(3)?,
        latest_action_date: row.get(4)?,
        latest_action_text: row.get(5)?,
        sponsor_id: row.get(6)?,
        sponsor_name: row.get(7)?,
        policy_area: row.get(8)?,
        law_number: row.get(9)?,
        cosponsor_count: row.get(10)?,
        origin_chamber: row.get(11)?,
        update_date: row.get(12)?,
        priority: row.get(13)?,
        schema_version: row.get(14)?,
        payload: json_column(15, row.get(15)?)?,
    })
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
    Ok(SyncRun {
        id: Some(row.get(0)?),
        resource_type: parse_text(1, row.get(1)?)?,
        strategy: parse_text(2, row.get(2)?)?,
        status: parse_text(3, row.get(3)?)?,
        started_at: parse_datetime(row.get::<_, Option<String>>(4)?).unwrap_or_else(Utc::now),
        completed_at: parse_datetime(row.get::<_, Option<String>>(5)?),
        counts: SyncCounts {
            fetched: row.get::<_, i64>(6)? as u64,
            created: row.get::<_, i64>(7)? as u64,
            updated: row.get::<_, i64>(8)? as u64,
            unchanged: row.get::<_, i64>(9)? as u64,
        },
        errors: json_column::<Vec<RecordError>>(10, row.get(10)?)?,
        duration_ms: row.get::<_, Option<i64>>(11)?.map(|ms| ms as u64),
        metadata: json_column(12, row.get(12)?)?,
    })
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncJob> {
    Ok(SyncJob {
        id: Some(row.get(0)?),
        job_type: row.get(1)?,
        payload: json_column(2, row.get(2)?)?,
        status: parse_text(3, row.get(3)?)?,
        priority: row.get(4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        scheduled_for: parse_datetime(row.get::<_, Option<String>>(7)?).unwrap_or_else(Utc::now),
        created_at: parse_datetime(row.get::<_, Option<String>>(8)?).unwrap_or_else(Utc::now),
        started_at: parse_datetime(row.get::<_, Option<String>>(9)?),
        completed_at: parse_datetime(row.get::<_, Option<String>>(10)?),
        error: row.get(11)?,
        result: row
            .get::<_, Option<String>>(12)?
            .map(|raw| json_column(12, raw))
            .transpose()?,
    })
}

fn change_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    Ok(ChangeLogEntry {
        id: Some(row.get(0)?),
        resource_id: row.get(1)?,
        change_type: parse_text(2, row.get(2)?)?,
        previous_value: json_column(3, row.get(3)?)?,
        new_value: json_column(4, row.get(4)?)?,
        significance: parse_text(5, row.get(5)?)?,
        detected_at: parse_datetime(row.get::<_, Option<String>>(6)?).unwrap_or_else(Utc::now),
        notified: row.get(7)?,
    })
}

/// Format timestamps with a fixed width so text comparison orders them
fn fmt_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}

fn json_column<T: DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_text<T: std::str::FromStr<Err = String>>(idx: usize, raw: String) -> rusqlite::Result<T> {
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}
