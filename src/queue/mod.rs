//! Job/Queue ledger
//!
//! Durable record of deferred sync work. The ledger only writes and reads
//! job rows; draining is done by whoever calls [`QueueLedger::claim_next`]
//! (the orchestrator's `process_next_job`, driven by the `drain` command).

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::database::Database;
use crate::error::DbError;
use crate::models::{EnqueueOptions, JobStatus, QueueStats, SyncJob};

pub struct QueueLedger {
    db: Arc<dyn Database>,
    config: QueueConfig,
}

impl QueueLedger {
    pub fn new(db: Arc<dyn Database>, config: QueueConfig) -> Self {
        Self { db, config }
    }

    /// Persist a pending job and return its ID
    ///
    /// Unset options fall back to the configured priority and attempt budget;
    /// an unset schedule means "due now".
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<i64, DbError> {
        let now = Utc::now();
        let job = SyncJob {
            id: None,
            job_type: job_type.to_string(),
            payload,
            status: JobStatus::Pending,
            priority: options.priority.unwrap_or(self.config.default_priority),
            attempts: 0,
            max_attempts: options
                .max_attempts
                .unwrap_or(self.config.default_max_attempts)
                .max(1),
            scheduled_for: options.scheduled_for.unwrap_or(now),
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        };

        let id = self.db.insert_job(&job).await?;
        info!(
            job_id = id,
            job_type = %job.job_type,
            priority = job.priority,
            "Job enqueued"
        );
        Ok(id)
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats, DbError> {
        self.db.get_queue_stats().await
    }

    /// Most recently created jobs first
    pub async fn get_recent_jobs(&self, limit: u32) -> Result<Vec<SyncJob>, DbError> {
        self.db.get_recent_jobs(limit).await
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<SyncJob>, DbError> {
        self.db.get_job(id).await
    }

    /// Claim the highest-priority due job, moving it to `processing`
    pub async fn claim_next(&self) -> Result<Option<SyncJob>, DbError> {
        let job = self.db.claim_next_job(Utc::now()).await?;
        if let Some(job) = &job {
            debug!(
                job_id = job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                "Job claimed"
            );
        }
        Ok(job)
    }

    pub async fn complete(&self, id: i64, result: Option<Value>) -> Result<(), DbError> {
        self.db.complete_job(id, result).await?;
        debug!(job_id = id, "Job completed");
        Ok(())
    }

    /// Record a failed attempt; returns the job's resulting status
    pub async fn fail(&self, id: i64, error: &str) -> Result<JobStatus, DbError> {
        let status = self.db.fail_job(id, error).await?;
        match status {
            JobStatus::Failed => warn!(job_id = id, error = %error, "Job failed permanently"),
            _ => debug!(job_id = id, error = %error, status = %status, "Job attempt failed"),
        }
        Ok(status)
    }
}
