//! Change detection service
//!
//! Wraps the pure [`detect_changes`] rules with persistence to the change
//! log, fan-out to an injected [`ChangeNotifier`], and the read queries used
//! by dashboards and the notification pipeline.

pub mod detect;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{AppError, DbError};
use crate::models::{
    BillChangeSummary, BillSnapshot, ChangeEvent, ChangeLogEntry, ChangeStats, Significance,
};
use crate::otel::SyncMetrics;

pub use detect::detect_changes;

/// Outbound hook into the notification pipeline
///
/// Given a resource id and the significance of what changed, notify whoever
/// is watching it. Formatting and delivery are the implementor's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, resource_id: &str, significance: Significance) -> Result<(), AppError>;
}

pub struct ChangeDetection {
    db: Arc<dyn Database>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    metrics: Option<Arc<SyncMetrics>>,
}

impl ChangeDetection {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            notifier: None,
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn detect_changes(&self, old: Option<&BillSnapshot>, new: &BillSnapshot) -> Vec<ChangeEvent> {
        detect_changes(old, new)
    }

    /// Persist each event as an un-notified log entry
    ///
    /// Events are written independently: a failed insert is logged and the
    /// remaining events are still written. Returns the IDs that were written.
    pub async fn log_changes(&self, resource_id: &str, events: &[ChangeEvent]) -> Vec<i64> {
        let mut ids = Vec::with_capacity(events.len());

        for event in events {
            let entry = ChangeLogEntry::from_event(resource_id, event);
            match self.db.insert_change(&entry).await {
                Ok(id) => {
                    ids.push(id);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_change(event.change_type, event.significance);
                    }
                }
                Err(e) => {
                    warn!(
                        resource_id = resource_id,
                        change_type = %event.change_type,
                        error = %e,
                        "Failed to log change"
                    );
                }
            }
        }

        ids
    }

    /// Notify watchers once for a batch, at its highest significance
    ///
    /// Notifier failures are logged and never propagate.
    pub async fn notify_changes(&self, resource_id: &str, events: &[ChangeEvent]) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let Some(significance) = events.iter().map(|e| e.significance).max() else {
            return;
        };

        if let Err(e) = notifier.notify(resource_id, significance).await {
            warn!(
                resource_id = resource_id,
                significance = %significance,
                error = %e,
                "Change notification failed"
            );
        }
    }

    /// Detect, log and notify in one step
    pub async fn process(
        &self,
        resource_id: &str,
        old: Option<&BillSnapshot>,
        new: &BillSnapshot,
    ) -> Vec<ChangeEvent> {
        let events = detect_changes(old, new);
        if events.is_empty() {
            return events;
        }

        debug!(
            resource_id = resource_id,
            events = events.len(),
            "Detected changes"
        );
        self.log_changes(resource_id, &events).await;
        self.notify_changes(resource_id, &events).await;
        events
    }

    /// Counts by type and significance over the trailing `days`
    pub async fn get_change_stats(&self, days: i64) -> Result<ChangeStats, DbError> {
        let since = Utc::now() - ChronoDuration::days(days);
        let entries = self.db.get_changes_since(since).await?;

        let mut stats = ChangeStats {
            days,
            ..Default::default()
        };
        for entry in &entries {
            stats.total += 1;
            if !entry.notified {
                stats.unnotified += 1;
            }
            *stats
                .by_type
                .entry(entry.change_type.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_significance
                .entry(entry.significance.as_str().to_string())
                .or_default() += 1;
        }

        Ok(stats)
    }

    pub async fn get_bills_with_recent_changes(
        &self,
        days: i64,
        limit: u32,
    ) -> Result<Vec<BillChangeSummary>, DbError> {
        let since = Utc::now() - ChronoDuration::days(days);
        self.db.get_bills_with_recent_changes(since, limit).await
    }

    pub async fn get_changes_for_resource(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ChangeLogEntry>, DbError> {
        self.db.get_changes_for_resource(resource_id).await
    }

    pub async fn get_unnotified_changes(&self, limit: u32) -> Result<Vec<ChangeLogEntry>, DbError> {
        self.db.get_unnotified_changes(limit).await
    }

    /// Mark entries as notified; already-notified entries are unaffected
    pub async fn mark_as_notified(&self, ids: &[i64]) -> Result<u64, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let updated = self.db.mark_changes_notified(ids).await?;
        info!(requested = ids.len(), updated = updated, "Marked changes as notified");
        Ok(updated)
    }
}
