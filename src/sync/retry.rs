//! Classified retry executor and error observability
//!
//! [`ErrorHandler`] wraps upstream operations with exponential-backoff retry
//! governed by the classification table, keeps error metrics and a bounded
//! ring of recent classified errors, and persists critical failures to the
//! durable error log.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::{AlertConfig, RetryConfig};
use crate::database::Database;
use crate::error::{Classifiable, DbError};
use crate::models::{ClassifiedError, ErrorLogEntry, ErrorSeverity};
use crate::otel::SyncMetrics;
use crate::sync::classifier;

/// Cumulative error and retry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub retries_attempted: u64,
    pub retries_succeeded: u64,
    pub retries_failed: u64,
}

/// Error counts over a trailing window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub hours: i64,
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    /// Critical entries in the durable log for the same window
    pub persisted_critical: u64,
}

#[derive(Debug, Default)]
struct HandlerState {
    metrics: ErrorMetrics,
    recent: VecDeque<ClassifiedError>,
}

/// Error classifier front-end with retry, metrics and alerting
pub struct ErrorHandler {
    config: RetryConfig,
    alerts: AlertConfig,
    db: Option<Arc<dyn Database>>,
    metrics: Option<Arc<SyncMetrics>>,
    state: Mutex<HandlerState>,
}

impl ErrorHandler {
    /// Create a new handler with the given retry and alert configuration
    pub fn new(config: RetryConfig, alerts: AlertConfig) -> Self {
        Self {
            config,
            alerts,
            db: None,
            metrics: None,
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Persist critical classifications to this database
    pub fn with_database(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    /// Export error and retry counters to OpenTelemetry
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Classify an error and record it in metrics and the recent-error ring
    pub fn classify<E: Classifiable + ?Sized>(
        &self,
        err: &E,
        context: &[(&str, &str)],
    ) -> ClassifiedError {
        let classified = classifier::classify(err, context);

        {
            let mut state = self.lock();
            state.metrics.total_errors += 1;
            *state
                .metrics
                .by_type
                .entry(classified.error_type.to_string())
                .or_default() += 1;
            *state
                .metrics
                .by_severity
                .entry(classified.severity.to_string())
                .or_default() += 1;

            if self.alerts.recent_error_capacity > 0 {
                while state.recent.len() >= self.alerts.recent_error_capacity {
                    state.recent.pop_front();
                }
                state.recent.push_back(classified.clone());
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_error(classified.error_type, classified.severity);
        }

        classified
    }

    async fn persist_if_critical(&self, classified: &ClassifiedError) {
        if classified.severity != ErrorSeverity::Critical {
            return;
        }

        error!(
            error_type = %classified.error_type,
            error = %classified.original,
            "Critical error"
        );

        if let Some(db) = &self.db {
            if let Err(e) = db.insert_error_log(&ErrorLogEntry::from(classified)).await {
                warn!(error = %e, "Failed to persist critical error");
            }
        }
    }

    /// Execute an async operation with classified retry using the default config
    pub async fn with_retry<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classifiable,
    {
        let config = self.config.clone();
        self.with_retry_config(&config, operation_name, operation)
            .await
    }

    /// Execute an async operation with classified retry
    ///
    /// The operation is attempted up to `max_attempts` times. After each
    /// failure the error is classified; non-retryable errors and the last
    /// attempt's error are returned to the caller. Otherwise the handler waits
    /// for the larger of the suggested delay and the exponential backoff.
    pub async fn with_retry_config<F, Fut, T, E>(
        &self,
        config: &RetryConfig,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classifiable,
    {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        self.lock().metrics.retries_succeeded += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.record_retry_outcome(true);
                        }
                        debug!(
                            operation = operation_name,
                            attempts = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => {
                    let attempt_str = attempt.to_string();
                    let classified = self.classify(
                        &err,
                        &[("operation", operation_name), ("attempt", attempt_str.as_str())],
                    );

                    if !classified.should_retry || attempt >= max_attempts {
                        if attempt > 1 {
                            self.lock().metrics.retries_failed += 1;
                            if let Some(metrics) = &self.metrics {
                                metrics.record_retry_outcome(false);
                            }
                        }
                        if attempt >= max_attempts && classified.should_retry {
                            warn!(
                                operation = operation_name,
                                attempts = attempt,
                                max_attempts = max_attempts,
                                error = %err,
                                "Max attempts exhausted"
                            );
                        }
                        self.persist_if_critical(&classified).await;
                        return Err(err);
                    }

                    let suggested = Duration::from_millis(classified.retry_after_ms.unwrap_or(0));
                    let delay = suggested.max(calculate_backoff(config, attempt));
                    self.lock().metrics.retries_attempted += 1;

                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error_type = %classified.error_type,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after classified error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate the backoff for a 1-based attempt number using the default config
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(&self.config, attempt)
    }

    /// Read-only snapshot of the cumulative counters
    pub fn get_metrics(&self) -> ErrorMetrics {
        self.lock().metrics.clone()
    }

    /// Most recent classified errors, newest first
    pub fn get_recent_errors(&self, limit: usize) -> Vec<ClassifiedError> {
        self.lock().recent.iter().rev().take(limit).cloned().collect()
    }

    /// Error counts over the trailing `hours`
    pub async fn get_error_stats(&self, hours: i64) -> Result<ErrorStats, DbError> {
        let since = Utc::now() - ChronoDuration::hours(hours);

        let mut stats = ErrorStats {
            hours,
            ..Default::default()
        };
        {
            let state = self.lock();
            for err in state.recent.iter().filter(|e| e.occurred_at >= since) {
                stats.total += 1;
                *stats.by_type.entry(err.error_type.to_string()).or_default() += 1;
                *stats
                    .by_severity
                    .entry(err.severity.to_string())
                    .or_default() += 1;
            }
        }

        if let Some(db) = &self.db {
            stats.persisted_critical = db
                .get_error_logs_since(since)
                .await?
                .iter()
                .filter(|e| e.severity == ErrorSeverity::Critical)
                .count() as u64;
        }

        Ok(stats)
    }

    /// More than the configured number of errors, or any critical one, in the last hour
    pub fn should_alert(&self) -> bool {
        let since = Utc::now() - ChronoDuration::hours(1);
        let state = self.lock();

        let mut count = 0usize;
        for err in state.recent.iter().filter(|e| e.occurred_at >= since) {
            if err.severity == ErrorSeverity::Critical {
                return true;
            }
            count += 1;
        }
        count > self.alerts.error_threshold_per_hour
    }
}

/// Exponential backoff with bounded jitter
///
/// `initial_delay * multiplier^(attempt-1)`, capped at `max_delay`, plus a
/// random `0..=jitter` milliseconds.
pub fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = config.initial_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = base.min(config.max_delay_ms as f64).max(0.0) as u64;

    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
