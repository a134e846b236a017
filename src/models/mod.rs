//! Domain models for legis-sync
//!
//! This module contains the snapshots, ledger records and statistics types used
//! throughout the engine.

pub mod bill;
pub mod change;
pub mod error_log;
pub mod hearing;
pub mod job;
pub mod member;
pub mod sync_run;

// Re-export commonly used types
pub use bill::{BillSnapshot, BILL_SCHEMA_VERSION};
pub use change::{
    BillChangeSummary, ChangeEvent, ChangeLogEntry, ChangeStats, ChangeType, Significance,
};
pub use error_log::{ClassifiedError, ErrorLogEntry, ErrorSeverity, ErrorType};
pub use hearing::HearingSnapshot;
pub use job::{EnqueueOptions, JobStatus, QueueStats, SyncJob, SyncJobPayload, SYNC_JOB_TYPE};
pub use member::MemberSnapshot;
pub use sync_run::{
    RecordError, ResourceRunStats, ResourceSyncResult, ResourceType, SyncCounts, SyncRun,
    SyncRunStatus, SyncStats, SyncStrategy,
};

use serde_json::Value;

/// Read a string field, accepting numbers as well
pub(crate) fn json_str(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read an unsigned field, accepting numeric strings as well
pub(crate) fn json_u32(value: &Value, key: &str) -> Option<u32> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
