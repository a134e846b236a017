//! SyncRun ledger records and sync result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upstream resource families kept in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Bills,
    Members,
    Hearings,
}

impl ResourceType {
    /// Every resource type, in the order the orchestrator visits them
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Bills,
        ResourceType::Members,
        ResourceType::Hearings,
    ];

    /// Name used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Bills => "bills",
            ResourceType::Members => "members",
            ResourceType::Hearings => "hearings",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bills" | "bill" => Ok(ResourceType::Bills),
            "members" | "member" => Ok(ResourceType::Members),
            "hearings" | "hearing" => Ok(ResourceType::Hearings),
            _ => Err(format!("Invalid resource type: {}", s)),
        }
    }
}

/// Named policy controlling which records a sync targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Most recently updated slice, small page
    Incremental,
    /// Unrestricted re-sync for a congress
    Full,
    /// Catch-up for resources outside the freshness window
    Stale,
    /// Large page plus watch-listed bill refresh
    Priority,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Incremental => "incremental",
            SyncStrategy::Full => "full",
            SyncStrategy::Stale => "stale",
            SyncStrategy::Priority => "priority",
        }
    }
}

impl std::fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "incremental" => Ok(SyncStrategy::Incremental),
            "full" => Ok(SyncStrategy::Full),
            "stale" => Ok(SyncStrategy::Stale),
            "priority" => Ok(SyncStrategy::Priority),
            _ => Err(format!("Invalid sync strategy: {}", s)),
        }
    }
}

/// SyncRun lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Partial => "partial",
            SyncRunStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are never left once set
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncRunStatus::Running)
    }
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "partial" => Ok(SyncRunStatus::Partial),
            "failed" => Ok(SyncRunStatus::Failed),
            _ => Err(format!("Invalid sync run status: {}", s)),
        }
    }
}

/// Record counters reported by a resource sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl SyncCounts {
    /// Accumulate another set of counters into this one
    pub fn add(&mut self, other: &SyncCounts) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// A per-record failure captured during a sync, keyed by natural key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Natural key of the offending record (or a page marker)
    pub key: String,

    /// Rendered error message
    pub message: String,
}

impl RecordError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result of one resource sync service call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSyncResult {
    pub counts: SyncCounts,

    /// Per-record failures; non-empty means the run finished partially
    pub errors: Vec<RecordError>,

    pub duration_ms: u64,
}

impl ResourceSyncResult {
    /// Status the owning SyncRun should take
    pub fn run_status(&self) -> SyncRunStatus {
        if self.errors.is_empty() {
            SyncRunStatus::Completed
        } else {
            SyncRunStatus::Partial
        }
    }

    /// Fold another result into this one (used by multi-page runs)
    pub fn merge(&mut self, other: ResourceSyncResult) {
        self.counts.add(&other.counts);
        self.errors.extend(other.errors);
        self.duration_ms += other.duration_ms;
    }
}

/// One audit record of one orchestrator-invoked sync for one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    pub resource_type: ResourceType,

    pub strategy: SyncStrategy,

    pub status: SyncRunStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub counts: SyncCounts,

    pub errors: Vec<RecordError>,

    pub duration_ms: Option<u64>,

    /// Free-form metadata (filter used, job id, ...)
    pub metadata: serde_json::Value,
}

impl SyncRun {
    /// Create a new run in the `running` state
    pub fn new(resource_type: ResourceType, strategy: SyncStrategy) -> Self {
        Self {
            id: None,
            resource_type,
            strategy,
            status: SyncRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            counts: SyncCounts::default(),
            errors: Vec::new(),
            duration_ms: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the start timestamp
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Set the metadata object
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-resource breakdown in [`SyncStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRunStats {
    pub runs: u64,
    pub completed: u64,
    pub partial: u64,
    pub failed: u64,
    /// Captured per-record errors across runs
    pub errors: u64,
}

/// Aggregate view of recent SyncRuns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub hours: i64,
    pub total_runs: u64,
    /// completed / total, 0.0 when there were no runs
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub by_resource: BTreeMap<String, ResourceRunStats>,
}

impl SyncStats {
    /// Compute statistics over a set of runs
    pub fn from_runs(hours: i64, runs: &[SyncRun]) -> Self {
        let mut stats = SyncStats {
            hours,
            ..Default::default()
        };

        let mut completed = 0u64;
        let mut duration_sum = 0u64;
        let mut duration_count = 0u64;

        for run in runs {
            stats.total_runs += 1;
            let entry = stats
                .by_resource
                .entry(run.resource_type.to_string())
                .or_default();
            entry.runs += 1;
            entry.errors += run.errors.len() as u64;

            match run.status {
                SyncRunStatus::Completed => {
                    completed += 1;
                    entry.completed += 1;
                }
                SyncRunStatus::Partial => entry.partial += 1,
                SyncRunStatus::Failed => entry.failed += 1,
                SyncRunStatus::Running => {}
            }

            if let Some(ms) = run.duration_ms {
                duration_sum += ms;
                duration_count += 1;
            }
        }

        if stats.total_runs > 0 {
            stats.success_rate = completed as f64 / stats.total_runs as f64;
        }
        if duration_count > 0 {
            stats.average_duration_ms = duration_sum as f64 / duration_count as f64;
        }

        stats
    }
}
