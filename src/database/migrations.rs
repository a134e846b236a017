//! Database schema for legis-sync
//!
//! Snapshot tables are keyed by their natural composite key so that upserts can
//! never create duplicates.

/// SQL statement to create the database schema
pub const CREATE_SCHEMA: &str = r#"
-- Bill snapshots, keyed by congress-type-number
CREATE TABLE IF NOT EXISTS bills (
    bill_id TEXT PRIMARY KEY,
    congress INTEGER NOT NULL,
    bill_type TEXT NOT NULL,
    number TEXT NOT NULL,
    title TEXT,
    latest_action_date TEXT,
    latest_action_text TEXT,
    sponsor_id TEXT,
    sponsor_name TEXT,
    policy_area TEXT,
    law_number TEXT,
    cosponsor_count INTEGER,
    origin_chamber TEXT,
    update_date TEXT,
    priority INTEGER NOT NULL DEFAULT 0,
    schema_version INTEGER NOT NULL DEFAULT 1,
    payload TEXT NOT NULL DEFAULT 'null',
    synced_at TEXT NOT NULL,
    UNIQUE(congress, bill_type, number)
);

CREATE INDEX IF NOT EXISTS idx_bills_priority ON bills(priority) WHERE priority = 1;

-- Member snapshots, keyed by bioguide id
CREATE TABLE IF NOT EXISTS members (
    bioguide_id TEXT PRIMARY KEY,
    name TEXT,
    party TEXT,
    state TEXT,
    district INTEGER,
    chamber TEXT,
    current INTEGER NOT NULL DEFAULT 0,
    update_date TEXT,
    payload TEXT NOT NULL DEFAULT 'null',
    synced_at TEXT NOT NULL
);

-- Hearing snapshots, keyed by congress-chamber-jacket
CREATE TABLE IF NOT EXISTS hearings (
    hearing_id TEXT PRIMARY KEY,
    congress INTEGER NOT NULL,
    chamber TEXT NOT NULL,
    jacket_number TEXT NOT NULL,
    title TEXT,
    date TEXT,
    committee TEXT,
    update_date TEXT,
    payload TEXT NOT NULL DEFAULT 'null',
    synced_at TEXT NOT NULL,
    UNIQUE(congress, chamber, jacket_number)
);

-- One row per orchestrator invocation per resource type
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_type TEXT NOT NULL,
    strategy TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    started_at TEXT NOT NULL,
    completed_at TEXT,
    records_fetched INTEGER NOT NULL DEFAULT 0,
    records_created INTEGER NOT NULL DEFAULT 0,
    records_updated INTEGER NOT NULL DEFAULT 0,
    records_unchanged INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    duration_ms INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at DESC);
CREATE INDEX IF NOT EXISTS idx_sync_runs_resource ON sync_runs(resource_type, status, started_at DESC);

-- Deferred work ledger
CREATE TABLE IF NOT EXISTS sync_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    scheduled_for TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT,
    result TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_jobs_claim ON sync_jobs(status, scheduled_for, priority DESC);

-- Detected changes, flipped to notified by the notification pipeline
CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id TEXT NOT NULL,
    change_type TEXT NOT NULL,
    previous_value TEXT NOT NULL DEFAULT 'null',
    new_value TEXT NOT NULL DEFAULT 'null',
    significance TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    notified INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_change_log_resource ON change_log(resource_id);
CREATE INDEX IF NOT EXISTS idx_change_log_detected ON change_log(detected_at DESC);
CREATE INDEX IF NOT EXISTS idx_change_log_unnotified ON change_log(notified) WHERE notified = 0;

-- Critical classified errors kept for operator review
CREATE TABLE IF NOT EXISTS error_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    error_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    original TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '{}',
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_error_log_time ON error_log(occurred_at DESC);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
