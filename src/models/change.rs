//! Change-detection models
//!
//! This module defines change types, significance levels, detected events and
//! the persisted change log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of difference detected between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Status,
    Title,
    Action,
    Cosponsors,
    Summary,
    PolicyArea,
    Law,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Status => "status",
            ChangeType::Title => "title",
            ChangeType::Action => "action",
            ChangeType::Cosponsors => "cosponsors",
            ChangeType::Summary => "summary",
            ChangeType::PolicyArea => "policy_area",
            ChangeType::Law => "law",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "status" => Ok(ChangeType::Status),
            "title" => Ok(ChangeType::Title),
            "action" => Ok(ChangeType::Action),
            "cosponsors" => Ok(ChangeType::Cosponsors),
            "summary" => Ok(ChangeType::Summary),
            "policy_area" => Ok(ChangeType::PolicyArea),
            "law" => Ok(ChangeType::Law),
            _ => Err(format!("Invalid change type: {}", s)),
        }
    }
}

/// How noteworthy a change is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    Low,
    Medium,
    High,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Low => "low",
            Significance::Medium => "medium",
            Significance::High => "high",
        }
    }
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Significance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Significance::Low),
            "medium" => Ok(Significance::Medium),
            "high" => Ok(Significance::High),
            _ => Err(format!("Invalid significance: {}", s)),
        }
    }
}

/// A detected, not yet persisted, change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,

    /// `Value::Null` when there was no previous value
    pub previous_value: Value,

    pub new_value: Value,

    pub significance: Significance,
}

impl ChangeEvent {
    pub fn new(
        change_type: ChangeType,
        previous_value: Value,
        new_value: Value,
        significance: Significance,
    ) -> Self {
        Self {
            change_type,
            previous_value,
            new_value,
            significance,
        }
    }
}

/// One persisted change for one resource instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Database ID (set after insertion)
    pub id: Option<i64>,

    /// Natural key of the resource (e.g. `118-hr-1234`)
    pub resource_id: String,

    pub change_type: ChangeType,

    pub previous_value: Value,

    pub new_value: Value,

    pub significance: Significance,

    pub detected_at: DateTime<Utc>,

    /// Flips false → true once, never back
    pub notified: bool,
}

impl ChangeLogEntry {
    /// Build an un-notified entry from a detected event
    pub fn from_event(resource_id: impl Into<String>, event: &ChangeEvent) -> Self {
        Self {
            id: None,
            resource_id: resource_id.into(),
            change_type: event.change_type,
            previous_value: event.previous_value.clone(),
            new_value: event.new_value.clone(),
            significance: event.significance,
            detected_at: Utc::now(),
            notified: false,
        }
    }
}

/// Aggregate counts over the change log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub days: i64,
    pub total: u64,
    pub unnotified: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_significance: BTreeMap<String, u64>,
}

/// A bill that changed recently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillChangeSummary {
    pub bill_id: String,
    pub title: Option<String>,
    pub change_count: u64,
    pub last_change_at: DateTime<Utc>,
    pub highest_significance: Significance,
}
