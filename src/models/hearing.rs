//! Hearing snapshot model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{json_str, json_u32};
use crate::error::SyncError;

/// Locally cached representation of one committee hearing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HearingSnapshot {
    pub congress: u32,

    /// Chamber, lowercased
    pub chamber: String,

    /// Printing jacket number, unique within congress + chamber
    pub jacket_number: String,

    pub title: Option<String>,

    pub date: Option<String>,

    pub committee: Option<String>,

    pub update_date: Option<String>,

    pub payload: Value,
}

impl HearingSnapshot {
    pub fn new(congress: u32, chamber: impl Into<String>, jacket_number: impl Into<String>) -> Self {
        Self {
            congress,
            chamber: chamber.into().to_lowercase(),
            jacket_number: jacket_number.into(),
            title: None,
            date: None,
            committee: None,
            update_date: None,
            payload: Value::Null,
        }
    }

    /// Natural key, e.g. `118-house-41365`
    pub fn hearing_id(&self) -> String {
        format!("{}-{}-{}", self.congress, self.chamber, self.jacket_number)
    }

    /// Parse an upstream hearing record (list item or `{"hearing": {...}}` detail)
    pub fn from_payload(payload: &Value) -> Result<Self, SyncError> {
        let record = payload.get("hearing").unwrap_or(payload);
        let congress = json_u32(record, "congress")
            .ok_or_else(|| SyncError::InvalidData("hearing payload missing congress".to_string()))?;
        let chamber = json_str(record, "chamber")
            .ok_or_else(|| SyncError::InvalidData("hearing payload missing chamber".to_string()))?;
        let jacket_number = json_str(record, "jacketNumber").ok_or_else(|| {
            SyncError::InvalidData("hearing payload missing jacketNumber".to_string())
        })?;

        let date = record
            .get("dates")
            .and_then(Value::as_array)
            .and_then(|d| d.first())
            .and_then(|d| json_str(d, "date"))
            .or_else(|| json_str(record, "date"));
        let committee = record
            .get("committees")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| json_str(c, "name"));

        Ok(Self {
            congress,
            chamber: chamber.to_lowercase(),
            jacket_number,
            title: json_str(record, "title"),
            date,
            committee,
            update_date: json_str(record, "updateDate"),
            payload: record.clone(),
        })
    }

    /// Keep detail-only fields when a list item omits them
    pub fn fill_missing_from(&mut self, existing: &HearingSnapshot) {
        if self.title.is_none() {
            self.title.clone_from(&existing.title);
        }
        if self.date.is_none() {
            self.date.clone_from(&existing.date);
        }
        if self.committee.is_none() {
            self.committee.clone_from(&existing.committee);
        }
    }

    pub fn significant_fields_differ(&self, other: &HearingSnapshot) -> bool {
        self.title != other.title || self.date != other.date || self.committee != other.committee
    }
}
