//! Bill snapshot model
//!
//! Upstream bill payloads come in two shapes (list items and detail records)
//! and carry cosponsor information in several places. [`BillSnapshot::from_payload`]
//! normalises all of them into one fixed shape at ingestion time so that change
//! detection never has to inspect the raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{json_str, json_u32};
use crate::error::SyncError;

/// Version of the normalisation applied by [`BillSnapshot::from_payload`]
pub const BILL_SCHEMA_VERSION: u32 = 1;

/// Locally cached representation of one upstream bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillSnapshot {
    /// Congress number (e.g. 118)
    pub congress: u32,

    /// Bill type, lowercased (hr, s, hjres, ...)
    pub bill_type: String,

    /// Bill number within its type
    pub number: String,

    pub title: Option<String>,

    pub latest_action_date: Option<String>,

    pub latest_action_text: Option<String>,

    /// Sponsor bioguide id
    pub sponsor_id: Option<String>,

    pub sponsor_name: Option<String>,

    pub policy_area: Option<String>,

    /// Public/private law designation once enacted
    pub law_number: Option<String>,

    pub cosponsor_count: Option<u32>,

    pub origin_chamber: Option<String>,

    /// Upstream `updateDate`
    pub update_date: Option<String>,

    /// Watch-listed for the priority strategy
    #[serde(default)]
    pub priority: bool,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Full upstream payload, kept for fields not promoted to columns
    pub payload: Value,
}

fn default_schema_version() -> u32 {
    BILL_SCHEMA_VERSION
}

impl BillSnapshot {
    /// Create a bare snapshot with only the natural key set
    pub fn new(congress: u32, bill_type: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            congress,
            bill_type: bill_type.into().to_lowercase(),
            number: number.into(),
            title: None,
            latest_action_date: None,
            latest_action_text: None,
            sponsor_id: None,
            sponsor_name: None,
            policy_area: None,
            law_number: None,
            cosponsor_count: None,
            origin_chamber: None,
            update_date: None,
            priority: false,
            schema_version: BILL_SCHEMA_VERSION,
            payload: Value::Null,
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the latest action
    pub fn with_latest_action(mut self, date: impl Into<String>, text: impl Into<String>) -> Self {
        self.latest_action_date = Some(date.into());
        self.latest_action_text = Some(text.into());
        self
    }

    /// Set the law designation
    pub fn with_law_number(mut self, law: impl Into<String>) -> Self {
        self.law_number = Some(law.into());
        self
    }

    /// Set the policy area
    pub fn with_policy_area(mut self, area: impl Into<String>) -> Self {
        self.policy_area = Some(area.into());
        self
    }

    /// Set the cosponsor count
    pub fn with_cosponsor_count(mut self, count: u32) -> Self {
        self.cosponsor_count = Some(count);
        self
    }

    /// Natural key, e.g. `118-hr-1234`
    pub fn bill_id(&self) -> String {
        format!("{}-{}-{}", self.congress, self.bill_type, self.number)
    }

    /// Parse an upstream bill record (list item or `{"bill": {...}}` detail)
    pub fn from_payload(payload: &Value) -> Result<Self, SyncError> {
        let record = payload.get("bill").unwrap_or(payload);
        if !record.is_object() {
            return Err(SyncError::InvalidData(
                "bill payload is not an object".to_string(),
            ));
        }

        let congress = json_u32(record, "congress")
            .ok_or_else(|| SyncError::InvalidData("bill payload missing congress".to_string()))?;
        let bill_type = json_str(record, "type")
            .ok_or_else(|| SyncError::InvalidData("bill payload missing type".to_string()))?;
        let number = json_str(record, "number")
            .ok_or_else(|| SyncError::InvalidData("bill payload missing number".to_string()))?;

        let latest_action = record.get("latestAction");
        let sponsor = record
            .get("sponsors")
            .and_then(Value::as_array)
            .and_then(|s| s.first());

        Ok(Self {
            congress,
            bill_type: bill_type.to_lowercase(),
            number,
            title: json_str(record, "title"),
            latest_action_date: latest_action.and_then(|a| json_str(a, "actionDate")),
            latest_action_text: latest_action.and_then(|a| json_str(a, "text")),
            sponsor_id: sponsor.and_then(|s| json_str(s, "bioguideId")),
            sponsor_name: sponsor.and_then(|s| json_str(s, "fullName")),
            policy_area: record
                .get("policyArea")
                .and_then(|p| json_str(p, "name")),
            law_number: extract_law_number(record),
            cosponsor_count: extract_cosponsor_count(record),
            origin_chamber: json_str(record, "originChamber"),
            update_date: json_str(record, "updateDate"),
            priority: false,
            schema_version: BILL_SCHEMA_VERSION,
            payload: record.clone(),
        })
    }

    /// Keep enriched fields that a list item does not carry
    ///
    /// List endpoints omit sponsors, policy area, laws and cosponsors; without
    /// this a page sync would wipe what an earlier detail fetch stored.
    pub fn fill_missing_from(&mut self, existing: &BillSnapshot) {
        fn keep(field: &mut Option<String>, old: &Option<String>) {
            if field.is_none() {
                field.clone_from(old);
            }
        }
        keep(&mut self.title, &existing.title);
        keep(&mut self.latest_action_date, &existing.latest_action_date);
        keep(&mut self.latest_action_text, &existing.latest_action_text);
        keep(&mut self.sponsor_id, &existing.sponsor_id);
        keep(&mut self.sponsor_name, &existing.sponsor_name);
        keep(&mut self.policy_area, &existing.policy_area);
        keep(&mut self.law_number, &existing.law_number);
        keep(&mut self.origin_chamber, &existing.origin_chamber);
        if self.cosponsor_count.is_none() {
            self.cosponsor_count = existing.cosponsor_count;
        }
        self.priority = existing.priority;
    }

    /// Whether any field that change detection looks at differs
    pub fn significant_fields_differ(&self, other: &BillSnapshot) -> bool {
        self.title != other.title
            || self.latest_action_date != other.latest_action_date
            || self.latest_action_text != other.latest_action_text
            || self.policy_area != other.policy_area
            || self.law_number != other.law_number
            || self.sponsor_id != other.sponsor_id
            || self.cosponsor_count != other.cosponsor_count
    }
}

fn extract_law_number(record: &Value) -> Option<String> {
    record
        .get("laws")
        .and_then(Value::as_array)
        .and_then(|laws| laws.first())
        .and_then(|law| json_str(law, "number"))
        .or_else(|| json_str(record, "lawNumber"))
}

/// Cosponsor count, probing `cosponsors.count`, then a `cosponsors` array, then
/// a flat `cosponsorsCount`; first match wins
fn extract_cosponsor_count(record: &Value) -> Option<u32> {
    match record.get("cosponsors") {
        Some(obj @ Value::Object(_)) => {
            if let Some(count) = json_u32(obj, "count") {
                return Some(count);
            }
        }
        Some(Value::Array(items)) => return u32::try_from(items.len()).ok(),
        _ => {}
    }
    json_u32(record, "cosponsorsCount")
}
