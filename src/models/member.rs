//! Member snapshot model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{json_str, json_u32};
use crate::error::SyncError;

/// Locally cached representation of one member of Congress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    /// Stable external id (natural key)
    pub bioguide_id: String,

    pub name: Option<String>,

    pub party: Option<String>,

    pub state: Option<String>,

    pub district: Option<u32>,

    /// Chamber of the most recent term
    pub chamber: Option<String>,

    /// Currently serving
    pub current: bool,

    pub update_date: Option<String>,

    pub payload: Value,
}

impl MemberSnapshot {
    pub fn new(bioguide_id: impl Into<String>) -> Self {
        Self {
            bioguide_id: bioguide_id.into(),
            name: None,
            party: None,
            state: None,
            district: None,
            chamber: None,
            current: false,
            update_date: None,
            payload: Value::Null,
        }
    }

    /// Parse an upstream member record (list item or `{"member": {...}}` detail)
    pub fn from_payload(payload: &Value) -> Result<Self, SyncError> {
        let record = payload.get("member").unwrap_or(payload);
        let bioguide_id = json_str(record, "bioguideId")
            .ok_or_else(|| SyncError::InvalidData("member payload missing bioguideId".to_string()))?;

        let terms: Vec<&Value> = match record.get("terms") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(obj @ Value::Object(_)) => obj
                .get("item")
                .and_then(Value::as_array)
                .map(|items| items.iter().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let last_term = terms.last().copied();

        let current = match record.get("currentMember").and_then(Value::as_bool) {
            Some(flag) => flag,
            None => last_term.is_some_and(|t| t.get("endYear").map_or(true, Value::is_null)),
        };

        Ok(Self {
            bioguide_id,
            name: json_str(record, "name").or_else(|| json_str(record, "directOrderName")),
            party: json_str(record, "partyName"),
            state: json_str(record, "state"),
            district: json_u32(record, "district"),
            chamber: last_term.and_then(|t| json_str(t, "chamber")),
            current,
            update_date: json_str(record, "updateDate"),
            payload: record.clone(),
        })
    }

    /// Whether any surfaced column differs
    pub fn significant_fields_differ(&self, other: &MemberSnapshot) -> bool {
        self.name != other.name
            || self.party != other.party
            || self.state != other.state
            || self.district != other.district
            || self.chamber != other.chamber
            || self.current != other.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_list_item() {
        let payload = json!({
            "bioguideId": "P000197",
            "name": "Pelosi, Nancy",
            "partyName": "Democratic",
            "state": "California",
            "district": 11,
            "terms": {"item": [
                {"chamber": "House of Representatives", "startYear": 1987, "endYear": null}
            ]},
            "updateDate": "2024-02-01T12:00:00Z"
        });

        let member = MemberSnapshot::from_payload(&payload).unwrap();

        assert_eq!(member.bioguide_id, "P000197");
        assert_eq!(member.party.as_deref(), Some("Democratic"));
        assert_eq!(member.district, Some(11));
        assert_eq!(member.chamber.as_deref(), Some("House of Representatives"));
        assert!(member.current);
    }

    #[test]
    fn test_current_member_flag_wins() {
        let payload = json!({"member": {
            "bioguideId": "X1",
            "currentMember": false,
            "terms": [{"chamber": "Senate", "startYear": 2001}]
        }});
        let member = MemberSnapshot::from_payload(&payload).unwrap();
        assert!(!member.current);
        assert_eq!(member.chamber.as_deref(), Some("Senate"));
    }

    #[test]
    fn test_missing_id() {
        assert!(matches!(
            MemberSnapshot::from_payload(&json!({"name": "Nobody"})),
            Err(SyncError::InvalidData(_))
        ));
    }

    #[test]
    fn test_significance_ignores_payload() {
        let mut a = MemberSnapshot::new("A1");
        a.party = Some("Independent".to_string());
        let mut b = a.clone();
        b.payload = json!({"depiction": "new.jpg"});
        b.update_date = Some("2024-05-05".to_string());
        assert!(!a.significant_fields_differ(&b));

        b.party = Some("Democratic".to_string());
        assert!(a.significant_fields_differ(&b));
    }
}
