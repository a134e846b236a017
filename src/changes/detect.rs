//! Snapshot diff rules
//!
//! A pure function of two bill snapshots. Each rule independently yields
//! zero or one event; a missing old snapshot yields only the STATUS event.

use serde_json::{json, Value};

use crate::models::{BillSnapshot, ChangeEvent, ChangeType, Significance};

/// Value reported for a bill seen for the first time
pub const INTRODUCED: &str = "introduced";

fn opt_value(v: &Option<String>) -> Value {
    v.as_deref().map_or(Value::Null, |s| Value::String(s.to_string()))
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

/// Diff two bill snapshots into typed, significance-ranked events
pub fn detect_changes(old: Option<&BillSnapshot>, new: &BillSnapshot) -> Vec<ChangeEvent> {
    let Some(old) = old else {
        return vec![ChangeEvent::new(
            ChangeType::Status,
            Value::Null,
            json!(INTRODUCED),
            Significance::High,
        )];
    };

    let mut events = Vec::new();

    if is_blank(&old.law_number) && !is_blank(&new.law_number) {
        events.push(ChangeEvent::new(
            ChangeType::Law,
            opt_value(&old.law_number),
            opt_value(&new.law_number),
            Significance::High,
        ));
    }

    if old.title != new.title {
        events.push(ChangeEvent::new(
            ChangeType::Title,
            opt_value(&old.title),
            opt_value(&new.title),
            Significance::Medium,
        ));
    }

    if old.latest_action_date != new.latest_action_date
        || old.latest_action_text != new.latest_action_text
    {
        events.push(ChangeEvent::new(
            ChangeType::Action,
            json!({"date": old.latest_action_date, "text": old.latest_action_text}),
            json!({"date": new.latest_action_date, "text": new.latest_action_text}),
            Significance::High,
        ));
    }

    if old.policy_area != new.policy_area {
        events.push(ChangeEvent::new(
            ChangeType::PolicyArea,
            opt_value(&old.policy_area),
            opt_value(&new.policy_area),
            Significance::Low,
        ));
    }

    if let Some(event) = cosponsor_change(old.cosponsor_count, new.cosponsor_count) {
        events.push(event);
    }

    events
}

/// Only compares two known counts; a count the list endpoint left out is
/// unknown, not zero
fn cosponsor_change(old: Option<u32>, new: Option<u32>) -> Option<ChangeEvent> {
    let (old, new) = (old?, new?);
    if old == new {
        return None;
    }

    let significance = if new > old {
        Significance::Medium
    } else {
        Significance::Low
    };

    Some(ChangeEvent::new(
        ChangeType::Cosponsors,
        json!({"count": old}),
        json!({"count": new}),
        significance,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bill() -> BillSnapshot {
        BillSnapshot::new(118, "hr", "1234")
            .with_title("Clean Water Act")
            .with_latest_action("2024-01-10", "Referred to committee")
            .with_policy_area("Environmental Protection")
            .with_cosponsor_count(5)
    }

    fn of_type(events: &[ChangeEvent], t: ChangeType) -> Vec<&ChangeEvent> {
        events.iter().filter(|e| e.change_type == t).collect()
    }

    // Test 1: New bill yields a single STATUS event
    #[test]
    fn test_new_bill() {
        let new = BillSnapshot::new(118, "hr", "1").with_title("X");
        let events = detect_changes(None, &new);

        assert_eq!(
            events,
            vec![ChangeEvent::new(
                ChangeType::Status,
                Value::Null,
                json!("introduced"),
                Significance::High
            )]
        );
    }

    // Test 2: New bill skips other rules even with populated fields
    #[test]
    fn test_new_bill_skips_other_rules() {
        let new = bill().with_law_number("PL-118-1");
        let events = detect_changes(None, &new);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].change_type, ChangeType::Status);
    }

    // Test 3: Equal snapshots yield nothing
    #[test]
    fn test_equal_snapshots() {
        assert!(detect_changes(Some(&bill()), &bill()).is_empty());
    }

    // Test 4: Bill becomes law
    #[test]
    fn test_becomes_law() {
        let old = bill();
        let new = bill().with_law_number("PL-118-1");
        let events = detect_changes(Some(&old), &new);

        let law = of_type(&events, ChangeType::Law);
        assert_eq!(law.len(), 1);
        assert_eq!(law[0].significance, Significance::High);
        assert_eq!(law[0].new_value, json!("PL-118-1"));
        assert!(of_type(&events, ChangeType::Status).is_empty());
    }

    // Test 5: Law number changing from one value to another is not "newly present"
    #[test]
    fn test_law_rule_requires_empty_old() {
        let old = bill().with_law_number("PL-118-1");
        let new = bill().with_law_number("PL-118-2");
        assert!(of_type(&detect_changes(Some(&old), &new), ChangeType::Law).is_empty());

        let blank = bill().with_law_number("  ");
        let events = detect_changes(Some(&blank), &new);
        assert_eq!(of_type(&events, ChangeType::Law).len(), 1);
    }

    // Test 6: Cosponsor growth
    #[test]
    fn test_cosponsor_growth() {
        let old = bill().with_cosponsor_count(5);
        let new = bill().with_cosponsor_count(10);
        let events = detect_changes(Some(&old), &new);

        assert_eq!(
            events,
            vec![ChangeEvent::new(
                ChangeType::Cosponsors,
                json!({"count": 5}),
                json!({"count": 10}),
                Significance::Medium
            )]
        );
    }

    // Test 7: Cosponsor significance ignores magnitude
    #[test]
    fn test_cosponsor_significance() {
        let plus_one = detect_changes(
            Some(&bill().with_cosponsor_count(5)),
            &bill().with_cosponsor_count(6),
        );
        assert_eq!(plus_one[0].significance, Significance::Medium);

        let drop = detect_changes(
            Some(&bill().with_cosponsor_count(5)),
            &bill().with_cosponsor_count(1),
        );
        assert_eq!(drop[0].significance, Significance::Low);
    }

    // Test 8: Cosponsor rule skipped unless both sides have a count
    #[test]
    fn test_cosponsor_unknown_count() {
        let mut unknown = bill();
        unknown.cosponsor_count = None;
        assert!(detect_changes(Some(&unknown), &unknown).is_empty());

        // Detail fetch fills in a count the list item lacked
        assert!(detect_changes(Some(&unknown), &bill().with_cosponsor_count(3)).is_empty());

        // List refresh drops a count the detail fetch had stored
        assert!(detect_changes(Some(&bill().with_cosponsor_count(12)), &unknown).is_empty());
    }

    // Test 9: Significance is fixed per change type
    #[test]
    fn test_significance_per_type() {
        let old = bill();
        let mut new = bill()
            .with_title("Clean Water Act of 2024")
            .with_latest_action("2024-02-01", "Passed House")
            .with_policy_area("Water Resources")
            .with_law_number("PL-118-9");
        new.cosponsor_count = Some(2);

        let events = detect_changes(Some(&old), &new);
        assert_eq!(events.len(), 5);

        for event in &events {
            let expected = match event.change_type {
                ChangeType::Law | ChangeType::Action => Significance::High,
                ChangeType::Title => Significance::Medium,
                ChangeType::PolicyArea | ChangeType::Cosponsors => Significance::Low,
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(event.significance, expected, "{:?}", event.change_type);
        }
    }

    // Test 10: Action captures both date and text pairs
    #[test]
    fn test_action_pair() {
        let old = bill();
        let new = bill().with_latest_action("2024-01-10", "Reported by committee");
        let events = detect_changes(Some(&old), &new);

        let action = of_type(&events, ChangeType::Action);
        assert_eq!(action.len(), 1);
        assert_eq!(
            action[0].previous_value,
            json!({"date": "2024-01-10", "text": "Referred to committee"})
        );
        assert_eq!(
            action[0].new_value,
            json!({"date": "2024-01-10", "text": "Reported by committee"})
        );
    }

    // Test 11: Opaque payload churn alone produces no events
    #[test]
    fn test_payload_only_change() {
        let old = bill();
        let mut new = bill();
        new.payload = json!({"updateDateIncludingText": "2024-05-01"});
        new.update_date = Some("2024-05-01".to_string());
        assert!(detect_changes(Some(&old), &new).is_empty());
    }
}
