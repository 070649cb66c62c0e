//! Field predicates for reads, updates, and deletes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use parley_types::parse_timestamp;

use crate::document::Document;

/// Constraint on a single document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The field must equal this JSON value exactly.
    Eq(Value),

    /// The field must be a timestamp inside the half-open window
    /// `[gte, lt)`. Absent bounds are unconstrained. A stored value that does
    /// not parse as a timestamp never matches; an unparseable bound never
    /// matches anything.
    TimeRange {
        gte: Option<String>,
        lt: Option<String>,
    },
}

/// A conjunction of per-field constraints.
///
/// An empty predicate matches every document. Fields are matched by name; a
/// document missing a constrained field does not match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    fields: BTreeMap<String, Filter>,
}

impl Predicate {
    /// A predicate that matches all documents.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality constraint on `name`.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), Filter::Eq(value.into()));
        self
    }

    /// Adds a timestamp-window constraint on `name`.
    #[must_use]
    pub fn time_range(
        mut self,
        name: impl Into<String>,
        gte: Option<String>,
        lt: Option<String>,
    ) -> Self {
        self.fields.insert(name.into(), Filter::TimeRange { gte, lt });
        self
    }

    /// Removes the constraint on `name`, if any.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    /// Returns true if no fields are constrained.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns true if `doc` satisfies every constraint.
    pub fn matches(&self, doc: &Document) -> bool {
        self.fields.iter().all(|(name, filter)| {
            let Some(stored) = doc.get(name) else {
                return false;
            };
            match filter {
                Filter::Eq(expected) => stored == expected,
                Filter::TimeRange { gte, lt } => time_in_range(stored, gte.as_deref(), lt.as_deref()),
            }
        })
    }
}

/// Compares a stored timestamp value against a half-open window.
fn time_in_range(stored: &Value, gte: Option<&str>, lt: Option<&str>) -> bool {
    let Some(instant) = stored.as_str().and_then(parse_timestamp) else {
        return false;
    };
    if let Some(bound) = gte {
        match parse_timestamp(bound) {
            Some(b) if instant >= b => {}
            _ => return false,
        }
    }
    if let Some(bound) = lt {
        match parse_timestamp(bound) {
            Some(b) if instant < b => {}
            _ => return false,
        }
    }
    true
}

/// Builds the `[center − 1 s, center + 1 s)` window used for tolerant
/// timestamp matching.
pub fn second_window(center: DateTime<Utc>) -> (String, String) {
    let start = center - chrono::Duration::seconds(1);
    let end = center + chrono::Duration::seconds(1);
    (
        parley_types::format_timestamp(start),
        parley_types::format_timestamp(end),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::format_timestamp;
    use serde_json::json;
    use test_case::test_case;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn empty_predicate_matches_everything() {
        assert!(Predicate::all().matches(&doc(&[("x", json!(1))])));
        assert!(Predicate::all().matches(&Document::new()));
    }

    #[test]
    fn equality_on_missing_field_fails() {
        let p = Predicate::all().field("user_name", "alice");
        assert!(!p.matches(&doc(&[("other", json!("alice"))])));
    }

    #[test]
    fn conjunction_requires_all_fields() {
        let p = Predicate::all().field("sender", "alice").field("receiver", "bob");
        assert!(p.matches(&doc(&[("sender", json!("alice")), ("receiver", json!("bob"))])));
        assert!(!p.matches(&doc(&[("sender", json!("alice")), ("receiver", json!("carol"))])));
    }

    #[test_case(-999, true; "999ms early still matches")]
    #[test_case(999, true; "999ms late still matches")]
    #[test_case(-1500, false; "1.5s early misses")]
    #[test_case(1000, false; "exactly +1s is excluded")]
    fn window_tolerance(offset_ms: i64, expected: bool) {
        let center = Utc::now();
        let stored = center + chrono::Duration::milliseconds(offset_ms);
        let (gte, lt) = second_window(center);
        let p = Predicate::all().time_range("timestamp", Some(gte), Some(lt));
        let d = doc(&[("timestamp", json!(format_timestamp(stored)))]);
        assert_eq!(p.matches(&d), expected);
    }

    #[test]
    fn unparseable_stored_timestamp_never_matches() {
        let (gte, lt) = second_window(Utc::now());
        let p = Predicate::all().time_range("timestamp", Some(gte), Some(lt));
        assert!(!p.matches(&doc(&[("timestamp", json!("not-a-time"))])));
        assert!(!p.matches(&doc(&[("timestamp", json!(42))])));
    }

    #[test]
    fn unparseable_bound_never_matches() {
        let p = Predicate::all().time_range(
            "timestamp",
            Some("garbage".to_string()),
            None,
        );
        let d = doc(&[("timestamp", json!(format_timestamp(Utc::now())))]);
        assert!(!p.matches(&d));
    }

    #[test]
    fn without_drops_a_constraint() {
        let p = Predicate::all()
            .field("sender", "alice")
            .time_range("timestamp", None, None)
            .without("timestamp");
        assert!(p.matches(&doc(&[("sender", json!("alice"))])));
    }
}
