//! # Temporal Normalizer
//!
//! Query generators can only write dates as strings, but the store compares
//! dates by type: a string never matches a date field. [`normalize`] rewrites
//! every date-shaped string into a native [`Value::DateTime`], along with the
//! single-key wrappers `{"dateValue": ...}` and `{"$date": ...}`. The second
//! is the extended-JSON form dates are serialized in, so a query that went out
//! through [`Value::to_json`] normalizes back to the same dates.
//!
//! Only full UTC timestamps qualify:
//!
//! ```text
//! 2025-03-14T00:00:00Z
//! 2025-03-14T00:00:00.000Z
//! ```
//!
//! Calendar dates (`2025-03-14`) and offset timestamps (`+02:00`) are left as
//! strings. That boundary is kept deliberately narrow; widening it changes
//! which strings in a query silently become dates.

use crate::query::StructuredQuery;
use crate::value::{Document, Value};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Key of the single-field wrapper object that always denotes a date.
pub const DATE_WRAPPER_KEY: &str = "dateValue";

/// Extended-JSON date key, as written by [`Value::to_json`].
pub const EXTENDED_DATE_KEY: &str = "$date";

fn iso_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{1,3})?Z$")
            .expect("static ISO-8601 pattern")
    })
}

/// Whether `s` has the exact lexical shape of a UTC timestamp.
pub fn is_temporal_string(s: &str) -> bool {
    iso_pattern().is_match(s)
}

/// Parse a strictly shaped UTC timestamp. Out-of-range fields (month 13)
/// yield `None`, so the string is kept as-is.
pub fn parse_temporal(s: &str) -> Option<DateTime<Utc>> {
    if !is_temporal_string(s) {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The wrapper is an explicit date marker, so it accepts any RFC 3339
/// timestamp or a bare calendar date at UTC midnight.
fn parse_wrapped(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn unwrap_date_value(doc: &Document) -> Option<DateTime<Utc>> {
    if doc.len() != 1 {
        return None;
    }
    let inner = doc
        .get(DATE_WRAPPER_KEY)
        .or_else(|| doc.get(EXTENDED_DATE_KEY))?;
    match inner {
        Value::String(s) => parse_wrapped(s),
        Value::DateTime(dt) => Some(*dt),
        _ => None,
    }
}

/// Return a copy of `value` with every temporal value converted to a native
/// date. Total and idempotent; the input is never modified.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => match parse_temporal(s) {
            Some(dt) => Value::DateTime(dt),
            None => value.clone(),
        },
        Value::Document(doc) => match unwrap_date_value(doc) {
            Some(dt) => Value::DateTime(dt),
            None => Value::Document(
                doc.iter()
                    .map(|(k, v)| (k.clone(), normalize(v)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Normalize every stage of a query.
pub fn normalize_query(query: &StructuredQuery) -> StructuredQuery {
    StructuredQuery::new(query.stages().iter().map(normalize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn march_14() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_nested_string_becomes_date() {
        let input = Value::from(json!({
            "$match": {"createdAt": {"$gte": "2025-03-14T00:00:00.000Z"}}
        }));
        let out = normalize(&input);
        let doc = out.as_document().unwrap();
        assert_eq!(
            doc.get_path("$match.createdAt.$gte"),
            Some(&Value::DateTime(march_14()))
        );
    }

    #[test]
    fn test_date_inside_array() {
        let input = Value::from(json!({
            "$or": [{"at": "2025-03-14T00:00:00Z"}, {"at": {"$in": ["2025-03-14T00:00:00.000Z"]}}]
        }));
        let out = normalize(&input);
        let branches = out.as_document().unwrap().get("$or").unwrap().as_array().unwrap();
        assert_eq!(
            branches[0].as_document().unwrap().get("at"),
            Some(&Value::DateTime(march_14()))
        );
        let listed = branches[1].as_document().unwrap().get_path("at.$in").unwrap();
        assert_eq!(listed, &Value::Array(vec![Value::DateTime(march_14())]));
    }

    #[test]
    fn test_date_value_wrapper() {
        let input = Value::from(json!({"since": {"dateValue": "2025-03-14T00:00:00.000Z"}}));
        let out = normalize(&input);
        assert_eq!(
            out.as_document().unwrap().get("since"),
            Some(&Value::DateTime(march_14()))
        );
    }

    #[test]
    fn test_date_value_wrapper_with_extra_keys_is_recursed() {
        let input = Value::from(json!({"dateValue": "2025-03-14T00:00:00.000Z", "note": "x"}));
        let out = normalize(&input);
        let doc = out.as_document().unwrap();
        assert_eq!(doc.get("dateValue"), Some(&Value::DateTime(march_14())));
        assert_eq!(doc.get("note"), Some(&Value::from("x")));
    }

    #[test]
    fn test_extended_json_date_wrapper() {
        let input = Value::from(json!({
            "$match": {"createdAt": {"$gte": {"$date": "2025-03-14T00:00:00.000Z"}}}
        }));
        let out = normalize(&input);
        assert_eq!(
            out.as_document().unwrap().get_path("$match.createdAt.$gte"),
            Some(&Value::DateTime(march_14()))
        );
    }

    #[test]
    fn test_serialized_query_normalizes_back() {
        let query = normalize_query(
            &StructuredQuery::parse(r#"[{"$match": {"at": {"$lt": "2025-03-14T00:00:00.000Z"}}}]"#)
                .unwrap(),
        );
        let echoed = StructuredQuery::parse(&query.to_string()).unwrap();
        assert_eq!(normalize_query(&echoed), query);
    }

    #[test]
    fn test_extended_date_with_non_date_payload_is_kept() {
        let input = Value::from(json!({"$date": 17}));
        assert_eq!(normalize(&input), input);
        let input = Value::from(json!({"$date": "soon"}));
        assert_eq!(normalize(&input), input);
    }

    #[test]
    fn test_calendar_date_passes_through() {
        let input = Value::from(json!({"day": "2025-03-14"}));
        assert_eq!(normalize(&input), input);
    }

    #[test]
    fn test_offset_timestamp_passes_through() {
        let input = Value::from(json!("2025-03-14T00:00:00+02:00"));
        assert_eq!(normalize(&input), input);
    }

    #[test]
    fn test_out_of_range_timestamp_passes_through() {
        let input = Value::from(json!("2025-13-40T00:00:00Z"));
        assert_eq!(normalize(&input), input);
    }

    #[test]
    fn test_idempotent() {
        let input = Value::from(json!([
            {"$match": {"at": {"$lt": "2025-03-14T00:00:00.000Z"}, "n": 3, "ok": true}},
            {"$project": {"when": {"dateValue": "2025-03-14"}, "none": null}},
            {"$limit": 5}
        ]));
        let once = normalize(&input);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_total_over_scalars_and_empties() {
        for input in [
            json!(null),
            json!(true),
            json!(1.5),
            json!(""),
            json!([]),
            json!({}),
            json!([[[{}]]]),
        ] {
            let value = Value::from(input);
            assert_eq!(normalize(&value), value);
        }
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = Value::from(json!({"at": "2025-03-14T00:00:00.000Z"}));
        let snapshot = input.clone();
        let _ = normalize(&input);
        assert_eq!(input, snapshot);
    }
}
