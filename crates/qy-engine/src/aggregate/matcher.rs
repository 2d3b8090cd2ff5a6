//! # Query Filters
//!
//! Evaluates `$match` filter documents: implicit equality, comparison and
//! set operators, logical combinators, `$regex`, `$exists` and `$expr`.
//! A field holding an array matches when the array itself or any element does.

use super::compare::{query_cmp, values_equal};
use super::expr;
use qy_core::{Document, Value};
use regex::RegexBuilder;
use std::cmp::Ordering;

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, String> {
    for (key, cond) in filter.iter() {
        let ok = match key.as_str() {
            "$and" => logical(doc, key, cond)?.iter().all(|b| *b),
            "$or" => logical(doc, key, cond)?.iter().any(|b| *b),
            "$nor" => !logical(doc, key, cond)?.iter().any(|b| *b),
            "$expr" => expr::evaluate(cond, doc)?.is_truthy(),
            "$comment" => true,
            k if k.starts_with('$') => return Err(format!("unknown top level operator: {}", k)),
            path => field_matches(doc, path, cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical(doc: &Document, op: &str, cond: &Value) -> Result<Vec<bool>, String> {
    let Value::Array(branches) = cond else {
        return Err(format!("{} must be an array", op));
    };
    if branches.is_empty() {
        return Err(format!("{} must be a nonempty array", op));
    }
    branches
        .iter()
        .map(|branch| match branch {
            Value::Document(f) => matches(doc, f),
            other => Err(format!(
                "{} argument's entries must be objects, got {}",
                op,
                other.type_name()
            )),
        })
        .collect()
}

/// Values reachable at `path`, descending into arrays of documents.
fn lookup(doc: &Document, path: &str) -> Vec<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(v) = doc.get(parts[0]) {
        collect(v, &parts[1..], &mut out);
    }
    out
}

fn collect(value: &Value, rest: &[&str], out: &mut Vec<Value>) {
    let Some((head, tail)) = rest.split_first() else {
        out.push(value.clone());
        return;
    };
    match value {
        Value::Document(d) => {
            if let Some(v) = d.get(head) {
                collect(v, tail, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(v) = items.get(index) {
                    collect(v, tail, out);
                }
                return;
            }
            for item in items {
                if let Value::Document(_) = item {
                    collect(item, rest, out);
                }
            }
        }
        _ => {}
    }
}

/// Found values plus the elements of any found arrays.
fn candidates(found: &[Value]) -> Vec<&Value> {
    let mut out = Vec::new();
    for v in found {
        out.push(v);
        if let Value::Array(items) = v {
            out.extend(items.iter());
        }
    }
    out
}

fn is_operator_doc(cond: &Value) -> Option<&Document> {
    match cond {
        Value::Document(d) if d.first().is_some_and(|(k, _)| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn field_matches(doc: &Document, path: &str, cond: &Value) -> Result<bool, String> {
    let found = lookup(doc, path);
    match is_operator_doc(cond) {
        Some(ops) => {
            let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
            for (op, arg) in ops.iter() {
                if op == "$options" {
                    continue;
                }
                if !operator_matches(&found, op, arg, options)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        None => Ok(equals_any(&found, cond)),
    }
}

fn equals_any(found: &[Value], target: &Value) -> bool {
    if target.is_null() && found.is_empty() {
        return true;
    }
    candidates(found).into_iter().any(|c| values_equal(c, target))
}

fn compare_any(found: &[Value], target: &Value, accept: fn(Ordering) -> bool) -> bool {
    candidates(found)
        .into_iter()
        .any(|c| query_cmp(c, target).is_some_and(accept))
}

fn operator_matches(found: &[Value], op: &str, arg: &Value, options: &str) -> Result<bool, String> {
    match op {
        "$eq" => Ok(equals_any(found, arg)),
        "$ne" => Ok(!equals_any(found, arg)),
        "$gt" => Ok(compare_any(found, arg, |o| o == Ordering::Greater)),
        "$gte" => Ok(compare_any(found, arg, |o| o != Ordering::Less)),
        "$lt" => Ok(compare_any(found, arg, |o| o == Ordering::Less)),
        "$lte" => Ok(compare_any(found, arg, |o| o != Ordering::Greater)),
        "$in" | "$nin" => {
            let Value::Array(options_list) = arg else {
                return Err(format!("{} needs an array", op));
            };
            let hit = options_list.iter().any(|t| equals_any(found, t));
            Ok(if op == "$in" { hit } else { !hit })
        }
        "$exists" => Ok(arg.is_truthy() != found.is_empty()),
        "$size" => {
            let n = arg
                .as_i64()
                .ok_or_else(|| "$size needs a number".to_string())?;
            Ok(found
                .iter()
                .any(|v| matches!(v, Value::Array(items) if items.len() as i64 == n)))
        }
        "$regex" => {
            let pattern = arg
                .as_str()
                .ok_or_else(|| "$regex has to be a string".to_string())?;
            let re = RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .dot_matches_new_line(options.contains('s'))
                .build()
                .map_err(|e| format!("Regular expression is invalid: {}", e))?;
            Ok(candidates(found)
                .into_iter()
                .any(|c| c.as_str().is_some_and(|s| re.is_match(s))))
        }
        "$not" => match arg {
            Value::Document(inner) => {
                for (inner_op, inner_arg) in inner.iter() {
                    if !operator_matches(found, inner_op, inner_arg, options)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err("$not needs a regex or a document".into()),
        },
        "$elemMatch" => {
            let Value::Document(filter) = arg else {
                return Err("$elemMatch needs an Object".into());
            };
            for v in found {
                if let Value::Array(items) = v {
                    for item in items {
                        if let Value::Document(d) = item {
                            if matches(d, filter)? {
                                return Ok(true);
                            }
                        }
                    }
                }
            }
            Ok(false)
        }
        _ => Err(format!("unknown operator: {}", op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        match Value::from(v) {
            Value::Document(d) => d,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_implicit_equality_and_comparisons() {
        let d = doc(json!({"instructor": "Ada", "rating": 4.5}));
        assert!(matches(&d, &doc(json!({"instructor": "Ada"}))).unwrap());
        assert!(matches(&d, &doc(json!({"rating": {"$gte": 4, "$lt": 5}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"rating": {"$gt": 4.5}}))).unwrap());
    }

    #[test]
    fn test_array_membership() {
        let d = doc(json!({"tags": ["rust", "async"]}));
        assert!(matches(&d, &doc(json!({"tags": "rust"}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": {"$in": ["go", "async"]}}))).unwrap());
        assert!(matches(&d, &doc(json!({"tags": {"$size": 2}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"tags": {"$nin": ["rust"]}}))).unwrap());
    }

    #[test]
    fn test_nested_array_of_documents() {
        let d = doc(json!({"reviews": [{"score": 2}, {"score": 5}]}));
        assert!(matches(&d, &doc(json!({"reviews.score": {"$gte": 5}}))).unwrap());
        assert!(matches(&d, &doc(json!({"reviews": {"$elemMatch": {"score": 2}}}))).unwrap());
    }

    #[test]
    fn test_null_matches_missing() {
        let d = doc(json!({"a": 1}));
        assert!(matches(&d, &doc(json!({"b": null}))).unwrap());
        assert!(matches(&d, &doc(json!({"b": {"$exists": false}}))).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let d = doc(json!({"a": 1, "b": 2}));
        assert!(matches(&d, &doc(json!({"$or": [{"a": 5}, {"b": 2}]}))).unwrap());
        assert!(!matches(&d, &doc(json!({"$nor": [{"a": 1}]}))).unwrap());
        assert!(matches(&d, &doc(json!({"a": {"$not": {"$gt": 3}}}))).unwrap());
        assert!(matches(&d, &doc(json!({"$expr": {"$lt": ["$a", "$b"]}}))).unwrap());
    }

    #[test]
    fn test_regex_with_options() {
        let d = doc(json!({"name": "Grace Hopper"}));
        assert!(matches(&d, &doc(json!({"name": {"$regex": "^grace", "$options": "i"}}))).unwrap());
        assert!(!matches(&d, &doc(json!({"name": {"$regex": "^grace"}}))).unwrap());
    }

    #[test]
    fn test_string_bound_does_not_match_date_field() {
        let mut d = Document::new();
        d.insert("at", Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        let as_string = doc(json!({"at": {"$gte": "2025-01-01T00:00:00.000Z"}}));
        assert!(!matches(&d, &as_string).unwrap());

        let mut bound = Document::new();
        bound.insert("$gte", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let mut as_date = Document::new();
        as_date.insert("at", bound);
        assert!(matches(&d, &as_date).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        let d = doc(json!({"a": 1}));
        let err = matches(&d, &doc(json!({"a": {"$near": 1}}))).unwrap_err();
        assert_eq!(err, "unknown operator: $near");
    }
}
