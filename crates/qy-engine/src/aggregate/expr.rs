//! # Aggregation Expressions
//!
//! Evaluates expression values (`"$field"`, `{"$add": [...]}`, literals)
//! against a single document. Used by `$project`, `$addFields`, `$group` keys
//! and accumulators, `$sortByCount` and `$expr`.

use super::compare::cmp_values;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use qy_core::{Document, Value};
use std::cmp::Ordering;
use std::fmt::Write;

/// Evaluate `expr` against `doc`. Missing fields evaluate to null.
pub fn evaluate(expr: &Value, doc: &Document) -> Result<Value, String> {
    match expr {
        Value::String(s) if s.starts_with("$$") => variable(s, doc),
        Value::String(s) if s.starts_with('$') => Ok(field_value(doc, &s[1..])),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, doc))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Document(spec) => match spec.first() {
            Some((op, arg)) if op.starts_with('$') => {
                if spec.len() != 1 {
                    return Err(format!(
                        "an expression specification must contain exactly one field, found {}",
                        spec.len()
                    ));
                }
                operator(op, arg, doc)
            }
            _ => spec
                .iter()
                .map(|(k, v)| evaluate(v, doc).map(|v| (k.clone(), v)))
                .collect::<Result<Document, _>>()
                .map(Value::Document),
        },
        other => Ok(other.clone()),
    }
}

fn variable(name: &str, doc: &Document) -> Result<Value, String> {
    let (var, rest) = match name[2..].split_once('.') {
        Some((var, rest)) => (var, Some(rest)),
        None => (&name[2..], None),
    };
    match var {
        "ROOT" | "CURRENT" => Ok(match rest {
            Some(path) => field_value(doc, path),
            None => Value::Document(doc.clone()),
        }),
        "NOW" => Ok(Value::DateTime(Utc::now())),
        _ => Err(format!("Use of undefined variable: {}", var)),
    }
}

/// Resolve a dotted path. Arrays of documents along the path yield an array
/// of the nested values, as field paths do in aggregation.
pub fn field_value(doc: &Document, path: &str) -> Value {
    let mut parts = path.split('.');
    let Some(head) = parts.next() else {
        return Value::Null;
    };
    let mut current = doc.get(head).cloned().unwrap_or(Value::Null);
    for part in parts {
        current = descend(&current, part);
    }
    current
}

fn descend(value: &Value, key: &str) -> Value {
    match value {
        Value::Document(d) => d.get(key).cloned().unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| matches!(item, Value::Document(_) | Value::Array(_)))
                .map(|item| descend(item, key))
                .filter(|v| !v.is_null())
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn args(arg: &Value) -> Vec<&Value> {
    match arg {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn eval_args(
    op: &str,
    arg: &Value,
    doc: &Document,
    expected: Option<usize>,
) -> Result<Vec<Value>, String> {
    let raw = args(arg);
    if let Some(n) = expected {
        if raw.len() != n {
            return Err(format!(
                "Expression {} takes exactly {} arguments. {} were passed in.",
                op,
                n,
                raw.len()
            ));
        }
    }
    raw.into_iter().map(|a| evaluate(a, doc)).collect()
}

fn operator(op: &str, arg: &Value, doc: &Document) -> Result<Value, String> {
    match op {
        "$literal" => Ok(arg.clone()),
        "$add" => add(eval_args(op, arg, doc, None)?),
        "$subtract" => {
            let v = eval_args(op, arg, doc, Some(2))?;
            subtract(&v[0], &v[1])
        }
        "$multiply" => {
            let v = eval_args(op, arg, doc, None)?;
            if v.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let mut exact = Some(1i64);
            let mut product = 1.0;
            for item in &v {
                exact = match item {
                    Value::Int(n) => exact.and_then(|p| p.checked_mul(*n)),
                    _ => None,
                };
                product *= number(op, item)?;
            }
            Ok(exact.map_or(Value::Double(product), Value::Int))
        }
        "$divide" => {
            let v = eval_args(op, arg, doc, Some(2))?;
            if v[0].is_null() || v[1].is_null() {
                return Ok(Value::Null);
            }
            let divisor = number(op, &v[1])?;
            if divisor == 0.0 {
                return Err("can't $divide by zero".into());
            }
            Ok(Value::Double(number(op, &v[0])? / divisor))
        }
        "$mod" => {
            let v = eval_args(op, arg, doc, Some(2))?;
            if v[0].is_null() || v[1].is_null() {
                return Ok(Value::Null);
            }
            let divisor = number(op, &v[1])?;
            if divisor == 0.0 {
                return Err("can't $mod by zero".into());
            }
            let both_int = matches!((&v[0], &v[1]), (Value::Int(_), Value::Int(_)));
            Ok(numeric_result(number(op, &v[0])? % divisor, both_int))
        }
        "$abs" => {
            let v = eval_args(op, arg, doc, Some(1))?;
            match &v[0] {
                Value::Null => Ok(Value::Null),
                Value::Int(n) => Ok(n
                    .checked_abs()
                    .map_or(Value::Double((*n as f64).abs()), Value::Int)),
                other => Ok(Value::Double(number(op, other)?.abs())),
            }
        }
        "$round" => {
            let v = eval_args(op, arg, doc, None)?;
            let Some(first) = v.first() else {
                return Err("Expression $round takes at least 1 argument".into());
            };
            if first.is_null() {
                return Ok(Value::Null);
            }
            let places = v.get(1).and_then(Value::as_i64).unwrap_or(0);
            let factor = 10f64.powi(places as i32);
            let rounded = (number(op, first)? * factor).round() / factor;
            Ok(numeric_result(rounded, matches!(first, Value::Int(_))))
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$cmp" => {
            let v = eval_args(op, arg, doc, Some(2))?;
            let ord = cmp_values(&v[0], &v[1]);
            Ok(match op {
                "$eq" => Value::Bool(ord == Ordering::Equal),
                "$ne" => Value::Bool(ord != Ordering::Equal),
                "$gt" => Value::Bool(ord == Ordering::Greater),
                "$gte" => Value::Bool(ord != Ordering::Less),
                "$lt" => Value::Bool(ord == Ordering::Less),
                "$lte" => Value::Bool(ord != Ordering::Greater),
                _ => Value::Int(match ord {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }),
            })
        }
        "$and" => {
            for a in args(arg) {
                if !evaluate(a, doc)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "$or" => {
            for a in args(arg) {
                if evaluate(a, doc)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "$not" => {
            let v = eval_args(op, arg, doc, Some(1))?;
            Ok(Value::Bool(!v[0].is_truthy()))
        }
        "$cond" => {
            let (cond, then, otherwise) = match arg {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Document(spec) => match (spec.get("if"), spec.get("then"), spec.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => return Err("Missing 'if', 'then' or 'else' parameter to $cond".into()),
                },
                _ => return Err("Expression $cond takes exactly 3 arguments".into()),
            };
            if evaluate(cond, doc)?.is_truthy() {
                evaluate(then, doc)
            } else {
                evaluate(otherwise, doc)
            }
        }
        "$ifNull" => {
            let raw = args(arg);
            if raw.len() < 2 {
                return Err("$ifNull needs at least two arguments".into());
            }
            let mut last = Value::Null;
            for a in raw {
                last = evaluate(a, doc)?;
                if !last.is_null() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        "$concat" => {
            let v = eval_args(op, arg, doc, None)?;
            let mut out = String::new();
            for item in &v {
                match item {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => out.push_str(s),
                    other => {
                        return Err(format!(
                            "$concat only supports strings, not {}",
                            other.type_name()
                        ))
                    }
                }
            }
            Ok(Value::String(out))
        }
        "$toLower" | "$toUpper" => {
            let v = eval_args(op, arg, doc, Some(1))?;
            let s = match &v[0] {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(Value::String(if op == "$toLower" {
                s.to_lowercase()
            } else {
                s.to_uppercase()
            }))
        }
        "$size" => {
            let v = eval_args(op, arg, doc, Some(1))?;
            match &v[0] {
                Value::Array(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(format!(
                    "The argument to $size must be an array. Type of argument: {}",
                    other.type_name()
                )),
            }
        }
        "$year" | "$month" | "$dayOfMonth" | "$hour" | "$minute" | "$dayOfWeek" | "$dayOfYear" => {
            let target = match arg {
                Value::Document(spec) if spec.contains_key("date") => {
                    spec.get("date").unwrap_or(&Value::Null)
                }
                Value::Array(items) if items.len() == 1 => &items[0],
                other => other,
            };
            let value = evaluate(target, doc)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let dt = date(&value)?;
            Ok(Value::Int(match op {
                "$year" => dt.year() as i64,
                "$month" => dt.month() as i64,
                "$dayOfMonth" => dt.day() as i64,
                "$hour" => dt.hour() as i64,
                "$minute" => dt.minute() as i64,
                "$dayOfYear" => dt.ordinal() as i64,
                _ => dt.weekday().number_from_sunday() as i64,
            }))
        }
        "$dateToString" => {
            let Value::Document(spec) = arg else {
                return Err("$dateToString only supports an object as its argument".into());
            };
            let format = match spec.get("format") {
                Some(Value::String(f)) => f.replace("%L", "%3f"),
                Some(_) => return Err("$dateToString requires that 'format' be a string".into()),
                None => "%Y-%m-%dT%H:%M:%S.%3fZ".to_string(),
            };
            let value = evaluate(spec.get("date").unwrap_or(&Value::Null), doc)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let dt = date(&value)?;
            let mut out = String::new();
            write!(out, "{}", dt.format(&format))
                .map_err(|_| format!("invalid format string for $dateToString: {}", format))?;
            Ok(Value::String(out))
        }
        _ => Err(format!("Unrecognized expression '{}'", op)),
    }
}

fn number(op: &str, v: &Value) -> Result<f64, String> {
    v.as_f64().ok_or_else(|| {
        format!(
            "{} only supports numeric types, not {}",
            op,
            v.type_name()
        )
    })
}

fn numeric_result(n: f64, integral: bool) -> Value {
    if integral && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Int(n as i64)
    } else {
        Value::Double(n)
    }
}

fn date(v: &Value) -> Result<DateTime<Utc>, String> {
    v.as_datetime()
        .copied()
        .ok_or_else(|| format!("can't convert from BSON type {} to Date", v.type_name()))
}

/// Shift `dt` by `ms` milliseconds. Fails when the offset or the result
/// falls outside the representable date range.
fn shift_date(op: &str, dt: DateTime<Utc>, ms: f64) -> Result<Value, String> {
    let overflow = || format!("date arithmetic overflowed in {}", op);
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return Err(overflow());
    }
    Duration::try_milliseconds(ms as i64)
        .and_then(|delta| dt.checked_add_signed(delta))
        .map(Value::DateTime)
        .ok_or_else(overflow)
}

fn add(values: Vec<Value>) -> Result<Value, String> {
    if values.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let mut base_date: Option<DateTime<Utc>> = None;
    let mut exact = Some(0i64);
    let mut sum = 0.0;
    for v in &values {
        match v {
            Value::DateTime(dt) => {
                if base_date.is_some() {
                    return Err("only one date allowed in an $add expression".into());
                }
                base_date = Some(*dt);
            }
            other => {
                exact = match other {
                    Value::Int(n) => exact.and_then(|s| s.checked_add(*n)),
                    _ => None,
                };
                sum += number("$add", other)?;
            }
        }
    }
    match (base_date, exact) {
        (Some(dt), Some(ms)) => shift_date("$add", dt, ms as f64),
        (Some(dt), None) => shift_date("$add", dt, sum),
        (None, Some(n)) => Ok(Value::Int(n)),
        (None, None) => Ok(Value::Double(sum)),
    }
}

fn subtract(a: &Value, b: &Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::DateTime(x), Value::DateTime(y)) => {
            Ok(Value::Int((*x - *y).num_milliseconds()))
        }
        (Value::DateTime(x), other) => shift_date("$subtract", *x, -number("$subtract", other)?),
        (Value::Int(x), Value::Int(y)) => Ok(x
            .checked_sub(*y)
            .map_or(Value::Double(*x as f64 - *y as f64), Value::Int)),
        (x, y) => Ok(Value::Double(
            number("$subtract", x)? - number("$subtract", y)?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        match Value::from(v) {
            Value::Document(d) => d,
            _ => unreachable!(),
        }
    }

    fn eval(expr: serde_json::Value, d: &Document) -> Result<Value, String> {
        evaluate(&Value::from(expr), d)
    }

    #[test]
    fn test_field_paths_and_literals() {
        let d = doc(json!({"name": "Ada", "stats": {"rating": 4.5}}));
        assert_eq!(eval(json!("$stats.rating"), &d).unwrap(), Value::Double(4.5));
        assert_eq!(eval(json!("$missing"), &d).unwrap(), Value::Null);
        assert_eq!(
            eval(json!({"$literal": "$name"}), &d).unwrap(),
            Value::from("$name")
        );
    }

    #[test]
    fn test_path_through_array_of_documents() {
        let d = doc(json!({"reviews": [{"score": 3}, {"score": 5}]}));
        assert_eq!(
            eval(json!("$reviews.score"), &d).unwrap(),
            Value::Array(vec![Value::Int(3), Value::Int(5)])
        );
        assert_eq!(eval(json!({"$size": "$reviews"}), &d).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_arithmetic() {
        let d = doc(json!({"a": 7, "b": 2}));
        assert_eq!(eval(json!({"$add": ["$a", "$b", 1]}), &d).unwrap(), Value::Int(10));
        assert_eq!(eval(json!({"$divide": ["$a", "$b"]}), &d).unwrap(), Value::Double(3.5));
        assert_eq!(eval(json!({"$mod": ["$a", "$b"]}), &d).unwrap(), Value::Int(1));
        assert_eq!(
            eval(json!({"$round": [{"$divide": [10, 3]}, 2]}), &d).unwrap(),
            Value::Double(3.33)
        );
        assert!(eval(json!({"$divide": ["$a", 0]}), &d).is_err());
    }

    #[test]
    fn test_integer_arithmetic_stays_exact() {
        let big = (1i64 << 53) + 1;
        let d = doc(json!({"big": big, "min": i64::MIN}));
        assert_eq!(eval(json!({"$add": ["$big", 2]}), &d).unwrap(), Value::Int(big + 2));
        assert_eq!(eval(json!({"$subtract": ["$big", 2]}), &d).unwrap(), Value::Int(big - 2));
        assert_eq!(eval(json!({"$multiply": ["$big", 1]}), &d).unwrap(), Value::Int(big));
        assert_eq!(
            eval(json!({"$abs": "$min"}), &d).unwrap(),
            Value::Double(9_223_372_036_854_775_808.0)
        );
        assert_eq!(
            eval(json!({"$subtract": ["$min", 1]}), &d).unwrap(),
            Value::Double(i64::MIN as f64 - 1.0)
        );
        assert!(matches!(
            eval(json!({"$multiply": ["$big", "$big"]}), &d).unwrap(),
            Value::Double(_)
        ));
        assert_eq!(eval(json!({"$add": ["$big", 0.5]}), &d).unwrap(), Value::Double(big as f64 + 0.5));
    }

    #[test]
    fn test_date_arithmetic() {
        let mut d = Document::new();
        d.insert("at", Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap());
        d.insert("later", Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap());
        assert_eq!(
            eval(json!({"$add": ["$at", 86_400_000]}), &d).unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap())
        );
        assert_eq!(
            eval(json!({"$subtract": ["$later", 3_600_000]}), &d).unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(2025, 3, 14, 23, 0, 0).unwrap())
        );
        assert_eq!(
            eval(json!({"$subtract": ["$later", "$at"]}), &d).unwrap(),
            Value::Int(86_400_000)
        );
    }

    #[test]
    fn test_date_arithmetic_out_of_range_is_an_error() {
        let mut d = Document::new();
        d.insert("at", Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap());
        let err = eval(json!({"$add": ["$at", 9e18]}), &d).unwrap_err();
        assert_eq!(err, "date arithmetic overflowed in $add");
        let err = eval(json!({"$add": ["$at", 9_000_000_000_000_000i64]}), &d).unwrap_err();
        assert_eq!(err, "date arithmetic overflowed in $add");
        let err = eval(json!({"$subtract": ["$at", 1e300]}), &d).unwrap_err();
        assert_eq!(err, "date arithmetic overflowed in $subtract");
    }

    #[test]
    fn test_date_parts_require_dates() {
        let mut d = Document::new();
        d.insert("at", Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap());
        d.insert("text", "2025-03-14T09:30:00Z");
        assert_eq!(eval(json!({"$year": "$at"}), &d).unwrap(), Value::Int(2025));
        assert_eq!(eval(json!({"$month": {"date": "$at"}}), &d).unwrap(), Value::Int(3));
        assert_eq!(eval(json!({"$dayOfWeek": "$at"}), &d).unwrap(), Value::Int(6));
        let err = eval(json!({"$year": "$text"}), &d).unwrap_err();
        assert!(err.contains("to Date"));
    }

    #[test]
    fn test_date_to_string() {
        let mut d = Document::new();
        d.insert("at", Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap());
        assert_eq!(
            eval(json!({"$dateToString": {"format": "%Y-%m", "date": "$at"}}), &d).unwrap(),
            Value::from("2025-03")
        );
    }

    #[test]
    fn test_conditionals() {
        let d = doc(json!({"rating": 2, "nick": null, "name": "Ada"}));
        assert_eq!(
            eval(json!({"$cond": [{"$gte": ["$rating", 4]}, "good", "poor"]}), &d).unwrap(),
            Value::from("poor")
        );
        assert_eq!(
            eval(json!({"$ifNull": ["$nick", "$name"]}), &d).unwrap(),
            Value::from("Ada")
        );
    }

    #[test]
    fn test_unknown_operator() {
        let err = eval(json!({"$frobnicate": 1}), &Document::new()).unwrap_err();
        assert_eq!(err, "Unrecognized expression '$frobnicate'");
    }
}
