//! # Aggregation Pipeline Evaluator
//!
//! Runs a pipeline over an in-memory collection, one stage at a time, each
//! stage consuming the previous stage's output. Failures are plain strings in
//! the wording a document store would use; they are fed back to the
//! translator verbatim, so they must name the offending stage or operator.

pub mod compare;
pub mod expr;
pub mod matcher;

use compare::{cmp_values, values_equal};
use qy_core::query::WRITE_STAGES;
use qy_core::{Document, Value};
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Run `pipeline` over `docs` and return the final stage's output.
pub fn run_pipeline(docs: &[Document], pipeline: &[Value]) -> Result<Vec<Document>, String> {
    let mut current: Vec<Document> = docs.to_vec();
    for stage in pipeline {
        let Value::Document(spec) = stage else {
            return Err(format!(
                "Each element of the 'pipeline' array must be an object, got {}",
                stage.type_name()
            ));
        };
        let (name, arg) = match (spec.len(), spec.first()) {
            (1, Some(entry)) => entry,
            _ => {
                return Err(
                    "A pipeline stage specification object must contain exactly one field."
                        .into(),
                )
            }
        };
        current = apply_stage(name, arg, current)?;
    }
    Ok(current)
}

fn apply_stage(name: &str, arg: &Value, docs: Vec<Document>) -> Result<Vec<Document>, String> {
    match name {
        "$match" => {
            let filter = arg
                .as_document()
                .ok_or_else(|| "the match filter must be an expression in an object".to_string())?;
            let mut out = Vec::new();
            for doc in docs {
                if matcher::matches(&doc, filter)? {
                    out.push(doc);
                }
            }
            Ok(out)
        }
        "$project" => project(arg, docs),
        "$addFields" | "$set" => {
            let spec = arg
                .as_document()
                .ok_or_else(|| format!("{} specification stage must be an object", name))?;
            docs.into_iter()
                .map(|doc| -> Result<Document, String> {
                    let mut out = doc.clone();
                    for (path, e) in spec.iter() {
                        out.set_path(path, expr::evaluate(e, &doc)?);
                    }
                    Ok(out)
                })
                .collect()
        }
        "$unset" => {
            let paths: Vec<&str> = match arg {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items
                    .iter()
                    .map(|v| {
                        v.as_str().ok_or_else(|| {
                            "$unset specification must be a string or an array of strings"
                                .to_string()
                        })
                    })
                    .collect::<Result<_, _>>()?,
                _ => return Err("$unset specification must be a string or an array".into()),
            };
            Ok(docs
                .into_iter()
                .map(|mut doc| {
                    for p in &paths {
                        doc.remove_path(p);
                    }
                    doc
                })
                .collect())
        }
        "$group" => group(arg, docs),
        "$sort" => sort(arg, docs),
        "$limit" => {
            let n = positive_int(arg, "the limit must be positive")?;
            Ok(docs.into_iter().take(n).collect())
        }
        "$skip" => {
            let n = arg
                .as_i64()
                .filter(|n| *n >= 0)
                .ok_or_else(|| "invalid argument to $skip stage: Expected a non-negative number".to_string())?;
            Ok(docs.into_iter().skip(n as usize).collect())
        }
        "$count" => {
            let field = arg
                .as_str()
                .filter(|s| !s.is_empty() && !s.starts_with('$') && !s.contains('.'))
                .ok_or_else(|| "the count field must be a non-empty string without '$' or '.'".to_string())?;
            if docs.is_empty() {
                return Ok(Vec::new());
            }
            let mut out = Document::new();
            out.insert(field, docs.len() as i64);
            Ok(vec![out])
        }
        "$unwind" => unwind(arg, docs),
        "$sample" => {
            let size = arg
                .as_document()
                .and_then(|d| d.get("size"))
                .and_then(Value::as_i64)
                .filter(|n| *n >= 0)
                .ok_or_else(|| "$sample stage must specify a non-negative size".to_string())?;
            let mut rng = rand::thread_rng();
            Ok(docs
                .choose_multiple(&mut rng, size as usize)
                .cloned()
                .collect())
        }
        "$sortByCount" => {
            let mut spec = Document::new();
            spec.insert("_id", arg.clone());
            let mut count = Document::new();
            count.insert("$sum", 1i64);
            spec.insert("count", count);
            let mut grouped = group(&Value::Document(spec), docs)?;
            grouped.sort_by(|a, b| {
                cmp_values(
                    b.get("count").unwrap_or(&Value::Null),
                    a.get("count").unwrap_or(&Value::Null),
                )
            });
            Ok(grouped)
        }
        n if WRITE_STAGES.contains(&n) => Err(format!(
            "stage {} is not permitted on a read-only query",
            n
        )),
        _ => Err(format!("Unrecognized pipeline stage name: '{}'", name)),
    }
}

fn positive_int(arg: &Value, message: &str) -> Result<usize, String> {
    arg.as_i64()
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .ok_or_else(|| message.to_string())
}

fn project(arg: &Value, docs: Vec<Document>) -> Result<Vec<Document>, String> {
    let spec = arg
        .as_document()
        .ok_or_else(|| "$project specification must be an object".to_string())?;
    if spec.is_empty() {
        return Err("Invalid $project :: caused by :: projection specification must have at least one field".into());
    }

    let is_flag = |v: &Value| matches!(v, Value::Bool(_) | Value::Int(_) | Value::Double(_));
    let mut inclusion = false;
    let mut exclusion = false;
    for (path, v) in spec.iter() {
        if path == "_id" {
            continue;
        }
        if is_flag(v) && !v.is_truthy() {
            exclusion = true;
        } else {
            inclusion = true;
        }
        if inclusion && exclusion {
            return Err(format!(
                "Invalid $project :: caused by :: Cannot do exclusion on field {} in inclusion projection",
                path
            ));
        }
    }

    let exclude_id = spec.get("_id").is_some_and(|v| is_flag(v) && !v.is_truthy());

    docs.into_iter()
        .map(|doc| -> Result<Document, String> {
            if !inclusion {
                let mut out = doc;
                for (path, _) in spec.iter() {
                    if path != "_id" || exclude_id {
                        out.remove_path(path);
                    }
                }
                return Ok(out);
            }
            let mut out = Document::new();
            if !exclude_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for (path, v) in spec.iter() {
                if path == "_id" && is_flag(v) {
                    continue;
                }
                if is_flag(v) {
                    if let Some(found) = doc.get_path(path) {
                        out.set_path(path, found.clone());
                    }
                } else {
                    out.set_path(path, expr::evaluate(v, &doc)?);
                }
            }
            Ok(out)
        })
        .collect()
}

fn sort(arg: &Value, mut docs: Vec<Document>) -> Result<Vec<Document>, String> {
    let spec = arg
        .as_document()
        .ok_or_else(|| "the $sort key specification must be an object".to_string())?;
    if spec.is_empty() {
        return Err("$sort stage must have at least one sort key".into());
    }
    let mut keys: Vec<(String, bool)> = Vec::with_capacity(spec.len());
    for (path, dir) in spec.iter() {
        let descending = match dir.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => {
                return Err(
                    "$sort key ordering must be 1 (for ascending) or -1 (for descending)".into(),
                )
            }
        };
        keys.push((path.clone(), descending));
    }
    docs.sort_by(|a, b| {
        for (path, descending) in &keys {
            let left = expr::field_value(a, path);
            let right = expr::field_value(b, path);
            let o = cmp_values(&left, &right);
            let o = if *descending { o.reverse() } else { o };
            if o != Ordering::Equal {
                return o;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn unwind(arg: &Value, docs: Vec<Document>) -> Result<Vec<Document>, String> {
    let (path, preserve, index_field) = match arg {
        Value::String(p) => (p.as_str(), false, None),
        Value::Document(spec) => (
            spec.get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| "no path specified to $unwind stage".to_string())?,
            spec.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            spec.get("includeArrayIndex").and_then(Value::as_str),
        ),
        _ => return Err("expected either a string or an object as specification for $unwind stage".into()),
    };
    let Some(path) = path.strip_prefix('$') else {
        return Err(format!(
            "path option to $unwind stage should be prefixed with a '$': {}",
            path
        ));
    };

    let mut out = Vec::new();
    for doc in docs {
        match doc.get_path(path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (i, item) in items.into_iter().enumerate() {
                    let mut copy = doc.clone();
                    copy.set_path(path, item);
                    if let Some(field) = index_field {
                        copy.set_path(field, Value::Int(i as i64));
                    }
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    let mut copy = doc;
                    if let Some(field) = index_field {
                        copy.set_path(field, Value::Null);
                    }
                    out.push(copy);
                }
            }
            Some(_) => {
                let mut copy = doc;
                if let Some(field) = index_field {
                    copy.set_path(field, Value::Null);
                }
                out.push(copy);
            }
        }
    }
    Ok(out)
}

// =============================================================================
// $group
// =============================================================================

enum Accumulator {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
    Count(i64),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self, String> {
        Ok(match op {
            "$sum" => Self::Sum {
                total: 0.0,
                integral: true,
            },
            "$avg" => Self::Avg { total: 0.0, count: 0 },
            "$min" => Self::Min(None),
            "$max" => Self::Max(None),
            "$first" => Self::First(None),
            "$last" => Self::Last(Value::Null),
            "$push" => Self::Push(Vec::new()),
            "$addToSet" => Self::AddToSet(Vec::new()),
            "$count" => Self::Count(0),
            other => return Err(format!("unknown group operator '{}'", other)),
        })
    }

    fn add(&mut self, v: Value) {
        match self {
            Self::Sum { total, integral } => {
                if let Some(n) = v.as_f64() {
                    *integral &= matches!(v, Value::Int(_));
                    *total += n;
                }
            }
            Self::Avg { total, count } => {
                if let Some(n) = v.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Self::Min(current) => {
                if !v.is_null()
                    && current
                        .as_ref()
                        .map_or(true, |c| cmp_values(&v, c) == Ordering::Less)
                {
                    *current = Some(v);
                }
            }
            Self::Max(current) => {
                if !v.is_null()
                    && current
                        .as_ref()
                        .map_or(true, |c| cmp_values(&v, c) == Ordering::Greater)
                {
                    *current = Some(v);
                }
            }
            Self::First(current) => {
                if current.is_none() {
                    *current = Some(v);
                }
            }
            Self::Last(current) => *current = v,
            Self::Push(items) => items.push(v),
            Self::AddToSet(items) => {
                if !items.iter().any(|i| values_equal(i, &v)) {
                    items.push(v);
                }
            }
            Self::Count(n) => *n += 1,
        }
    }

    fn finish(self) -> Value {
        match self {
            Self::Sum { total, integral } => {
                if integral && total.abs() < i64::MAX as f64 {
                    Value::Int(total as i64)
                } else {
                    Value::Double(total)
                }
            }
            Self::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Double(total / count as f64)
                }
            }
            Self::Min(v) | Self::Max(v) | Self::First(v) => v.unwrap_or(Value::Null),
            Self::Last(v) => v,
            Self::Push(items) | Self::AddToSet(items) => Value::Array(items),
            Self::Count(n) => Value::Int(n),
        }
    }
}

fn group(arg: &Value, docs: Vec<Document>) -> Result<Vec<Document>, String> {
    let spec = arg
        .as_document()
        .ok_or_else(|| "a group's fields must be specified in an object".to_string())?;
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| "a group specification must include an _id".to_string())?;

    let mut fields: Vec<(&String, &str, &Value)> = Vec::new();
    for (name, acc) in spec.iter() {
        if name == "_id" {
            continue;
        }
        let op = match acc {
            Value::Document(d) if d.len() == 1 => d.first(),
            _ => None,
        };
        let Some((op, e)) = op else {
            return Err(format!(
                "The field '{}' must be an accumulator object",
                name
            ));
        };
        Accumulator::new(op)?;
        fields.push((name, op.as_str(), e));
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Value, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = expr::evaluate(id_expr, doc)?;
        let slot = match index.get(&group_key(&key)) {
            Some(i) => *i,
            None => {
                let accs = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>, _>>()?;
                index.insert(group_key(&key), groups.len());
                groups.push((key, accs));
                groups.len() - 1
            }
        };
        for (acc, (_, _, e)) in groups[slot].1.iter_mut().zip(fields.iter()) {
            acc.add(expr::evaluate(e, doc)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut out = Document::with_capacity(accs.len() + 1);
            out.insert("_id", key);
            for (acc, (name, _, _)) in accs.into_iter().zip(fields.iter()) {
                out.insert(name.as_str(), acc.finish());
            }
            out
        })
        .collect())
}

/// Hash key for a group id; integral doubles collapse onto ints.
fn group_key(v: &Value) -> String {
    match v {
        Value::Double(n) if n.fract() == 0.0 && n.is_finite() => Value::Int(*n as i64).to_string(),
        other => other.to_string(),
    }
}
