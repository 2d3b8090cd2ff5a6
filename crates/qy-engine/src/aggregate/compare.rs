//! Value ordering shared by `$sort`, `$min`/`$max` and query comparisons.
//!
//! Types are bracketed: values of different kinds never compare as equal and
//! query operators (`$gt`, `$lt`, ...) only match within one bracket. A date
//! stored in a document is therefore never `$gte` a date-shaped string.

use qy_core::Value;
use std::cmp::Ordering;

/// Canonical cross-type order: null < numbers < strings < documents < arrays
/// < booleans < dates.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Int(_) | Value::Double(_) => 1,
        Value::String(_) => 2,
        Value::Document(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
        Value::DateTime(_) => 6,
    }
}

/// Total order used for sorting and for aggregation-expression comparisons.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let o = cmp_values(l, r);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Document(x), Value::Document(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let o = lk.cmp(rk).then_with(|| cmp_values(lv, rv));
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    cmp_values(a, b) == Ordering::Equal
}

/// Ordering for query operators: `None` across type brackets.
pub fn query_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if type_rank(a) != type_rank(b) {
        return None;
    }
    Some(cmp_values(a, b))
}
