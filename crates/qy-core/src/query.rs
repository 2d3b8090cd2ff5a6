//! # Structured Query
//!
//! An aggregation pipeline: an ordered list of stages, each a single-key
//! document such as `{"$match": {...}}` or `{"$limit": 5}`. Which stage names
//! and operators are valid is decided by the store that runs the pipeline;
//! this type only guarantees "a JSON array" and the read-only rule.

use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Stages that persist data. A query containing one is never executed.
pub const WRITE_STAGES: &[&str] = &["$out", "$merge"];

/// Why a reply could not be turned into a query.
#[derive(Debug, thiserror::Error)]
pub enum ParseFailure {
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON array of stages, got {0}")]
    NotArray(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredQuery {
    stages: Vec<Value>,
}

impl StructuredQuery {
    pub fn new(stages: Vec<Value>) -> Self {
        Self { stages }
    }

    /// The empty pipeline. Valid, and means "no results".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Value] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Value> {
        self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Operator name of each stage, `None` for stages that are not documents.
    pub fn operators(&self) -> Vec<Option<&str>> {
        self.stages
            .iter()
            .map(|stage| {
                stage
                    .as_document()
                    .and_then(|doc| doc.first())
                    .map(|(name, _)| name.as_str())
            })
            .collect()
    }

    /// Parse a generator reply: optional code fence, then a JSON array.
    pub fn parse(text: &str) -> Result<Self, ParseFailure> {
        let json: serde_json::Value = serde_json::from_str(strip_code_fence(text))?;
        Self::try_from(Value::from(json))
    }

    /// Reject any stage that writes. Returns the offending stage name.
    pub fn ensure_read_only(&self) -> Result<(), String> {
        for stage in &self.stages {
            let Some(doc) = stage.as_document() else {
                continue;
            };
            if let Some(name) = doc.keys().find(|k| WRITE_STAGES.contains(&k.as_str())) {
                return Err(format!(
                    "stage {} is not permitted on a read-only query",
                    name
                ));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.stages.iter().map(Value::to_json).collect())
    }

    /// Compact JSON with dates as bare timestamp strings, for echoing a
    /// query back to its generator.
    pub fn to_plain_string(&self) -> String {
        serde_json::Value::Array(self.stages.iter().map(Value::to_plain_json).collect()).to_string()
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| self.to_string())
    }
}

impl TryFrom<Value> for StructuredQuery {
    type Error = ParseFailure;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Array(stages) => Ok(Self { stages }),
            other => Err(ParseFailure::NotArray(other.type_name())),
        }
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for StructuredQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.stages.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructuredQuery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Self::try_from(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

/// Remove a surrounding Markdown code fence (```` ```json ```` or bare
/// ```` ``` ````). Text without a leading fence is returned trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "javascript", ...) on the opening line.
    let body = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim()
}
