//! Prompt text for the reasoning service.
//!
//! The translation preamble is assembled once from a [`SchemaDescription`];
//! per-call prompts are small templates around the user's request.

use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt::Write;

/// One field of the target collection, as shown to the reasoning service.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl FieldDescription {
    fn new(name: &str, kind: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
        }
    }
}

/// The collection the reasoning service writes queries for.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SchemaDescription {
    pub collection: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldDescription>,
}

impl Default for SchemaDescription {
    fn default() -> Self {
        Self {
            collection: "course_reviews".to_string(),
            description: "One document per student review of a course taught by an instructor."
                .to_string(),
            fields: vec![
                FieldDescription::new("instructor", "string", "full name of the instructor"),
                FieldDescription::new("course", "string", "course title"),
                FieldDescription::new("department", "string", "department offering the course"),
                FieldDescription::new("rating", "number", "review score from 1 to 5"),
                FieldDescription::new("comment", "string", "free-text review"),
                FieldDescription::new("tags", "array of strings", "short labels from the reviewer"),
                FieldDescription::new("createdAt", "date", "when the review was submitted"),
            ],
        }
    }
}

/// System preamble for translation and repair calls.
pub fn build_preamble(schema: &SchemaDescription, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You translate questions into aggregation pipelines for a document database."
    );
    let _ = writeln!(out, "Today's date is {}.", today.format("%Y-%m-%d"));
    let _ = writeln!(out);
    let _ = writeln!(out, "Collection: {}", schema.collection);
    if !schema.description.is_empty() {
        let _ = writeln!(out, "{}", schema.description);
    }
    let _ = writeln!(out, "Fields:");
    for field in &schema.fields {
        if field.description.is_empty() {
            let _ = writeln!(out, "- {} ({})", field.name, field.kind);
        } else {
            let _ = writeln!(out, "- {} ({}): {}", field.name, field.kind, field.description);
        }
    }
    let _ = writeln!(out);
    out.push_str(RULES);
    out
}

const RULES: &str = "\
Rules:
1. Reply with a single JSON array of pipeline stages and nothing else: no prose, no code fences.
2. Every key and every string value must be double-quoted.
3. Write every date as a plain ISO-8601 string such as \"2025-01-01T00:00:00.000Z\". Never use ISODate(), new Date() or any other constructor.
4. Use only read stages ($match, $group, $sort, $limit, $skip, $project, $addFields, $unwind, $count, $sortByCount, $sample). Never use $out or $merge.
5. If the question cannot be answered from this collection, reply with [].
";

pub fn translate_prompt(request: &str) -> String {
    format!("Question: {}\n\nReturn the aggregation pipeline as a JSON array.", request)
}

/// Follow-up turn after a failed execution. The failed query itself is sent
/// as the preceding assistant turn.
pub fn repair_prompt(error_message: &str) -> String {
    format!(
        "Running that pipeline failed with this error:\n{}\n\n\
         Return a corrected, complete replacement pipeline as a JSON array. \
         Do not return a partial fix or an explanation.",
        error_message
    )
}

pub const PING_PROMPT: &str = "Reply with the single word OK.";
pub const PING_TOKEN: &str = "OK";

pub const SUMMARY_PREAMBLE: &str = "\
You answer questions about database query results. \
Write two to four plain sentences. Use only the records given; do not invent values.";

pub fn summary_prompt(request: &str, records_json: &str, shown: usize, total: usize) -> String {
    let scope = if shown < total {
        format!("the first {} of {} records", shown, total)
    } else {
        format!("all {} records", total)
    };
    format!(
        "Question: {}\n\nResults ({}):\n{}\n\nAnswer the question from these results.",
        request, scope, records_json
    )
}
