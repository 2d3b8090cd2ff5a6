//! Prose answers from result sets.

use crate::prompts;
use crate::reasoning::{ReasoningService, Turn};
use qy_core::{Document, Error, Result};
use std::sync::Arc;

/// Records shown to the reasoning service per summary.
pub const SUMMARY_RECORD_LIMIT: usize = 50;

pub const NO_RESULTS_SUMMARY: &str = "No matching records were found for this question.";

pub struct Summarizer {
    service: Arc<dyn ReasoningService>,
}

impl Summarizer {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    pub async fn summarize(&self, request: &str, records: &[Document]) -> Result<String> {
        if records.is_empty() {
            return Ok(NO_RESULTS_SUMMARY.to_string());
        }
        let shown = &records[..records.len().min(SUMMARY_RECORD_LIMIT)];
        let json = serde_json::to_string_pretty(shown)?;
        let turns = [Turn::user(prompts::summary_prompt(
            request,
            &json,
            shown.len(),
            records.len(),
        ))];
        let reply = self
            .service
            .generate(prompts::SUMMARY_PREAMBLE, &turns)
            .await
            .map_err(|e| match e {
                Error::Reasoning(_) => e,
                other => Error::Reasoning(other.to_string()),
            })?;
        Ok(reply.trim().to_string())
    }
}
