//! # Translator
//!
//! Natural language in, [`StructuredQuery`] out. Replies from the reasoning
//! service are trusted for nothing: the code fence is stripped, the text must
//! parse as a JSON array, and dates are normalized before the query is
//! handed back. The store is the only validator of structure.

use crate::prompts::{self, SchemaDescription};
use crate::reasoning::{ReasoningService, Turn};
use qy_core::{normalize_query, Error, Result, StructuredQuery};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Translator {
    service: Arc<dyn ReasoningService>,
    preamble: String,
}

impl Translator {
    /// Translator for `schema`, with today's date in the preamble.
    pub fn new(service: Arc<dyn ReasoningService>, schema: &SchemaDescription) -> Self {
        let today = chrono::Utc::now().date_naive();
        Self::with_preamble(service, prompts::build_preamble(schema, today))
    }

    pub fn with_preamble(service: Arc<dyn ReasoningService>, preamble: String) -> Self {
        Self { service, preamble }
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn service(&self) -> &Arc<dyn ReasoningService> {
        &self.service
    }

    pub async fn translate(&self, request: &str) -> Result<StructuredQuery> {
        let turns = [Turn::user(prompts::translate_prompt(request))];
        let reply = self
            .service
            .generate(&self.preamble, &turns)
            .await
            .map_err(|e| Error::Translation(e.to_string()))?;
        debug!("Translation reply: {}", reply);

        let query = StructuredQuery::parse(&reply).map_err(|e| Error::Translation(e.to_string()))?;
        Ok(normalize_query(&query))
    }

    /// Ask for a complete replacement of `failed_query` given the store error.
    pub async fn repair(
        &self,
        request: &str,
        error_message: &str,
        failed_query: &StructuredQuery,
    ) -> Result<StructuredQuery> {
        let turns = [
            Turn::user(prompts::translate_prompt(request)),
            Turn::assistant(failed_query.to_plain_string()),
            Turn::user(prompts::repair_prompt(error_message)),
        ];
        let reply = self
            .service
            .generate(&self.preamble, &turns)
            .await
            .map_err(|e| Error::Repair(e.to_string()))?;
        debug!("Repair reply: {}", reply);

        let query = StructuredQuery::parse(&reply).map_err(|e| Error::Repair(e.to_string()))?;
        Ok(normalize_query(&query))
    }

    /// Liveness probe. Never errors.
    pub async fn test_connection(&self) -> bool {
        let turns = [Turn::user(prompts::PING_PROMPT)];
        match self.service.generate(&self.preamble, &turns).await {
            Ok(reply) => reply.contains(prompts::PING_TOKEN),
            Err(e) => {
                warn!("Reasoning service probe failed: {}", e);
                false
            }
        }
    }
}
