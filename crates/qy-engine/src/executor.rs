//! # Query Executor
//!
//! Runs a [`StructuredQuery`] against the store with a bounded
//! retry-and-repair loop:
//!
//! ```text
//! ATTEMPT(i, q) ── ok ──────────────────────────▶ results
//!      │
//!      └─ err, i == max-1 ─────────────────────▶ Execution { attempts: max }
//!      └─ err ── repair(request, err, q) ── ok ─▶ ATTEMPT(i+1, q')
//!                                      └─ err ─▶ Repair (no further store call)
//! ```
//!
//! Attempts are strictly sequential. Every attempt re-normalizes a copy of
//! its query and checks the read-only rule before touching the store.

use crate::store::DocumentStore;
use crate::translator::Translator;
use qy_core::{normalize_query, Document, Error, Result, StructuredQuery};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// State of one retry loop.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub request: String,
    pub query: StructuredQuery,
    pub attempt: u32,
    pub last_error: Option<String>,
}

pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    translator: Arc<Translator>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, translator: Arc<Translator>) -> Self {
        Self { store, translator }
    }

    pub async fn execute_with_retry(
        &self,
        query: StructuredQuery,
        original_request: &str,
        max_attempts: u32,
    ) -> Result<Vec<Document>> {
        let max_attempts = max_attempts.max(1);
        let mut record = AttemptRecord {
            request: original_request.to_string(),
            query,
            attempt: 0,
            last_error: None,
        };

        loop {
            info!(
                "Attempt {}/{} with {} stage(s)",
                record.attempt + 1,
                max_attempts,
                record.query.len()
            );
            match self.attempt(&record.query).await {
                Ok(results) => {
                    info!(
                        "Attempt {} succeeded with {} record(s)",
                        record.attempt + 1,
                        results.len()
                    );
                    return Ok(results);
                }
                Err(message) => {
                    warn!("Attempt {} failed: {}", record.attempt + 1, message);
                    if record.attempt + 1 >= max_attempts {
                        return Err(Error::Execution {
                            attempts: max_attempts,
                            message,
                        });
                    }
                    let repaired = self
                        .translator
                        .repair(&record.request, &message, &record.query)
                        .await
                        .map_err(|e| {
                            warn!("Giving up: {}", e);
                            e
                        })?;
                    info!("Repaired query: {}", repaired);
                    record.query = repaired;
                    record.last_error = Some(message);
                    record.attempt += 1;
                }
            }
        }
    }

    /// One attempt, no repair.
    pub async fn execute_once(&self, query: &StructuredQuery) -> Result<Vec<Document>> {
        self.attempt(query)
            .await
            .map_err(|message| Error::Execution { attempts: 1, message })
    }

    async fn attempt(&self, query: &StructuredQuery) -> std::result::Result<Vec<Document>, String> {
        let query = normalize_query(query);
        query.ensure_read_only()?;
        self.store
            .aggregate(query.stages())
            .await
            .map_err(|e| e.to_string())
    }
}
