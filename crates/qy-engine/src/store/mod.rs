//! # Document Store
//!
//! The abstraction the pipeline executes against. Every backend implements
//! [`DocumentStore`]; a [`StoreConnector`] knows how to open one. Store-side
//! failures are opaque text ([`Error::Store`]) so the repair loop can hand
//! them to the translator unchanged.
//!
//! [`Error::Store`]: qy_core::Error::Store

pub mod memory;

use qy_core::{Document, Result, Value};
use serde::Serialize;
use std::sync::Arc;

/// Per-field summary of a collection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldStat {
    pub name: String,
    /// Distinct value type names seen for this field.
    pub types: Vec<String>,
    /// Number of documents carrying the field.
    pub present_in: u64,
}

/// Collection-level statistics for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub count: u64,
    pub size_bytes: u64,
    pub avg_document_bytes: u64,
    pub fields: Vec<FieldStat>,
}

/// A read-only collection that can run aggregation pipelines.
///
/// Implementations must be safe for concurrent use: many requests may run
/// pipelines against one handle at the same time.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Collection name, for logs and stats.
    fn name(&self) -> &str;

    /// Run an aggregation pipeline.
    async fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Document>>;

    /// Number of documents in the collection.
    async fn count(&self) -> Result<u64>;

    /// The first `limit` documents in natural order.
    async fn sample(&self, limit: usize) -> Result<Vec<Document>>;

    async fn stats(&self) -> Result<CollectionStats>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens a [`DocumentStore`]. Failures are [`qy_core::Error::Connection`].
#[async_trait::async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}
