//! # Embedded Memory Store
//!
//! A read-only collection held in memory and loaded from a JSON file (one
//! array of objects) or NDJSON (one object per line). Timestamp strings in the
//! file are stored as native dates, the way a document database would hold
//! them, so queries must compare against dates rather than strings.

use super::{CollectionStats, DocumentStore, FieldStat, StoreConnector};
use crate::aggregate;
use qy_core::{temporal, Document, Error, Result, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct MemoryStore {
    collection: String,
    documents: Arc<Vec<Document>>,
}

impl MemoryStore {
    /// Build a store from documents. Date-shaped strings become native dates.
    pub fn new(collection: impl Into<String>, documents: Vec<Document>) -> Self {
        let documents = documents
            .into_iter()
            .map(|doc| match temporal::normalize(&Value::Document(doc)) {
                Value::Document(d) => d,
                _ => Document::new(),
            })
            .collect();
        Self {
            collection: collection.into(),
            documents: Arc::new(documents),
        }
    }

    /// Parse a JSON array or NDJSON text into documents.
    pub fn parse_documents(text: &str) -> Result<Vec<Document>> {
        let trimmed = text.trim_start();
        let values: Vec<Value> = if trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed)? {
                Value::Array(items) => items,
                _ => Vec::new(),
            }
        } else {
            trimmed
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str::<Value>)
                .collect::<std::result::Result<_, _>>()?
        };

        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Value::Document(d) => Ok(d),
                other => Err(Error::Config(format!(
                    "record {} is {}, expected an object",
                    i,
                    other.type_name()
                ))),
            })
            .collect()
    }

    pub async fn load(path: &Path, collection: impl Into<String>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let documents = Self::parse_documents(&text)?;
        Ok(Self::new(collection, documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Document>> {
        aggregate::run_pipeline(&self.documents, pipeline).map_err(Error::Store)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.documents.len() as u64)
    }

    async fn sample(&self, limit: usize) -> Result<Vec<Document>> {
        Ok(self.documents.iter().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let mut size_bytes = 0u64;
        let mut fields: Vec<(String, BTreeSet<&'static str>, u64)> = Vec::new();
        for doc in self.documents.iter() {
            size_bytes += doc_size(doc);
            for (key, value) in doc.iter() {
                match fields.iter_mut().find(|(name, _, _)| name == key) {
                    Some((_, types, present)) => {
                        types.insert(value.type_name());
                        *present += 1;
                    }
                    None => fields.push((key.clone(), BTreeSet::from([value.type_name()]), 1)),
                }
            }
        }
        let count = self.documents.len() as u64;
        Ok(CollectionStats {
            collection: self.collection.clone(),
            count,
            size_bytes,
            avg_document_bytes: if count == 0 { 0 } else { size_bytes / count },
            fields: fields
                .into_iter()
                .map(|(name, types, present_in)| FieldStat {
                    name,
                    types: types.into_iter().map(String::from).collect(),
                    present_in,
                })
                .collect(),
        })
    }
}

fn doc_size(doc: &Document) -> u64 {
    serde_json::to_vec(doc).map(|b| b.len() as u64).unwrap_or(0)
}

/// Opens a [`MemoryStore`] from a file on each `connect`.
pub struct FileConnector {
    path: PathBuf,
    collection: String,
}

impl FileConnector {
    pub fn new(path: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            collection: collection.into(),
        }
    }
}

#[async_trait::async_trait]
impl StoreConnector for FileConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let store = MemoryStore::load(&self.path, self.collection.clone())
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", self.path.display(), e)))?;
        tracing::info!(
            "Loaded {} documents into collection '{}'",
            store.len(),
            self.collection
        );
        Ok(Arc::new(store))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.collection, self.path.display())
    }
}

/// Hands out an already-built store. Useful for tests and embedding.
pub struct StaticConnector {
    store: Arc<dyn DocumentStore>,
}

impl StaticConnector {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl StoreConnector for StaticConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        Ok(self.store.clone())
    }

    fn describe(&self) -> String {
        format!("{} (in-process)", self.store.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_parse_json_array_and_ndjson() {
        let array = MemoryStore::parse_documents(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(array.len(), 2);
        let lines = MemoryStore::parse_documents("{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert!(MemoryStore::parse_documents("[1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_stored_timestamps_are_native_dates() {
        let docs = MemoryStore::parse_documents(
            r#"[{"createdAt": "2025-03-14T00:00:00.000Z", "day": "2025-03-14"}]"#,
        )
        .unwrap();
        let store = MemoryStore::new("reviews", docs);
        let sample = store.sample(1).await.unwrap();
        assert_eq!(
            sample[0].get("createdAt"),
            Some(&Value::DateTime(Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap()))
        );
        assert_eq!(sample[0].get("day"), Some(&Value::from("2025-03-14")));
    }

    #[tokio::test]
    async fn test_aggregate_errors_are_store_errors() {
        let store = MemoryStore::new("reviews", vec![]);
        let pipeline = vec![Value::from(json!({"$bogus": {}}))];
        let err = store.aggregate(&pipeline).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_stats_describe_fields() {
        let docs = MemoryStore::parse_documents(
            r#"[{"name": "Ada", "rating": 5}, {"name": "Grace", "rating": 4.5}, {"name": "Linus"}]"#,
        )
        .unwrap();
        let store = MemoryStore::new("reviews", docs);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count, 3);
        assert!(stats.size_bytes > 0);
        let rating = stats.fields.iter().find(|f| f.name == "rating").unwrap();
        assert_eq!(rating.types, vec!["double".to_string(), "int".to_string()]);
        assert_eq!(rating.present_in, 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_connection_error() {
        let connector = FileConnector::new("/nonexistent/reviews.json", "reviews");
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
