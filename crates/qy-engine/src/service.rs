//! # Query Service
//!
//! The facade the HTTP boundary talks to. One explicitly constructed handle
//! owns the store connection, the [`Translator`] and the [`Summarizer`].
//!
//! The store handle is written only by `connect` and `disconnect`.
//! Initialization is serialized by an async mutex, so concurrent first
//! requests share a single connection attempt instead of racing.

use crate::executor::QueryExecutor;
use crate::store::{CollectionStats, DocumentStore, StoreConnector};
use crate::summary::Summarizer;
use crate::translator::Translator;
use qy_core::{Document, Error, Result, StructuredQuery};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub struct QueryService {
    connector: Arc<dyn StoreConnector>,
    translator: Arc<Translator>,
    summarizer: Summarizer,
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    init: Mutex<()>,
}

impl QueryService {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        translator: Translator,
        summarizer: Summarizer,
    ) -> Self {
        Self {
            connector,
            translator: Arc::new(translator),
            summarizer,
            store: RwLock::new(None),
            init: Mutex::new(()),
        }
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Open the store once. Later and concurrent calls reuse the handle.
    pub async fn connect(&self) -> Result<()> {
        if self.store.read().await.is_some() {
            return Ok(());
        }
        let _guard = self.init.lock().await;
        if self.store.read().await.is_some() {
            return Ok(());
        }
        info!("Connecting to {}", self.connector.describe());
        let store = self.connector.connect().await?;
        *self.store.write().await = Some(store);
        Ok(())
    }

    /// Close the store if open. Safe to call at any time.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.init.lock().await;
        let store = self.store.write().await.take();
        if let Some(store) = store {
            info!("Closing {}", store.name());
            store.close().await?;
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.store.read().await.is_some()
    }

    async fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        self.store
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Connection("store is not connected".to_string()))
    }

    /// Number of documents in the collection.
    pub async fn test_connection(&self) -> Result<u64> {
        self.store().await?.count().await
    }

    pub async fn get_sample_data(&self, limit: usize) -> Result<Vec<Document>> {
        self.store().await?.sample(limit).await
    }

    pub async fn get_collection_stats(&self) -> Result<CollectionStats> {
        self.store().await?.stats().await
    }

    /// Run a caller-supplied pipeline exactly once.
    pub async fn execute_raw_query(&self, query: &StructuredQuery) -> Result<Vec<Document>> {
        self.executor().await?.execute_once(query).await
    }

    pub async fn generate_query(&self, request: &str) -> Result<StructuredQuery> {
        self.translator.translate(request).await
    }

    pub async fn execute_query_with_retry(
        &self,
        query: StructuredQuery,
        request: &str,
        max_attempts: u32,
    ) -> Result<Vec<Document>> {
        self.executor()
            .await?
            .execute_with_retry(query, request, max_attempts)
            .await
    }

    pub async fn reasoning_ready(&self) -> bool {
        self.translator.test_connection().await
    }

    pub async fn summarize(&self, request: &str, records: &[Document]) -> Result<String> {
        self.summarizer.summarize(request, records).await.map_err(|e| {
            warn!("Summary failed: {}", e);
            e
        })
    }

    async fn executor(&self) -> Result<QueryExecutor> {
        Ok(QueryExecutor::new(self.store().await?, self.translator.clone()))
    }
}
