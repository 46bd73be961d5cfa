//! Shared fixtures for integration tests
//!
//! Stores are in-memory SQLite. Embeddings come from [`TermEmbedder`], which
//! gives each configured term its own axis so similarities are predictable.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use kgraph_rag::core::config::EngineConfig;
use kgraph_rag::core::error::{KgError, Result};
use kgraph_rag::core::model::{EmbeddingInfo, KnowledgeRecord, RecordKind};
use kgraph_rag::integrity::BatchRunner;
use kgraph_rag::search::embedding::{Embedding, EmbeddingGenerator};
use kgraph_rag::search::history::SearchHistory;
use kgraph_rag::search::vectordb::{VectorFilter, VectorMatch, VectorMetadata, VectorStore};
use kgraph_rag::search::{ResultCache, SearchEngine, SqliteVectorStore};
use kgraph_rag::store::{MemoryKvStore, RelationalStore, SqliteRecordStore};

pub const MODEL_ID: &str = "term-test";
pub const MODEL_VERSION: &str = "1.0";

// =============================================================================
// Embedders
// =============================================================================

/// One axis per term plus a small bias axis. Text without any term embeds to
/// the bias axis alone, which stays under the default similarity floor
/// against any term-bearing query.
pub struct TermEmbedder {
    terms: Vec<String>,
    calls: AtomicUsize,
}

impl TermEmbedder {
    pub fn new(terms: &[&str]) -> Self {
        Self {
            terms: terms.iter().map(|t| t.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .terms
            .iter()
            .map(|t| if lower.contains(t.as_str()) { 1.0 } else { 0.0 })
            .collect();
        v.push(0.05);
        v
    }
}

#[async_trait]
impl EmbeddingGenerator for TermEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Embedding {
            vector: self.vector_for(text),
            model_id: MODEL_ID.to_string(),
        })
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingGenerator for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(KgError::external("embedding generator", "model server unavailable"))
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

/// Delegates to an inner embedder after a fixed delay.
pub struct SlowEmbedder {
    pub inner: Arc<TermEmbedder>,
    pub delay: std::time::Duration,
}

#[async_trait]
impl EmbeddingGenerator for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(text).await
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

// =============================================================================
// Vector store wrapper
// =============================================================================

/// Delegates to an inner store but fails every query for one kind.
pub struct FailingKindStore {
    pub inner: Arc<SqliteVectorStore>,
    pub failing: RecordKind,
}

#[async_trait]
impl VectorStore for FailingKindStore {
    async fn find_similar(
        &self,
        kind: RecordKind,
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>> {
        if kind == self.failing {
            return Err(KgError::external("vector store", format!("{} collection offline", kind)));
        }
        self.inner.find_similar(kind, query, k, filter).await
    }

    async fn save(&self, kind: RecordKind, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()> {
        self.inner.save(kind, id, vector, metadata).await
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool> {
        self.inner.delete(kind, id).await
    }

    async fn exists(&self, kind: RecordKind, id: &str, organization_id: Option<&str>) -> Result<bool> {
        self.inner.exists(kind, id, organization_id).await
    }

    async fn count(&self, kind: RecordKind, organization_id: Option<&str>) -> Result<usize> {
        self.inner.count(kind, organization_id).await
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub records: Arc<SqliteRecordStore>,
    pub vectors: Arc<SqliteVectorStore>,
    pub kv: Arc<MemoryKvStore>,
    pub embedder: Arc<TermEmbedder>,
    pub cache: Arc<ResultCache>,
    pub config: EngineConfig,
}

impl Fixture {
    pub fn new(terms: &[&str]) -> Self {
        let config = EngineConfig::default();
        let kv = Arc::new(MemoryKvStore::new());
        Self {
            records: Arc::new(SqliteRecordStore::open_in_memory().expect("record store")),
            vectors: Arc::new(SqliteVectorStore::open_in_memory().expect("vector store")),
            cache: Arc::new(ResultCache::with_persisted(config.cache.clone(), kv.clone())),
            kv,
            embedder: Arc::new(TermEmbedder::new(terms)),
            config,
        }
    }

    pub fn stamp() -> EmbeddingInfo {
        EmbeddingInfo {
            model_id: MODEL_ID.to_string(),
            version: MODEL_VERSION.to_string(),
        }
    }

    pub fn engine(&self) -> SearchEngine {
        SearchEngine::new(
            self.embedder.clone(),
            self.vectors.clone(),
            self.records.clone(),
            self.cache.clone(),
            self.config.clone(),
        )
    }

    pub fn engine_with_history(&self) -> (SearchEngine, Arc<SearchHistory>) {
        let history = Arc::new(SearchHistory::new(self.kv.clone(), 500));
        (self.engine().with_history(history.clone()), history)
    }

    pub fn runner() -> BatchRunner {
        BatchRunner::new(
            4,
            2,
            std::time::Duration::from_millis(1),
            std::time::Duration::from_secs(5),
        )
    }

    /// Store the record only; no vector, not synced.
    pub fn add(&self, record: KnowledgeRecord) {
        self.records.upsert(&record).expect("upsert record");
    }

    /// Store the record, its vector, and flag it synced with the current stamp.
    pub async fn add_indexed(&self, record: KnowledgeRecord) {
        let kind = record.kind();
        let id = record.id().to_string();
        let metadata = VectorMetadata {
            organization_id: record.organization_id().map(String::from),
            model_id: MODEL_ID.to_string(),
            version: MODEL_VERSION.to_string(),
        };
        let vector = self.embedder.vector_for(&record.embedding_text());
        self.add(record);
        self.vectors.save(kind, &id, &vector, &metadata).await.expect("save vector");
        self.records.set_synced(kind, &id, true).await.expect("set synced");
        self.records
            .record_embedding(kind, &id, &Self::stamp())
            .await
            .expect("record embedding");
    }

    /// Flag a record synced without writing its vector.
    pub async fn add_flagged_without_vector(&self, record: KnowledgeRecord) {
        let kind = record.kind();
        let id = record.id().to_string();
        self.add(record);
        self.records.set_synced(kind, &id, true).await.expect("set synced");
    }
}
