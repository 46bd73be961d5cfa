//! Embedding regeneration: re-embed records and push their vectors.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::batch::{BatchProgress, BatchRunner, CancellationToken, ItemError};
use crate::core::error::{KgError, Result};
use crate::core::model::{EmbeddingInfo, KnowledgeRecord, RecordKind};
use crate::search::cache::ResultCache;
use crate::search::embedding::EmbeddingGenerator;
use crate::search::similarity::{classify_embedding, Freshness};
use crate::search::vectordb::{VectorMetadata, VectorStore};
use crate::store::{RecordScope, RelationalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegenerationMode {
    /// Records not flagged as synced.
    Unsynced,
    /// Unsynced records plus records stamped with another model or version.
    Outdated,
    All,
}

impl FromStr for RegenerationMode {
    type Err = KgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "unsynced" => Ok(Self::Unsynced),
            "outdated" => Ok(Self::Outdated),
            "all" => Ok(Self::All),
            other => Err(KgError::invalid(format!(
                "unknown regeneration mode '{}' (must be: unsynced|outdated|all)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationReport {
    pub kind: RecordKind,
    pub mode: RegenerationMode,
    pub scanned: usize,
    pub selected: usize,
    pub regenerated: usize,
    pub errors: Vec<ItemError>,
    pub cancelled: bool,
}

pub struct Regenerator {
    embedder: Arc<dyn EmbeddingGenerator>,
    vectors: Arc<dyn VectorStore>,
    records: Arc<dyn RelationalStore>,
    runner: BatchRunner,
    stamp: EmbeddingInfo,
    cache: Option<Arc<ResultCache>>,
}

impl Regenerator {
    pub fn new(
        embedder: Arc<dyn EmbeddingGenerator>,
        vectors: Arc<dyn VectorStore>,
        records: Arc<dyn RelationalStore>,
        runner: BatchRunner,
        stamp: EmbeddingInfo,
    ) -> Self {
        Self {
            embedder,
            vectors,
            records,
            runner,
            stamp,
            cache: None,
        }
    }

    /// Clear the search cache whenever a run re-embeds anything.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn regenerate(
        &self,
        kind: RecordKind,
        organization_id: Option<&str>,
        mode: RegenerationMode,
        token: &CancellationToken,
        progress: Option<&UnboundedSender<BatchProgress>>,
    ) -> Result<RegenerationReport> {
        let scope = RecordScope::organization(organization_id);
        let candidates = match mode {
            RegenerationMode::Unsynced => self.records.list(kind, &scope.synced(false)).await?,
            _ => self.records.list(kind, &scope).await?,
        };
        let scanned = candidates.len();
        let selected: Vec<KnowledgeRecord> = match mode {
            RegenerationMode::Outdated => candidates
                .into_iter()
                .filter(|r| {
                    !r.chroma_synced() || classify_embedding(r.embedding(), &self.stamp) != Freshness::Current
                })
                .collect(),
            _ => candidates,
        };
        let selected_count = selected.len();

        let outcome = self
            .runner
            .run(selected, token, progress, |record| self.regenerate_one(kind, record))
            .await;

        let report = RegenerationReport {
            kind,
            mode,
            scanned,
            selected: selected_count,
            regenerated: outcome.succeeded.len(),
            errors: outcome.errors,
            cancelled: outcome.cancelled,
        };
        if report.regenerated > 0 {
            if let Some(cache) = &self.cache {
                cache.clear();
                tracing::debug!(kind = kind.as_str(), "search cache cleared after regeneration");
            }
        }
        tracing::info!(
            kind = kind.as_str(),
            selected = report.selected,
            regenerated = report.regenerated,
            errors = report.errors.len(),
            "embedding regeneration finished"
        );
        Ok(report)
    }

    async fn regenerate_one(&self, kind: RecordKind, record: KnowledgeRecord) -> Result<()> {
        let embedding = self.embedder.embed(&record.embedding_text()).await?;
        let metadata = VectorMetadata {
            organization_id: record.organization_id().map(String::from),
            model_id: self.stamp.model_id.clone(),
            version: self.stamp.version.clone(),
        };
        self.vectors
            .save(kind, record.id(), &embedding.vector, &metadata)
            .await?;
        self.records.record_embedding(kind, record.id(), &self.stamp).await?;
        self.records.set_synced(kind, record.id(), true).await?;
        Ok(())
    }
}
