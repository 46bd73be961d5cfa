//! Hybrid search orchestrator
//!
//! validate → cache lookup → embed query → per-kind vector search, run
//! concurrently → relational filters → hybrid scoring → rank → truncate →
//! cache write.
//!
//! A failed or timed-out query embedding aborts the search. A failure in one
//! kind's vector query or metadata fetch only degrades that kind.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache::{CacheKey, ResultCache};
use super::embedding::EmbeddingGenerator;
use super::filters::SearchFilters;
use super::history::{SearchHistory, SearchHistoryItem};
use super::similarity::{hybrid_score, keyword_match, recency_boost};
use super::vectordb::{VectorFilter, VectorStore};
use crate::core::config::{EngineConfig, OrganizationScope};
use crate::core::error::{with_timeout, KgError, Result};
use crate::core::model::{KnowledgeRecord, RecordKind};
use crate::core::schema::validate_query;
use crate::store::RelationalStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub kind: RecordKind,
    pub id: String,
    pub title: String,
    pub organization_id: Option<String>,
    pub similarity: f32,
    pub score: f32,
    pub updated_at: DateTime<Utc>,
}

/// A record kind that could not contribute to a search.
#[derive(Debug, Clone, Serialize)]
pub struct DegradedKind {
    pub kind: RecordKind,
    pub error_kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub cache_hit: bool,
    pub degraded: Vec<DegradedKind>,
    pub cross_organization: bool,
}

pub struct SearchEngine {
    embedder: Arc<dyn EmbeddingGenerator>,
    vectors: Arc<dyn VectorStore>,
    records: Arc<dyn RelationalStore>,
    cache: Arc<ResultCache>,
    history: Option<Arc<SearchHistory>>,
    config: EngineConfig,
}

impl SearchEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingGenerator>,
        vectors: Arc<dyn VectorStore>,
        records: Arc<dyn RelationalStore>,
        cache: Arc<ResultCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            records,
            cache,
            history: None,
            config,
        }
    }

    pub fn with_history(mut self, history: Arc<SearchHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn records(&self) -> &Arc<dyn RelationalStore> {
        &self.records
    }

    /// Ranked results for `query`, at most `max_results` of them.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
        use_cache: bool,
    ) -> Result<Vec<SearchResult>> {
        Ok(self
            .search_detailed(query, filters, max_results, use_cache)
            .await?
            .results)
    }

    pub async fn search_detailed(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
        use_cache: bool,
    ) -> Result<SearchOutcome> {
        validate_query(query, self.config.search.max_query_chars)?;
        filters.validate()?;
        if max_results == 0 {
            return Err(KgError::invalid("max_results must be at least 1"));
        }

        let cross_organization = filters.organization_id.is_none();
        if cross_organization {
            match self.config.search.organization_scope {
                OrganizationScope::Required => {
                    return Err(KgError::invalid("an organization filter is required"));
                }
                OrganizationScope::Open => {
                    tracing::warn!(query, "search without organization filter spans all organizations");
                }
            }
        }

        let key = CacheKey::new(query, filters, max_results);
        if use_cache {
            if let Some(results) = self.cache.get(&key) {
                tracing::debug!(key = %key, count = results.len(), "cache hit");
                let outcome = SearchOutcome {
                    results,
                    cache_hit: true,
                    degraded: Vec::new(),
                    cross_organization,
                };
                self.remember(query, filters, &outcome);
                return Ok(outcome);
            }
        }

        let embedding = with_timeout(
            "query embedding",
            self.config.search.embedding_timeout(),
            self.embedder.embed(query),
        )
        .await?;
        if embedding.vector.is_empty() || embedding.vector.iter().any(|v| !v.is_finite()) {
            return Err(KgError::external(
                "embedding generator",
                "returned an empty or non-finite vector",
            ));
        }
        tracing::debug!(model = %embedding.model_id, dim = embedding.vector.len(), "query embedded");

        let now = Utc::now();
        let vector = embedding.vector.as_slice();
        let (entities, relations, topics) = tokio::join!(
            self.search_kind(RecordKind::Entity, query, vector, filters, max_results, now),
            self.search_kind(RecordKind::Relation, query, vector, filters, max_results, now),
            self.search_kind(RecordKind::Topic, query, vector, filters, max_results, now),
        );

        let mut merged = Vec::new();
        let mut degraded = Vec::new();
        for (kind, outcome) in [
            (RecordKind::Entity, entities),
            (RecordKind::Relation, relations),
            (RecordKind::Topic, topics),
        ] {
            match outcome {
                Ok(results) => merged.extend(results),
                Err(e) => {
                    tracing::warn!(kind = kind.as_str(), error = %e, "record kind degraded, continuing without it");
                    degraded.push(DegradedKind {
                        kind,
                        error_kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut results = rank(merged);
        results.truncate(max_results);

        if use_cache {
            if degraded.is_empty() {
                self.cache.set(&key, results.clone());
            } else {
                tracing::debug!(key = %key, "partial results not cached");
            }
        }

        let outcome = SearchOutcome {
            results,
            cache_hit: false,
            degraded,
            cross_organization,
        };
        self.remember(query, filters, &outcome);
        Ok(outcome)
    }

    async fn search_kind(
        &self,
        kind: RecordKind,
        query: &str,
        vector: &[f32],
        filters: &SearchFilters,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchResult>> {
        let timeout = self.config.search.store_timeout();
        let vector_filter = VectorFilter {
            organization_id: filters.organization_id.clone(),
            min_similarity: self.config.search.similarity_floor,
        };
        let matches = with_timeout(
            &format!("{} vector search", kind),
            timeout,
            self.vectors.find_similar(kind, vector, max_results, &vector_filter),
        )
        .await?;
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
        let records = with_timeout(
            &format!("{} metadata fetch", kind),
            timeout,
            self.records.fetch(kind, &ids),
        )
        .await?;
        let by_id: HashMap<&str, &KnowledgeRecord> = records.iter().map(|r| (r.id(), r)).collect();

        let weights = &self.config.scoring;
        let mut scored = Vec::with_capacity(matches.len());
        for m in &matches {
            let Some(record) = by_id.get(m.id.as_str()) else {
                tracing::debug!(kind = kind.as_str(), id = %m.id, "vector without relational record, skipped");
                continue;
            };
            if !filters.matches(record) {
                continue;
            }
            let keyword = keyword_match(query, &record.search_text());
            let recency = recency_boost(Some(record.updated_at()), now);
            scored.push(SearchResult {
                kind,
                id: m.id.clone(),
                title: record.display_title(),
                organization_id: record.organization_id().map(String::from),
                similarity: m.similarity,
                score: hybrid_score(weights, m.similarity, keyword, recency),
                updated_at: record.updated_at(),
            });
        }
        tracing::debug!(kind = kind.as_str(), candidates = matches.len(), kept = scored.len(), "kind searched");
        Ok(scored)
    }

    fn remember(&self, query: &str, filters: &SearchFilters, outcome: &SearchOutcome) {
        if !self.config.search.record_history {
            return;
        }
        if let Some(history) = &self.history {
            let item = SearchHistoryItem {
                query: query.to_string(),
                filters: filters.clone(),
                result_count: outcome.results.len(),
                cache_hit: outcome.cache_hit,
                timestamp: Utc::now(),
            };
            if let Err(e) = history.record(item) {
                tracing::warn!(error = %e, "failed to record search history");
            }
        }
    }
}

/// Score descending; ties by kind (entity, relation, topic), then most
/// recently updated, then id. Duplicate (kind, id) pairs keep the first.
pub fn rank(mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.kind.priority().cmp(&b.kind.priority()))
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut seen: HashSet<(RecordKind, String)> = HashSet::new();
    results.retain(|r| seen.insert((r.kind, r.id.clone())));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn result(kind: RecordKind, id: &str, score: f32, age_days: i64) -> SearchResult {
        SearchResult {
            kind,
            id: id.to_string(),
            title: id.to_string(),
            organization_id: None,
            similarity: score,
            score,
            updated_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn test_rank_tie_breaks() {
        let ranked = rank(vec![
            result(RecordKind::Topic, "t1", 0.5, 0),
            result(RecordKind::Entity, "e-old", 0.5, 10),
            result(RecordKind::Relation, "r1", 0.5, 0),
            result(RecordKind::Entity, "e-new", 0.5, 1),
            result(RecordKind::Topic, "t2", 0.9, 100),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "e-new", "e-old", "r1", "t1"]);
    }

    #[test]
    fn test_rank_dedupes_kind_and_id() {
        let ranked = rank(vec![
            result(RecordKind::Entity, "x", 0.4, 0),
            result(RecordKind::Entity, "x", 0.8, 0),
            result(RecordKind::Topic, "x", 0.6, 0),
        ]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, 0.8);
    }
}
