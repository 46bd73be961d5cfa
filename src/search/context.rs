//! Retrieval context for a language model
//!
//! Runs a hybrid search, loads the full records behind the hits and renders
//! them as markdown sections (entities, relations, topics) under a token
//! budget. Relation endpoints are resolved to entity names in one batch
//! fetch. Every rendered hit is listed in `sources`.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;

use super::engine::{SearchEngine, SearchResult};
use super::filters::SearchFilters;
use crate::core::error::Result;
use crate::core::model::{Entity, KnowledgeRecord, RecordKind, Relation, SemanticCategory, Topic};

const CHARS_PER_TOKEN: usize = 4;
const TOPIC_CONTENT_CHARS: usize = 800;
const RECENT_UPDATE_DAYS: i64 = 30;
const TRUNCATION_NOTE: &str = "\n\n(context truncated to fit the token budget)";

/// Free-form entity extensions worth showing, in display order.
const EXTENSION_KEYS: &[&str] = &["description", "url", "location", "industry", "role", "department"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSource {
    pub kind: RecordKind,
    pub id: String,
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeContext {
    pub context: String,
    pub sources: Vec<ContextSource>,
    pub results: Vec<SearchResult>,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

impl KnowledgeContext {
    fn empty() -> Self {
        Self {
            context: String::new(),
            sources: Vec::new(),
            results: Vec::new(),
            estimated_tokens: 0,
            truncated: false,
        }
    }
}

pub struct ContextBuilder<'a> {
    engine: &'a SearchEngine,
    per_kind_limit: usize,
    max_tokens: usize,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(engine: &'a SearchEngine) -> Self {
        let config = &engine.config().context;
        Self {
            engine,
            per_kind_limit: config.per_kind_limit.max(1),
            max_tokens: config.max_tokens.max(1),
        }
    }

    pub fn per_kind_limit(mut self, limit: usize) -> Self {
        self.per_kind_limit = limit.max(1);
        self
    }

    pub fn max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens.max(1);
        self
    }

    /// Search for `query` and render the hits. No hits yields an empty context.
    pub async fn build(&self, query: &str, filters: &SearchFilters) -> Result<KnowledgeContext> {
        let max_results = self.per_kind_limit * RecordKind::ALL.len();
        let results = self.engine.search(query, filters, max_results, true).await?;
        if results.is_empty() {
            tracing::debug!(query, "no results, empty context");
            return Ok(KnowledgeContext::empty());
        }

        let mut sections: Vec<String> = Vec::new();
        let mut sources = Vec::new();

        let entities = self.hits(&results, RecordKind::Entity);
        if !entities.is_empty() {
            let loaded = self.load(RecordKind::Entity, &entities).await;
            let mut lines = vec!["## Related entities\n".to_string()];
            for hit in entities {
                match loaded.get(hit.id.as_str()) {
                    Some(KnowledgeRecord::Entity(e)) => render_entity(&mut lines, e, hit.score),
                    _ => lines.push(format!("- **{}**{}", hit.title, relevance(hit.score))),
                }
                sources.push(source(hit, hit.title.clone()));
            }
            sections.push(lines.join("\n"));
        }

        let relations = self.hits(&results, RecordKind::Relation);
        if !relations.is_empty() {
            let loaded = self.load(RecordKind::Relation, &relations).await;
            let names = self.endpoint_names(loaded.values()).await;
            let mut lines = vec!["## Related relations\n".to_string()];
            for hit in relations {
                let name = match loaded.get(hit.id.as_str()) {
                    Some(KnowledgeRecord::Relation(r)) => render_relation(&mut lines, r, &names, hit.score),
                    _ => {
                        lines.push(format!("- **{}**{}", hit.title, relevance(hit.score)));
                        hit.title.clone()
                    }
                };
                sources.push(source(hit, name));
            }
            sections.push(lines.join("\n"));
        }

        let topics = self.hits(&results, RecordKind::Topic);
        if !topics.is_empty() {
            let loaded = self.load(RecordKind::Topic, &topics).await;
            let mut lines = vec!["## Related topics\n".to_string()];
            for hit in topics {
                match loaded.get(hit.id.as_str()) {
                    Some(KnowledgeRecord::Topic(t)) => render_topic(&mut lines, t, hit.score),
                    _ => lines.push(format!("- **{}**{}", hit.title, relevance(hit.score))),
                }
                sources.push(source(hit, hit.title.clone()));
            }
            sections.push(lines.join("\n"));
        }

        let (context, estimated_tokens, truncated) = fit_budget(sections.join("\n\n"), self.max_tokens);
        tracing::debug!(query, sources = sources.len(), estimated_tokens, truncated, "context built");
        Ok(KnowledgeContext {
            context,
            sources,
            results,
            estimated_tokens,
            truncated,
        })
    }

    fn hits<'r>(&self, results: &'r [SearchResult], kind: RecordKind) -> Vec<&'r SearchResult> {
        results
            .iter()
            .filter(|r| r.kind == kind)
            .take(self.per_kind_limit)
            .collect()
    }

    /// Full records behind `hits`. A failed fetch leaves them out and the
    /// hit is rendered from its search result alone.
    async fn load(&self, kind: RecordKind, hits: &[&SearchResult]) -> HashMap<String, KnowledgeRecord> {
        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        match self.engine.records().fetch(kind, &ids).await {
            Ok(records) => records.into_iter().map(|r| (r.id().to_string(), r)).collect(),
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "context record fetch failed");
                HashMap::new()
            }
        }
    }

    async fn endpoint_names<'r>(&self, relations: impl Iterator<Item = &'r KnowledgeRecord>) -> HashMap<String, String> {
        let mut ids: HashSet<String> = HashSet::new();
        for record in relations {
            if let KnowledgeRecord::Relation(r) = record {
                ids.extend(r.source_entity_id.iter().cloned());
                ids.extend(r.target_entity_id.iter().cloned());
            }
        }
        if ids.is_empty() {
            return HashMap::new();
        }
        let ids: Vec<String> = ids.into_iter().collect();
        match self.engine.records().fetch(RecordKind::Entity, &ids).await {
            Ok(entities) => entities
                .into_iter()
                .filter_map(|r| match r {
                    KnowledgeRecord::Entity(e) => Some((e.id, e.name)),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "relation endpoint fetch failed");
                HashMap::new()
            }
        }
    }
}

fn source(hit: &SearchResult, name: String) -> ContextSource {
    ContextSource {
        kind: hit.kind,
        id: hit.id.clone(),
        name,
        score: if hit.score.is_finite() { hit.score } else { 0.0 },
    }
}

fn relevance(score: f32) -> String {
    if score.is_finite() {
        format!(" (relevance: {:.1}%)", score * 100.0)
    } else {
        String::new()
    }
}

fn render_entity(lines: &mut Vec<String>, entity: &Entity, score: f32) {
    lines.push(format!("- **{}** ({}){}", entity.name, entity.entity_type, relevance(score)));
    if !entity.aliases.is_empty() {
        lines.push(format!("  aliases: {}", entity.aliases.join(", ")));
    }
    if let Some(attrs) = &entity.metadata.attributes {
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(attrs) {
            for (key, value) in fields.iter().filter(|(key, _)| key.as_str() != "kind") {
                if let Some(text) = value.as_str() {
                    lines.push(format!("  {}: {}", key, text));
                }
            }
        }
    }
    for key in EXTENSION_KEYS {
        if let Some(text) = entity.metadata.extensions.get(*key).and_then(|v| v.as_str()) {
            lines.push(format!("  {}: {}", key, text));
        }
    }
    let days = (Utc::now() - entity.updated_at).num_days();
    if (0..RECENT_UPDATE_DAYS).contains(&days) {
        lines.push(format!("  updated: {} days ago", days));
    }
}

/// Returns the source name, `type: source → target`.
fn render_relation(lines: &mut Vec<String>, relation: &Relation, names: &HashMap<String, String>, score: f32) -> String {
    let name_of = |id: &Option<String>| id.as_ref().and_then(|id| names.get(id)).cloned();
    let source_name = name_of(&relation.source_entity_id);
    let target_name = name_of(&relation.target_entity_id);

    lines.push(format!("- **{}**{}", relation.relation_type, relevance(score)));
    match (&source_name, &target_name) {
        (Some(s), Some(t)) => lines.push(format!("  {} → {}", s, t)),
        (Some(s), None) => lines.push(format!("  source: {}", s)),
        (None, Some(t)) => lines.push(format!("  target: {}", t)),
        (None, None) => {}
    }
    if !relation.description.trim().is_empty() {
        lines.push(format!("  description: {}", relation.description));
    }
    lines.push(format!("  confidence: {:.1}%", relation.confidence * 100.0));
    if let Some(evidence) = &relation.metadata.evidence {
        lines.push(format!("  evidence: {}", evidence));
    }
    if let Some(since) = &relation.metadata.since {
        lines.push(format!("  since: {}", since));
    }

    format!(
        "{}: {} → {}",
        relation.relation_type,
        source_name.as_deref().unwrap_or("(unknown source)"),
        target_name.as_deref().unwrap_or("(unknown target)")
    )
}

fn render_topic(lines: &mut Vec<String>, topic: &Topic, score: f32) {
    lines.push(format!("- **{}**{}", topic.title, relevance(score)));
    if !topic.content.trim().is_empty() {
        let content = if topic.content.chars().count() > TOPIC_CONTENT_CHARS {
            let head: String = topic.content.chars().take(TOPIC_CONTENT_CHARS).collect();
            format!("{}...", head)
        } else {
            topic.content.clone()
        };
        lines.push(format!("  content: {}", content));
    }
    if topic.semantic_category != SemanticCategory::Other {
        lines.push(format!("  category: {}", topic.semantic_category.as_str()));
    }
    if !topic.keywords.is_empty() {
        lines.push(format!("  keywords: {}", topic.keywords.join(", ")));
    }
}

/// Cut `context` to the budget on a character boundary.
fn fit_budget(context: String, max_tokens: usize) -> (String, usize, bool) {
    let chars = context.chars().count();
    let estimated = chars.div_ceil(CHARS_PER_TOKEN);
    if estimated <= max_tokens {
        return (context, estimated, false);
    }
    let mut cut: String = context.chars().take(max_tokens * CHARS_PER_TOKEN).collect();
    cut.push_str(TRUNCATION_NOTE);
    (cut, max_tokens, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_budget_counts_characters() {
        let text = "会議".repeat(10);
        let (kept, tokens, truncated) = fit_budget(text.clone(), 5);
        assert!(!truncated);
        assert_eq!(tokens, 5);
        assert_eq!(kept, text);

        let (cut, tokens, truncated) = fit_budget(text, 2);
        assert!(truncated);
        assert_eq!(tokens, 2);
        assert!(cut.starts_with(&"会議".repeat(4)));
        assert!(cut.ends_with(TRUNCATION_NOTE));
    }

    #[test]
    fn test_relation_name_falls_back_for_unknown_endpoints() {
        let mut relation = Relation::new("r1", "t1", crate::core::model::RelationType::Supplies, "parts");
        relation.source_entity_id = Some("e1".to_string());
        relation.target_entity_id = Some("e-missing".to_string());
        let names = HashMap::from([("e1".to_string(), "Acme".to_string())]);

        let mut lines = Vec::new();
        let name = render_relation(&mut lines, &relation, &names, 0.5);
        assert_eq!(name, "supplies: Acme → (unknown target)");
        assert_eq!(lines[0], "- **supplies** (relevance: 50.0%)");
        assert_eq!(lines[1], "  source: Acme");
    }

    #[test]
    fn test_topic_content_is_capped() {
        let mut topic = Topic::new("t1", "Budget", "x".repeat(900));
        topic.semantic_category = SemanticCategory::Decision;
        let mut lines = Vec::new();
        render_topic(&mut lines, &topic, f32::NAN);
        assert_eq!(lines[0], "- **Budget**");
        assert_eq!(lines[1].chars().count(), "  content: ".len() + TOPIC_CONTENT_CHARS + 3);
        assert_eq!(lines[2], "  category: decision");
    }
}
