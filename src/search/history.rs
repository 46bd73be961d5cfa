//! Search history and usage analytics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::filters::SearchFilters;
use crate::core::error::Result;
use crate::store::PersistedStore;

pub const HISTORY_KEY: &str = "search_history";
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryItem {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    pub result_count: usize,
    #[serde(default)]
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Count {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchAnalytics {
    pub total_searches: usize,
    pub unique_queries: usize,
    pub average_result_count: f64,
    pub cache_hit_rate: f64,
    pub top_queries: Vec<Count>,
    pub top_organizations: Vec<Count>,
    pub top_entity_types: Vec<Count>,
    pub top_relation_types: Vec<Count>,
}

/// Bounded, newest-last log kept under a single key.
pub struct SearchHistory {
    store: Arc<dyn PersistedStore>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl SearchHistory {
    pub fn new(store: Arc<dyn PersistedStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<SearchHistoryItem>> {
        match self.store.get(HISTORY_KEY)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(items) => Ok(items),
                Err(e) => {
                    tracing::warn!(error = %e, "search history unreadable, starting fresh");
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn record(&self, item: SearchHistoryItem) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut items = self.load()?;
        items.push(item);
        if items.len() > self.capacity {
            let excess = items.len() - self.capacity;
            items.drain(..excess);
        }
        self.store.set(HISTORY_KEY, &serde_json::to_string(&items)?)
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<SearchHistoryItem>> {
        let mut items = self.load()?;
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(HISTORY_KEY)
    }

    pub fn analyze(&self, top_n: usize) -> Result<SearchAnalytics> {
        let items = self.load()?;
        if items.is_empty() {
            return Ok(SearchAnalytics::default());
        }

        let mut queries: HashMap<String, usize> = HashMap::new();
        let mut orgs: HashMap<String, usize> = HashMap::new();
        let mut entity_types: HashMap<String, usize> = HashMap::new();
        let mut relation_types: HashMap<String, usize> = HashMap::new();
        let mut unique: HashSet<String> = HashSet::new();
        let mut results_total = 0usize;
        let mut hits = 0usize;

        for item in &items {
            let q = item.query.trim().to_lowercase();
            unique.insert(q.clone());
            *queries.entry(q).or_insert(0) += 1;
            if let Some(org) = &item.filters.organization_id {
                *orgs.entry(org.clone()).or_insert(0) += 1;
            }
            if let Some(t) = item.filters.entity_type {
                *entity_types.entry(t.to_string()).or_insert(0) += 1;
            }
            if let Some(t) = item.filters.relation_type {
                *relation_types.entry(t.to_string()).or_insert(0) += 1;
            }
            results_total += item.result_count;
            if item.cache_hit {
                hits += 1;
            }
        }

        let total = items.len();
        Ok(SearchAnalytics {
            total_searches: total,
            unique_queries: unique.len(),
            average_result_count: results_total as f64 / total as f64,
            cache_hit_rate: hits as f64 / total as f64,
            top_queries: top(queries, top_n),
            top_organizations: top(orgs, top_n),
            top_entity_types: top(entity_types, top_n),
            top_relation_types: top(relation_types, top_n),
        })
    }
}

fn top(counts: HashMap<String, usize>, n: usize) -> Vec<Count> {
    let mut ranked: Vec<Count> = counts
        .into_iter()
        .map(|(value, count)| Count { value, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::EntityType;
    use crate::store::MemoryKvStore;

    fn item(query: &str, org: Option<&str>, results: usize, hit: bool) -> SearchHistoryItem {
        SearchHistoryItem {
            query: query.to_string(),
            filters: SearchFilters {
                organization_id: org.map(String::from),
                entity_type: Some(EntityType::Company),
                ..Default::default()
            },
            result_count: results,
            cache_hit: hit,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_bounded_newest_first() -> Result<()> {
        let history = SearchHistory::new(Arc::new(MemoryKvStore::new()), 3);
        for q in ["a", "b", "c", "d"] {
            history.record(item(q, None, 1, false))?;
        }
        let recent: Vec<String> = history.recent(10)?.into_iter().map(|i| i.query).collect();
        assert_eq!(recent, vec!["d", "c", "b"]);
        Ok(())
    }

    #[test]
    fn test_analyze() -> Result<()> {
        let history = SearchHistory::new(Arc::new(MemoryKvStore::new()), DEFAULT_HISTORY_CAPACITY);
        history.record(item("Acme", Some("org1"), 4, false))?;
        history.record(item("acme", Some("org1"), 2, true))?;
        history.record(item("budget", Some("org2"), 0, false))?;

        let stats = history.analyze(5)?;
        assert_eq!(stats.total_searches, 3);
        assert_eq!(stats.unique_queries, 2);
        assert_eq!(stats.average_result_count, 2.0);
        assert_eq!(stats.top_queries[0], Count { value: "acme".to_string(), count: 2 });
        assert_eq!(stats.top_organizations[0].value, "org1");
        assert_eq!(stats.top_entity_types[0].count, 3);
        Ok(())
    }
}
