//! Two-tier search result cache
//!
//! Memory tier: bounded, strict LRU. Persisted tier: bounded independently,
//! oldest insertion evicted, backed by any [`PersistedStore`]. Reads check
//! memory first, then the persisted tier, promoting hits into memory.
//!
//! Every read validates the entry: expired entries and entries holding a
//! non-finite or non-positive score are deleted from both tiers and reported
//! as a miss. A persisted value that fails to parse is handled the same way.
//!
//! The keyword index maps query tokens to cache keys. It only answers
//! "which cached searches look related" and is never consulted by `get`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use super::engine::SearchResult;
use super::filters::SearchFilters;
use crate::core::config::CacheConfig;
use crate::core::error::KgError;
use crate::core::model::RecordKind;
use crate::core::schema::{index_tokens, normalize_query};
use crate::store::PersistedStore;

pub const PERSISTED_KEY_PREFIX: &str = "rag_search_cache_";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Hash of normalized query, canonical filters and result limit, plus the
/// provenance needed for targeted invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: String,
    query: String,
    organization_id: Option<String>,
}

impl CacheKey {
    pub fn new(query: &str, filters: &SearchFilters, max_results: usize) -> Self {
        let normalized = normalize_query(query);
        let material = format!("{}\u{1f}{}\u{1f}{}", normalized, filters.canonical(), max_results);
        Self {
            hash: format!("{:016x}", xxh3_64(material.as_bytes())),
            query: normalized,
            organization_id: filters.organization_id.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hash)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub query: String,
    pub organization_id: Option<String>,
    pub results: Vec<SearchResult>,
    pub inserted_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.inserted_at).num_milliseconds() > (self.ttl_secs as i64).saturating_mul(1000)
    }

    fn corruption(&self) -> Option<KgError> {
        let reason = self.results.iter().find_map(|r| {
            if !r.score.is_finite() || r.score <= 0.0 {
                Some(format!("{} '{}' has invalid score {}", r.kind, r.id, r.score))
            } else if !r.similarity.is_finite() {
                Some(format!("{} '{}' has invalid similarity {}", r.kind, r.id, r.similarity))
            } else {
                None
            }
        })?;
        Some(KgError::CacheCorruption(reason))
    }

    fn contains(&self, kind: RecordKind, id: &str) -> bool {
        self.results.iter().any(|r| r.kind == kind && r.id == id)
    }

    fn touches_organization(&self, org: &str) -> bool {
        self.organization_id.as_deref() == Some(org)
            || self.results.iter().any(|r| r.organization_id.as_deref() == Some(org))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_count: usize,
    pub persisted_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub corrupted: u64,
    pub evictions: u64,
}

/// A cached search that shares query tokens with a lookup.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedEntry {
    pub key: String,
    pub query: String,
    pub shared_tokens: usize,
    pub result_count: usize,
}

struct MemorySlot {
    entry: CacheEntry,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    memory: HashMap<String, MemorySlot>,
    keyword_index: HashMap<String, HashSet<String>>,
    tick: u64,
    counters: CacheCounters,
}

impl CacheState {
    fn index(&mut self, entry: &CacheEntry) {
        for token in index_tokens(&entry.query) {
            self.keyword_index.entry(token).or_default().insert(entry.key.clone());
        }
    }

    fn unindex(&mut self, key: &str) {
        self.keyword_index.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    fn insert_memory(&mut self, entry: CacheEntry, capacity: usize) {
        self.tick += 1;
        if !self.memory.contains_key(&entry.key) && self.memory.len() >= capacity {
            let lru = self
                .memory
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(k, _)| k.clone());
            if let Some(lru) = lru {
                self.memory.remove(&lru);
                self.counters.evictions += 1;
            }
        }
        let tick = self.tick;
        self.memory.insert(
            entry.key.clone(),
            MemorySlot {
                entry,
                last_access: tick,
            },
        );
    }
}

pub struct ResultCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    persisted: Option<Arc<dyn PersistedStore>>,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    /// Memory tier only.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            persisted: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_persisted(config: CacheConfig, store: Arc<dyn PersistedStore>) -> Self {
        let cache = Self {
            persisted: Some(store),
            ..Self::new(config)
        };
        cache.warm_index();
        cache
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<SearchResult>> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        let memory_hit = state.memory.get(key.as_str()).map(|slot| {
            let e = &slot.entry;
            (e.is_expired(now), e.corruption())
        });
        if let Some((expired, corruption)) = memory_hit {
            if expired {
                self.drop_entry(&mut state, key.as_str());
                state.counters.expired += 1;
                state.counters.misses += 1;
                return None;
            }
            if let Some(err) = corruption {
                tracing::warn!(key = key.as_str(), error = %err, "dropping corrupted cache entry");
                self.drop_entry(&mut state, key.as_str());
                state.counters.corrupted += 1;
                state.counters.misses += 1;
                return None;
            }
            state.counters.hits += 1;
            let slot = state.memory.get_mut(key.as_str())?;
            slot.last_access = tick;
            return Some(slot.entry.results.clone());
        }

        match self.read_persisted(key.as_str()) {
            PersistedRead::Found(entry) => {
                if entry.is_expired(now) {
                    self.drop_entry(&mut state, key.as_str());
                    state.counters.expired += 1;
                    state.counters.misses += 1;
                    return None;
                }
                if let Some(err) = entry.corruption() {
                    tracing::warn!(key = key.as_str(), error = %err, "dropping corrupted persisted cache entry");
                    self.drop_entry(&mut state, key.as_str());
                    state.counters.corrupted += 1;
                    state.counters.misses += 1;
                    return None;
                }
                let results = entry.results.clone();
                state.index(&entry);
                state.insert_memory(entry, self.config.max_memory_entries);
                state.counters.hits += 1;
                Some(results)
            }
            PersistedRead::Unparseable(err) => {
                tracing::warn!(key = key.as_str(), error = %err, "dropping unparseable persisted cache entry");
                self.drop_entry(&mut state, key.as_str());
                state.counters.corrupted += 1;
                state.counters.misses += 1;
                None
            }
            PersistedRead::Absent => {
                state.counters.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: &CacheKey, results: Vec<SearchResult>) {
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            query: key.query.clone(),
            organization_id: key.organization_id.clone(),
            results,
            inserted_at: self.clock.now(),
            ttl_secs: self.config.ttl_secs,
        };
        if let Some(err) = entry.corruption() {
            tracing::warn!(key = key.as_str(), error = %err, "refusing to cache invalid results");
            return;
        }

        // Persisted I/O happens before the state lock is taken.
        let trim = match &self.persisted {
            Some(store) => {
                match serde_json::to_string(&entry) {
                    Ok(json) => {
                        if let Err(e) = store.set(&persisted_key(&entry.key), &json) {
                            tracing::warn!(key = %entry.key, error = %e, "failed to persist cache entry");
                        }
                    }
                    Err(e) => tracing::warn!(key = %entry.key, error = %e, "failed to serialize cache entry"),
                }
                self.trim_persisted(store.as_ref())
            }
            None => PersistedTrim::default(),
        };

        let mut state = self.state.lock();
        state.index(&entry);
        state.insert_memory(entry, self.config.max_memory_entries);
        trim.apply(&mut state);
    }

    /// Remove one entry from both tiers by key hash.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.state.lock();
        self.drop_entry(&mut state, key);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.memory.clear();
        state.keyword_index.clear();
        if let Some(store) = &self.persisted {
            for key in store.keys(PERSISTED_KEY_PREFIX).unwrap_or_default() {
                if let Err(e) = store.remove(&key) {
                    tracing::warn!(%key, error = %e, "failed to remove persisted cache entry");
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let memory_count = self.state.lock().memory.len();
        let persisted_count = self
            .persisted
            .as_ref()
            .and_then(|s| s.keys(PERSISTED_KEY_PREFIX).ok())
            .map(|keys| keys.len())
            .unwrap_or(0);
        CacheStats {
            memory_count,
            persisted_count,
            total: memory_count + persisted_count,
        }
    }

    pub fn counters(&self) -> CacheCounters {
        self.state.lock().counters
    }

    /// Cache keys sharing at least one indexed token with `query`, most shared first.
    pub fn related_keys(&self, query: &str) -> Vec<(String, usize)> {
        let state = self.state.lock();
        let mut shared: HashMap<String, usize> = HashMap::new();
        for token in index_tokens(&normalize_query(query)) {
            if let Some(keys) = state.keyword_index.get(&token) {
                for key in keys {
                    *shared.entry(key.clone()).or_insert(0) += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = shared.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Still-valid cached searches related to `query`. Does not affect hit counters.
    pub fn find_related(&self, query: &str, limit: usize) -> Vec<RelatedEntry> {
        let now = self.clock.now();
        let mut related = Vec::new();
        for (key, shared_tokens) in self.related_keys(query) {
            if related.len() >= limit {
                break;
            }
            let entry = {
                let state = self.state.lock();
                state.memory.get(&key).map(|slot| slot.entry.clone())
            };
            let entry = match entry {
                Some(e) => Some(e),
                None => match self.read_persisted(&key) {
                    PersistedRead::Found(e) => Some(e),
                    _ => None,
                },
            };
            if let Some(entry) = entry {
                if !entry.is_expired(now) && entry.corruption().is_none() {
                    related.push(RelatedEntry {
                        key,
                        query: entry.query,
                        shared_tokens,
                        result_count: entry.results.len(),
                    });
                }
            }
        }
        related
    }

    /// Drop every cached search whose results include the record. Returns entries removed.
    pub fn invalidate_record(&self, kind: RecordKind, id: &str) -> usize {
        self.invalidate_where(|e| e.contains(kind, id))
    }

    /// Drop every cached search scoped to, or returning records of, `org`.
    pub fn invalidate_organization(&self, org: &str) -> usize {
        self.invalidate_where(|e| e.touches_organization(org))
    }

    fn invalidate_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut state = self.state.lock();
        let mut doomed: HashSet<String> = state
            .memory
            .values()
            .filter(|slot| predicate(&slot.entry))
            .map(|slot| slot.entry.key.clone())
            .collect();
        for (key, entry) in self.persisted_entries() {
            if entry.map_or(false, |e| predicate(&e)) {
                doomed.insert(key);
            }
        }
        for key in &doomed {
            self.drop_entry(&mut state, key);
        }
        doomed.len()
    }

    fn drop_entry(&self, state: &mut CacheState, key: &str) {
        state.memory.remove(key);
        state.unindex(key);
        if let Some(store) = &self.persisted {
            if let Err(e) = store.remove(&persisted_key(key)) {
                tracing::warn!(%key, error = %e, "failed to remove persisted cache entry");
            }
        }
    }

    fn read_persisted(&self, key: &str) -> PersistedRead {
        let Some(store) = &self.persisted else {
            return PersistedRead::Absent;
        };
        match store.get(&persisted_key(key)) {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => PersistedRead::Found(entry),
                Err(e) => PersistedRead::Unparseable(KgError::CacheCorruption(format!("unparseable entry: {}", e))),
            },
            Ok(None) => PersistedRead::Absent,
            Err(e) => {
                tracing::warn!(%key, error = %e, "persisted cache read failed");
                PersistedRead::Absent
            }
        }
    }

    /// Every persisted entry by bare key; `None` when the value does not parse.
    fn persisted_entries(&self) -> Vec<(String, Option<CacheEntry>)> {
        let Some(store) = &self.persisted else {
            return Vec::new();
        };
        store
            .keys(PERSISTED_KEY_PREFIX)
            .unwrap_or_default()
            .into_iter()
            .map(|full| {
                let key = full.trim_start_matches(PERSISTED_KEY_PREFIX).to_string();
                let entry = store
                    .get(&full)
                    .ok()
                    .flatten()
                    .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok());
                (key, entry)
            })
            .collect()
    }

    /// Sweep unparseable and expired entries, then evict oldest insertions.
    /// Touches only the persisted store; the returned keys are applied to
    /// memory state by the caller.
    fn trim_persisted(&self, store: &dyn PersistedStore) -> PersistedTrim {
        let now = self.clock.now();
        let mut trim = PersistedTrim::default();
        let mut live: Vec<(String, DateTime<Utc>)> = Vec::new();
        for (key, entry) in self.persisted_entries() {
            match entry {
                Some(e) if !e.is_expired(now) => live.push((key, e.inserted_at)),
                _ => trim.dropped.push(key),
            }
        }
        let max = self.config.max_persisted_entries;
        if live.len() > max {
            live.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = live.len() - max;
            trim.evicted = live.into_iter().take(excess).map(|(key, _)| key).collect();
        }
        for key in trim.dropped.iter().chain(&trim.evicted) {
            if let Err(e) = store.remove(&persisted_key(key)) {
                tracing::warn!(%key, error = %e, "failed to evict persisted cache entry");
            }
        }
        trim
    }

    /// Rebuild the keyword index from the persisted tier.
    fn warm_index(&self) {
        let entries = self.persisted_entries();
        let mut state = self.state.lock();
        for entry in entries.into_iter().filter_map(|(_, e)| e) {
            state.index(&entry);
        }
    }
}

#[derive(Debug, Default)]
struct PersistedTrim {
    /// Expired or unparseable; gone from both tiers.
    dropped: Vec<String>,
    /// Over the persisted bound; a memory copy may survive.
    evicted: Vec<String>,
}

impl PersistedTrim {
    fn apply(self, state: &mut CacheState) {
        for key in &self.dropped {
            state.memory.remove(key);
            state.unindex(key);
        }
        for key in &self.evicted {
            if !state.memory.contains_key(key) {
                state.unindex(key);
            }
        }
        state.counters.evictions += self.evicted.len() as u64;
    }
}

enum PersistedRead {
    Found(CacheEntry),
    Unparseable(KgError),
    Absent,
}

fn persisted_key(key: &str) -> String {
    format!("{}{}", PERSISTED_KEY_PREFIX, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;

    fn result(id: &str, score: f32) -> SearchResult {
        SearchResult {
            kind: RecordKind::Entity,
            id: id.to_string(),
            title: id.to_string(),
            organization_id: Some("org1".to_string()),
            similarity: score,
            score,
            updated_at: Utc::now(),
        }
    }

    fn key(q: &str) -> CacheKey {
        CacheKey::new(q, &SearchFilters::default(), 10)
    }

    fn small(memory: usize, persisted: usize) -> CacheConfig {
        CacheConfig {
            max_memory_entries: memory,
            max_persisted_entries: persisted,
            ttl_secs: 300,
        }
    }

    #[test]
    fn test_key_normalizes_query() {
        assert_eq!(key("  Acme  Robotics "), key("acme robotics"));
        assert_ne!(key("acme"), CacheKey::new("acme", &SearchFilters::default(), 20));
        assert_ne!(key("acme"), CacheKey::new("acme", &SearchFilters::for_organization("org1"), 10));
    }

    #[test]
    fn test_set_get_roundtrip_through_tiers() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = ResultCache::with_persisted(small(2, 10), store.clone());
        cache.set(&key("acme deal"), vec![result("e1", 0.9)]);
        assert_eq!(cache.get(&key("acme deal")).unwrap()[0].id, "e1");

        let fresh = ResultCache::with_persisted(small(2, 10), store);
        assert_eq!(fresh.stats().memory_count, 0);
        assert!(fresh.get(&key("acme deal")).is_some());
        assert_eq!(fresh.stats().memory_count, 1);
    }

    #[test]
    fn test_memory_lru_eviction() {
        let cache = ResultCache::new(small(2, 10));
        cache.set(&key("one"), vec![result("a", 0.5)]);
        cache.set(&key("two"), vec![result("b", 0.5)]);
        assert!(cache.get(&key("one")).is_some());
        cache.set(&key("three"), vec![result("c", 0.5)]);

        assert!(cache.get(&key("one")).is_some());
        assert!(cache.get(&key("two")).is_none());
        assert_eq!(cache.stats().memory_count, 2);
        assert_eq!(cache.counters().evictions, 1);
    }

    #[test]
    fn test_persisted_bound_evicts_oldest() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryKvStore::new());
        let cache = ResultCache::with_persisted(small(10, 2), store.clone()).with_clock(clock.clone());
        for q in ["first", "second", "third"] {
            cache.set(&key(q), vec![result(q, 0.5)]);
            clock.advance(chrono::Duration::seconds(1));
        }
        assert_eq!(store.len(), 2);
        assert!(store.get(&persisted_key(key("first").as_str())).unwrap().is_none());
    }

    #[test]
    fn test_ttl_expiry_removes_both_tiers() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryKvStore::new());
        let cache = ResultCache::with_persisted(small(5, 5), store.clone()).with_clock(clock.clone());
        cache.set(&key("acme"), vec![result("e1", 0.9)]);

        clock.advance(chrono::Duration::seconds(301));
        assert!(cache.get(&key("acme")).is_none());
        assert_eq!(cache.stats().total, 0);
        assert_eq!(cache.counters().expired, 1);
    }

    #[test]
    fn test_invalid_persisted_entry_self_heals() {
        let store = Arc::new(MemoryKvStore::new());
        let cache = ResultCache::with_persisted(small(5, 5), store.clone());
        let k = key("acme");
        let mut entry = CacheEntry {
            key: k.as_str().to_string(),
            query: "acme".to_string(),
            organization_id: None,
            results: vec![result("e1", 0.9)],
            inserted_at: Utc::now(),
            ttl_secs: 300,
        };
        entry.results[0].score = -0.5;
        store
            .set(&persisted_key(k.as_str()), &serde_json::to_string(&entry).unwrap())
            .unwrap();

        assert!(cache.get(&k).is_none());
        assert!(store.is_empty());
        assert_eq!(cache.counters().corrupted, 1);

        store.set(&persisted_key(k.as_str()), "{not json").unwrap();
        assert!(cache.get(&k).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corruption_is_typed() {
        let entry = CacheEntry {
            key: "k".to_string(),
            query: "acme".to_string(),
            organization_id: None,
            results: vec![result("e1", 0.9), result("e2", 0.0)],
            inserted_at: Utc::now(),
            ttl_secs: 300,
        };
        match entry.corruption() {
            Some(KgError::CacheCorruption(reason)) => assert!(reason.contains("'e2'")),
            other => panic!("expected cache corruption, got {:?}", other),
        }
    }

    /// Records whether the cache state was locked during any store call.
    struct LockWatchStore {
        inner: MemoryKvStore,
        cache: Mutex<Option<Arc<ResultCache>>>,
        locked_during_io: std::sync::atomic::AtomicBool,
    }

    impl LockWatchStore {
        fn observe(&self) {
            if let Some(cache) = self.cache.lock().as_ref() {
                if cache.state.is_locked() {
                    self.locked_during_io.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            }
        }
    }

    impl PersistedStore for LockWatchStore {
        fn get(&self, key: &str) -> crate::core::error::Result<Option<String>> {
            self.observe();
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> crate::core::error::Result<()> {
            self.observe();
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> crate::core::error::Result<()> {
            self.observe();
            self.inner.remove(key)
        }
        fn keys(&self, prefix: &str) -> crate::core::error::Result<Vec<String>> {
            self.observe();
            self.inner.keys(prefix)
        }
    }

    #[test]
    fn test_set_does_persisted_io_outside_state_lock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(LockWatchStore {
            inner: MemoryKvStore::new(),
            cache: Mutex::new(None),
            locked_during_io: std::sync::atomic::AtomicBool::new(false),
        });
        let cache = Arc::new(ResultCache::with_persisted(small(10, 2), store.clone()).with_clock(clock.clone()));
        *store.cache.lock() = Some(cache.clone());

        for q in ["first", "second", "third"] {
            cache.set(&key(q), vec![result(q, 0.5)]);
            clock.advance(chrono::Duration::seconds(1));
        }
        *store.cache.lock() = None;

        assert!(!store.locked_during_io.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(store.inner.len(), 2);
        assert_eq!(cache.counters().evictions, 1);
        assert_eq!(cache.stats().memory_count, 3);
    }

    #[test]
    fn test_refuses_to_store_nan() {
        let cache = ResultCache::new(small(5, 5));
        cache.set(&key("acme"), vec![result("e1", f32::NAN)]);
        assert_eq!(cache.stats().memory_count, 0);
    }

    #[test]
    fn test_related_and_targeted_invalidation() {
        let cache = ResultCache::new(small(5, 5));
        cache.set(&key("acme robotics deal"), vec![result("e1", 0.9)]);
        cache.set(&key("acme budget"), vec![result("e2", 0.8)]);
        cache.set(&key("weather report"), vec![result("e3", 0.7)]);

        let related = cache.find_related("acme robotics", 10);
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].query, "acme robotics deal");
        assert_eq!(related[0].shared_tokens, 2);

        assert_eq!(cache.invalidate_record(RecordKind::Entity, "e2"), 1);
        assert!(cache.get(&key("acme budget")).is_none());
        assert_eq!(cache.invalidate_organization("org1"), 2);
        assert_eq!(cache.stats().total, 0);
    }

    #[test]
    fn test_clear() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("unrelated", "x").unwrap();
        let cache = ResultCache::with_persisted(small(5, 5), store.clone());
        cache.set(&key("acme"), vec![result("e1", 0.9)]);
        cache.clear();
        assert_eq!(cache.stats().total, 0);
        assert_eq!(store.len(), 1);
    }
}
