//! Engine configuration, loaded from `config.yaml` in the data directory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{KgError, Result};
use super::schema::MAX_QUERY_CHARS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub scoring: ScoringWeights,
    pub cache: CacheConfig,
    pub evaluation: EvaluationConfig,
    pub batch: BatchConfig,
    pub embedding: EmbeddingConfig,
    pub context: ContextConfig,
}

/// How a search without an organization filter is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationScope {
    /// Allowed, logged as a cross-organization search.
    #[default]
    Open,
    /// Rejected with `InvalidInput`.
    Required,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_query_chars: usize,
    pub similarity_floor: f32,
    pub default_max_results: usize,
    pub embedding_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub organization_scope: OrganizationScope,
    pub record_history: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_query_chars: MAX_QUERY_CHARS,
            similarity_floor: 0.1,
            default_max_results: 10,
            embedding_timeout_ms: 30_000,
            store_timeout_ms: 30_000,
            organization_scope: OrganizationScope::Open,
            record_history: true,
        }
    }
}

impl SearchConfig {
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub vector: f32,
    pub keyword: f32,
    pub recency: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            keyword: 0.2,
            recency: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_memory_entries: usize,
    pub max_persisted_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 50,
            max_persisted_entries: 100,
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub coverage_weight: f64,
    pub relevance_weight: f64,
    pub accuracy_weight: f64,
    pub pass_coverage: f64,
    pub pass_relevance: f64,
    pub max_results: usize,
    pub max_stored_results: usize,
    pub max_stored_reports: usize,
    pub regression_tolerance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            coverage_weight: 0.5,
            relevance_weight: 0.3,
            accuracy_weight: 0.2,
            pass_coverage: 0.8,
            pass_relevance: 0.5,
            max_results: 20,
            max_stored_results: 1000,
            max_stored_reports: 100,
            regression_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub item_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            retry_backoff_ms: 200,
            item_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub version: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: crate::search::embedding::HTP_MODEL_ID.to_string(),
            version: "1.0".to_string(),
        }
    }
}

/// Retrieval context rendered for a language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Results shown per record kind.
    pub per_kind_limit: usize,
    /// Estimated at four characters per token.
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            per_kind_limit: 5,
            max_tokens: 3000,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| KgError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_yaml::from_str(&text)
            .map_err(|e| KgError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| KgError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let w = &self.scoring;
        for (name, value) in [("vector", w.vector), ("keyword", w.keyword), ("recency", w.recency)] {
            if !value.is_finite() || value < 0.0 {
                return Err(KgError::Config(format!("scoring.{} must be a non-negative number", name)));
            }
        }
        if w.vector + w.keyword + w.recency <= 0.0 {
            return Err(KgError::Config("scoring weights must not all be zero".to_string()));
        }
        let e = &self.evaluation;
        for (name, value) in [
            ("coverage_weight", e.coverage_weight),
            ("relevance_weight", e.relevance_weight),
            ("accuracy_weight", e.accuracy_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(KgError::Config(format!("evaluation.{} must be a non-negative number", name)));
            }
        }
        if !(0.0..=1.0).contains(&self.search.similarity_floor) {
            return Err(KgError::Config("search.similarity_floor must be within [0, 1]".to_string()));
        }
        let bounds = [
            ("search.max_query_chars", self.search.max_query_chars),
            ("search.default_max_results", self.search.default_max_results),
            ("cache.max_memory_entries", self.cache.max_memory_entries),
            ("cache.max_persisted_entries", self.cache.max_persisted_entries),
            ("evaluation.max_results", e.max_results),
            ("evaluation.max_stored_results", e.max_stored_results),
            ("evaluation.max_stored_reports", e.max_stored_reports),
            ("batch.concurrency", self.batch.concurrency),
            ("context.per_kind_limit", self.context.per_kind_limit),
            ("context.max_tokens", self.context.max_tokens),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(KgError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.batch.max_attempts == 0 {
            return Err(KgError::Config("batch.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_memory_entries, 50);
        assert_eq!(config.cache.max_persisted_entries, 100);
        assert_eq!(config.batch.concurrency, 5);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "scoring:\n  vector: 0.5\n  keyword: 0.4\ncache:\n  ttl_secs: 60\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scoring.vector, 0.5);
        assert_eq!(config.scoring.recency, 0.1);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert_eq!(config.search.organization_scope, OrganizationScope::Open);
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = EngineConfig::default();
        config.scoring.keyword = -0.1;
        assert!(matches!(config.validate(), Err(KgError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.search.default_max_results, 10);
    }
}
