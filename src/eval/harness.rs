use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::{EvaluationDetails, EvaluationReport, EvaluationResult, EvaluationStore, TestCase};
use crate::core::config::EvaluationConfig;
use crate::core::error::Result;
use crate::core::model::RecordKind;
use crate::search::engine::{SearchEngine, SearchResult};
use crate::search::filters::SearchFilters;

/// What the harness needs from a search engine.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
        use_cache: bool,
    ) -> Result<Vec<SearchResult>>;
}

#[async_trait]
impl Searcher for SearchEngine {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
        use_cache: bool,
    ) -> Result<Vec<SearchResult>> {
        SearchEngine::search(self, query, filters, max_results, use_cache).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub coverage: f64,
    pub relevance: f64,
    pub accuracy: f64,
    pub overall: f64,
    pub passed: bool,
}

/// Score a result list against a test case. Pure.
pub fn score_results(
    test_case: &TestCase,
    results: &[SearchResult],
    config: &EvaluationConfig,
) -> (Metrics, EvaluationDetails) {
    let found = |kind: RecordKind| -> Vec<String> {
        results.iter().filter(|r| r.kind == kind).map(|r| r.id.clone()).collect()
    };
    let missing = |expected: &BTreeSet<String>, found: &[String]| -> Vec<String> {
        expected.iter().filter(|id| !found.contains(*id)).cloned().collect()
    };

    let found_entities = found(RecordKind::Entity);
    let found_relations = found(RecordKind::Relation);
    let found_topics = found(RecordKind::Topic);

    let correctly_found = results
        .iter()
        .filter(|r| {
            let expected = match r.kind {
                RecordKind::Entity => &test_case.expected_entities,
                RecordKind::Relation => &test_case.expected_relations,
                RecordKind::Topic => &test_case.expected_topics,
            };
            expected.contains(&r.id)
        })
        .count();

    let details = EvaluationDetails {
        missing_entities: missing(&test_case.expected_entities, &found_entities),
        missing_relations: missing(&test_case.expected_relations, &found_relations),
        missing_topics: missing(&test_case.expected_topics, &found_topics),
        found_entities,
        found_relations,
        found_topics,
        result_count: results.len(),
        correctly_found,
    };

    let expected_total = test_case.expected_total();
    let coverage = if expected_total > 0 {
        (expected_total - details.missing_total()) as f64 / expected_total as f64
    } else if results.is_empty() {
        0.0
    } else {
        1.0
    };

    let relevance = if results.is_empty() {
        0.0
    } else {
        let mean = results.iter().map(|r| r.score as f64).sum::<f64>() / results.len() as f64;
        if mean.is_finite() {
            mean.clamp(0.0, 1.0)
        } else {
            0.0
        }
    };

    let accuracy = if results.is_empty() {
        0.0
    } else {
        correctly_found as f64 / results.len() as f64
    };

    let overall = config.coverage_weight * coverage
        + config.relevance_weight * relevance
        + config.accuracy_weight * accuracy;
    let passed = coverage >= config.pass_coverage && relevance >= config.pass_relevance;

    (
        Metrics {
            coverage,
            relevance,
            accuracy,
            overall,
            passed,
        },
        details,
    )
}

pub struct Evaluator {
    searcher: Arc<dyn Searcher>,
    store: Option<Arc<EvaluationStore>>,
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(searcher: Arc<dyn Searcher>, config: EvaluationConfig) -> Self {
        Self {
            searcher,
            store: None,
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<EvaluationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Never fails: search errors become a failed result carrying the error.
    pub async fn run_test_case(&self, test_case: &TestCase, organization_id: Option<&str>) -> EvaluationResult {
        let started = Instant::now();

        if test_case.query.trim().is_empty() {
            return self.failed_result(test_case, None, started);
        }

        let filters = SearchFilters {
            organization_id: organization_id.map(String::from),
            ..Default::default()
        };
        match self
            .searcher
            .search(&test_case.query, &filters, self.config.max_results, false)
            .await
        {
            Ok(results) => {
                let (metrics, details) = score_results(test_case, &results, &self.config);
                tracing::debug!(
                    test_case = %test_case.id,
                    coverage = metrics.coverage,
                    relevance = metrics.relevance,
                    passed = metrics.passed,
                    "test case evaluated"
                );
                EvaluationResult {
                    test_case_id: test_case.id.clone(),
                    query: test_case.query.clone(),
                    timestamp: Utc::now(),
                    coverage: metrics.coverage,
                    relevance: metrics.relevance,
                    accuracy: metrics.accuracy,
                    overall: metrics.overall,
                    passed: metrics.passed,
                    details,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => {
                tracing::warn!(test_case = %test_case.id, error = %e, "test case search failed");
                self.failed_result(test_case, Some(e.to_string()), started)
            }
        }
    }

    fn failed_result(&self, test_case: &TestCase, error: Option<String>, started: Instant) -> EvaluationResult {
        let (_, details) = score_results(test_case, &[], &self.config);
        EvaluationResult {
            test_case_id: test_case.id.clone(),
            query: test_case.query.clone(),
            timestamp: Utc::now(),
            coverage: 0.0,
            relevance: 0.0,
            accuracy: 0.0,
            overall: 0.0,
            passed: false,
            details,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run every case, aggregate, and persist results and report when a store is attached.
    pub async fn run_test_suite(&self, test_cases: &[TestCase], organization_id: Option<&str>) -> EvaluationReport {
        let mut results = Vec::with_capacity(test_cases.len());
        for tc in test_cases {
            results.push(self.run_test_case(tc, organization_id).await);
        }

        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let avg = |f: fn(&EvaluationResult) -> f64| -> f64 {
            if total == 0 {
                0.0
            } else {
                results.iter().map(f).sum::<f64>() / total as f64
            }
        };

        let timestamp = Utc::now();
        let report = EvaluationReport {
            id: format!("report-{}", timestamp.timestamp_millis()),
            timestamp,
            organization_id: organization_id.map(String::from),
            total,
            passed,
            failed: total - passed,
            average_coverage: avg(|r| r.coverage),
            average_relevance: avg(|r| r.relevance),
            average_accuracy: avg(|r| r.accuracy),
            average_overall: avg(|r| r.overall),
            results,
        };

        tracing::info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            "evaluation suite finished"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.append_results(&report.results) {
                tracing::warn!(error = %e, "failed to persist evaluation results");
            }
            if let Err(e) = store.save_report(&report) {
                tracing::warn!(error = %e, "failed to persist evaluation report");
            }
        }
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionKind {
    /// Passed in the baseline, fails now.
    NowFailing,
    /// Still passing or failing, but the overall score dropped beyond tolerance.
    ScoreDrop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Regression {
    pub test_case_id: String,
    pub kind: RegressionKind,
    pub baseline_overall: f64,
    pub current_overall: f64,
}

/// Cases that got worse between two reports. Cases absent from either side are ignored.
pub fn compare_reports(baseline: &EvaluationReport, current: &EvaluationReport, tolerance: f64) -> Vec<Regression> {
    let mut regressions = Vec::new();
    for now in &current.results {
        let Some(before) = baseline.result_for(&now.test_case_id) else {
            continue;
        };
        let kind = if before.passed && !now.passed {
            Some(RegressionKind::NowFailing)
        } else if before.overall - now.overall > tolerance {
            Some(RegressionKind::ScoreDrop)
        } else {
            None
        };
        if let Some(kind) = kind {
            regressions.push(Regression {
                test_case_id: now.test_case_id.clone(),
                kind,
                baseline_overall: before.overall,
                current_overall: now.overall,
            });
        }
    }
    regressions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: RecordKind, id: &str, score: f32) -> SearchResult {
        SearchResult {
            kind,
            id: id.to_string(),
            title: id.to_string(),
            organization_id: None,
            similarity: score,
            score,
            updated_at: Utc::now(),
        }
    }

    fn case(entities: &[&str]) -> TestCase {
        TestCase {
            id: "tc1".to_string(),
            query: "acme".to_string(),
            expected_entities: entities.iter().map(|s| s.to_string()).collect(),
            expected_relations: BTreeSet::new(),
            expected_topics: BTreeSet::new(),
            category: None,
            description: None,
        }
    }

    #[test]
    fn test_partial_coverage_fails() {
        let config = EvaluationConfig::default();
        let (m, d) = score_results(
            &case(&["E1", "E2"]),
            &[result(RecordKind::Entity, "E1", 0.9), result(RecordKind::Entity, "X", 0.7)],
            &config,
        );
        assert_eq!(m.coverage, 0.5);
        assert!((m.relevance - 0.8).abs() < 1e-6);
        assert_eq!(m.accuracy, 0.5);
        assert!(!m.passed);
        assert_eq!(d.missing_entities, vec!["E2".to_string()]);
    }

    #[test]
    fn test_kind_must_match() {
        let config = EvaluationConfig::default();
        let (m, _) = score_results(&case(&["E1"]), &[result(RecordKind::Topic, "E1", 0.9)], &config);
        assert_eq!(m.coverage, 0.0);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_nothing_expected() {
        let config = EvaluationConfig::default();
        let (found, _) = score_results(&case(&[]), &[result(RecordKind::Entity, "A", 0.6)], &config);
        assert_eq!(found.coverage, 1.0);
        assert!(found.passed);
        let (none, _) = score_results(&case(&[]), &[], &config);
        assert_eq!(none.coverage, 0.0);
        assert_eq!(none.overall, 0.0);
    }

    #[test]
    fn test_full_pass() {
        let config = EvaluationConfig::default();
        let (m, _) = score_results(&case(&["E1"]), &[result(RecordKind::Entity, "E1", 0.75)], &config);
        assert!(m.passed);
        assert!((m.overall - (0.5 + 0.3 * 0.75 + 0.2)).abs() < 1e-6);
    }
}
