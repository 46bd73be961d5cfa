//! Evaluation harness
//!
//! Runs labeled test cases against a [`Searcher`] and scores coverage,
//! relevance and accuracy. Results and suite reports are persisted with
//! bounded history so runs can be compared for regressions.

pub mod harness;
pub mod storage;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use harness::{compare_reports, score_results, Evaluator, Regression, RegressionKind, Searcher};
pub use storage::EvaluationStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub expected_entities: BTreeSet<String>,
    #[serde(default)]
    pub expected_relations: BTreeSet<String>,
    #[serde(default)]
    pub expected_topics: BTreeSet<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TestCase {
    pub fn expected_total(&self) -> usize {
        self.expected_entities.len() + self.expected_relations.len() + self.expected_topics.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDetails {
    pub found_entities: Vec<String>,
    pub found_relations: Vec<String>,
    pub found_topics: Vec<String>,
    pub missing_entities: Vec<String>,
    pub missing_relations: Vec<String>,
    pub missing_topics: Vec<String>,
    pub result_count: usize,
    pub correctly_found: usize,
}

impl EvaluationDetails {
    pub fn missing_total(&self) -> usize {
        self.missing_entities.len() + self.missing_relations.len() + self.missing_topics.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub test_case_id: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub coverage: f64,
    pub relevance: f64,
    pub accuracy: f64,
    pub overall: f64,
    pub passed: bool,
    pub details: EvaluationDetails,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub organization_id: Option<String>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_coverage: f64,
    pub average_relevance: f64,
    pub average_accuracy: f64,
    pub average_overall: f64,
    pub results: Vec<EvaluationResult>,
}

impl EvaluationReport {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn result_for(&self, test_case_id: &str) -> Option<&EvaluationResult> {
        self.results.iter().find(|r| r.test_case_id == test_case_id)
    }
}
