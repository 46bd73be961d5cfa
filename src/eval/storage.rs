//! Persistence for test cases, results and reports.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{EvaluationReport, EvaluationResult, TestCase};
use crate::core::config::EvaluationConfig;
use crate::core::error::Result;
use crate::store::PersistedStore;

pub const TEST_CASES_KEY: &str = "evaluation_test_cases";
pub const RESULTS_KEY: &str = "evaluation_results";
pub const REPORTS_KEY: &str = "evaluation_reports";

/// One JSON array per key. Results and reports are capped, oldest dropped first.
pub struct EvaluationStore {
    store: Arc<dyn PersistedStore>,
    max_results: usize,
    max_reports: usize,
    write_lock: Mutex<()>,
}

impl EvaluationStore {
    pub fn new(store: Arc<dyn PersistedStore>, config: &EvaluationConfig) -> Self {
        Self {
            store,
            max_results: config.max_stored_results.max(1),
            max_reports: config.max_stored_reports.max(1),
            write_lock: Mutex::new(()),
        }
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.store.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        self.store.set(key, &serde_json::to_string(items)?)
    }

    pub fn save_test_case(&self, test_case: &TestCase) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut cases: Vec<TestCase> = self.load(TEST_CASES_KEY)?;
        match cases.iter_mut().find(|c| c.id == test_case.id) {
            Some(existing) => *existing = test_case.clone(),
            None => cases.push(test_case.clone()),
        }
        self.save(TEST_CASES_KEY, &cases)
    }

    pub fn test_cases(&self) -> Result<Vec<TestCase>> {
        self.load(TEST_CASES_KEY)
    }

    pub fn delete_test_case(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut cases: Vec<TestCase> = self.load(TEST_CASES_KEY)?;
        let before = cases.len();
        cases.retain(|c| c.id != id);
        if cases.len() == before {
            return Ok(false);
        }
        self.save(TEST_CASES_KEY, &cases)?;
        Ok(true)
    }

    pub fn append_results(&self, results: &[EvaluationResult]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut stored: Vec<EvaluationResult> = self.load(RESULTS_KEY)?;
        stored.extend_from_slice(results);
        trim_front(&mut stored, self.max_results);
        self.save(RESULTS_KEY, &stored)
    }

    /// Oldest first.
    pub fn results(&self) -> Result<Vec<EvaluationResult>> {
        self.load(RESULTS_KEY)
    }

    pub fn save_report(&self, report: &EvaluationReport) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut reports: Vec<EvaluationReport> = self.load(REPORTS_KEY)?;
        reports.push(report.clone());
        trim_front(&mut reports, self.max_reports);
        self.save(REPORTS_KEY, &reports)
    }

    /// Oldest first.
    pub fn reports(&self) -> Result<Vec<EvaluationReport>> {
        self.load(REPORTS_KEY)
    }

    pub fn latest_report(&self) -> Result<Option<EvaluationReport>> {
        Ok(self.reports()?.pop())
    }

    pub fn report(&self, id: &str) -> Result<Option<EvaluationReport>> {
        Ok(self.reports()?.into_iter().find(|r| r.id == id))
    }

    /// Stored results for one test case, oldest first.
    pub fn trend(&self, test_case_id: &str) -> Result<Vec<EvaluationResult>> {
        Ok(self
            .results()?
            .into_iter()
            .filter(|r| r.test_case_id == test_case_id)
            .collect())
    }
}

fn trim_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvaluationDetails;
    use crate::store::MemoryKvStore;
    use chrono::Utc;

    fn result(id: &str, overall: f64) -> EvaluationResult {
        EvaluationResult {
            test_case_id: id.to_string(),
            query: "q".to_string(),
            timestamp: Utc::now(),
            coverage: overall,
            relevance: overall,
            accuracy: overall,
            overall,
            passed: overall > 0.5,
            details: EvaluationDetails::default(),
            error: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_results_are_bounded() -> Result<()> {
        let config = EvaluationConfig {
            max_stored_results: 3,
            ..Default::default()
        };
        let store = EvaluationStore::new(Arc::new(MemoryKvStore::new()), &config);
        store.append_results(&[result("a", 0.1), result("b", 0.2)])?;
        store.append_results(&[result("c", 0.3), result("a", 0.4)])?;

        let kept = store.results()?;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].test_case_id, "b");
        assert_eq!(store.trend("a")?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_case_library() -> Result<()> {
        let store = EvaluationStore::new(Arc::new(MemoryKvStore::new()), &EvaluationConfig::default());
        let mut tc = TestCase {
            id: "tc1".to_string(),
            query: "acme".to_string(),
            expected_entities: Default::default(),
            expected_relations: Default::default(),
            expected_topics: Default::default(),
            category: None,
            description: None,
        };
        store.save_test_case(&tc)?;
        tc.query = "acme robotics".to_string();
        store.save_test_case(&tc)?;
        assert_eq!(store.test_cases()?.len(), 1);
        assert_eq!(store.test_cases()?[0].query, "acme robotics");
        assert!(store.delete_test_case("tc1")?);
        assert!(!store.delete_test_case("tc1")?);
        Ok(())
    }
}
