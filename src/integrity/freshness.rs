//! Embedding freshness scan. Classification only, nothing is modified.

use std::sync::Arc;

use serde::Serialize;

use crate::core::error::Result;
use crate::core::model::{EmbeddingInfo, RecordKind};
use crate::search::similarity::{classify_embedding, Freshness};
use crate::store::{RecordScope, RelationalStore};

/// Ids listed per category are capped at this many.
const SAMPLE_IDS: usize = 20;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FreshnessReport {
    pub kind: Option<RecordKind>,
    pub total: usize,
    pub current: usize,
    pub outdated: usize,
    pub missing: usize,
    pub unsynced: usize,
    pub outdated_ids: Vec<String>,
    pub missing_ids: Vec<String>,
}

impl FreshnessReport {
    pub fn needs_regeneration(&self) -> usize {
        self.outdated + self.missing
    }
}

pub struct FreshnessScanner {
    records: Arc<dyn RelationalStore>,
    current: EmbeddingInfo,
}

impl FreshnessScanner {
    pub fn new(records: Arc<dyn RelationalStore>, current: EmbeddingInfo) -> Self {
        Self { records, current }
    }

    pub async fn scan(&self, kind: RecordKind, organization_id: Option<&str>) -> Result<FreshnessReport> {
        let records = self
            .records
            .list(kind, &RecordScope::organization(organization_id))
            .await?;

        let mut report = FreshnessReport {
            kind: Some(kind),
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            if !record.chroma_synced() {
                report.unsynced += 1;
            }
            match classify_embedding(record.embedding(), &self.current) {
                Freshness::Current => report.current += 1,
                Freshness::Outdated { .. } => {
                    report.outdated += 1;
                    if report.outdated_ids.len() < SAMPLE_IDS {
                        report.outdated_ids.push(record.id().to_string());
                    }
                }
                Freshness::Missing => {
                    report.missing += 1;
                    if report.missing_ids.len() < SAMPLE_IDS {
                        report.missing_ids.push(record.id().to_string());
                    }
                }
            }
        }
        Ok(report)
    }
}
