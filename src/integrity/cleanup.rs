//! Dangling topic references on initiatives.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::batch::{BatchProgress, BatchRunner, CancellationToken, ItemError};
use crate::core::error::Result;
use crate::core::model::Initiative;
use crate::store::RelationalStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DanglingReference {
    pub initiative_id: String,
    pub title: String,
    pub missing_topic_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub organization_id: Option<String>,
    pub scanned: usize,
    pub cleaned: usize,
    pub removed_refs: usize,
    pub errors: Vec<ItemError>,
    pub cancelled: bool,
}

pub struct ReferenceCleaner {
    records: Arc<dyn RelationalStore>,
    runner: BatchRunner,
}

impl ReferenceCleaner {
    pub fn new(records: Arc<dyn RelationalStore>, runner: BatchRunner) -> Self {
        Self { records, runner }
    }

    /// Read-only: what cleanup would remove. Topics and initiatives are both
    /// scoped to `organization_id` when given.
    pub async fn check_dangling_references(&self, organization_id: Option<&str>) -> Result<Vec<DanglingReference>> {
        let (initiatives, topics) = self.load(organization_id).await?;
        Ok(initiatives
            .iter()
            .filter_map(|i| {
                let missing = dangling(i, &topics);
                (!missing.is_empty()).then(|| DanglingReference {
                    initiative_id: i.id.clone(),
                    title: i.title.clone(),
                    missing_topic_ids: missing,
                })
            })
            .collect())
    }

    pub async fn cleanup_dangling_references(&self, organization_id: Option<&str>) -> Result<CleanupReport> {
        self.cleanup_dangling_references_with(organization_id, &CancellationToken::new(), None)
            .await
    }

    pub async fn cleanup_dangling_references_with(
        &self,
        organization_id: Option<&str>,
        token: &CancellationToken,
        progress: Option<&UnboundedSender<BatchProgress>>,
    ) -> Result<CleanupReport> {
        let (initiatives, topics) = self.load(organization_id).await?;
        let scanned = initiatives.len();
        let affected: Vec<Initiative> = initiatives
            .into_iter()
            .filter(|i| !dangling(i, &topics).is_empty())
            .collect();

        let topics = &topics;
        let outcome = self
            .runner
            .run(affected, token, progress, |initiative| async move {
                let kept: Vec<String> = initiative
                    .topic_ids
                    .iter()
                    .filter(|id| topics.contains(*id))
                    .cloned()
                    .collect();
                let removed = initiative.topic_ids.len() - kept.len();
                self.records.set_initiative_topics(&initiative.id, &kept).await?;
                tracing::debug!(initiative = %initiative.id, removed, "dangling topic references removed");
                Ok(removed)
            })
            .await;

        let report = CleanupReport {
            organization_id: organization_id.map(String::from),
            scanned,
            cleaned: outcome.succeeded.len(),
            removed_refs: outcome.succeeded.iter().sum(),
            errors: outcome.errors,
            cancelled: outcome.cancelled,
        };
        tracing::info!(
            scanned = report.scanned,
            cleaned = report.cleaned,
            removed_refs = report.removed_refs,
            "reference cleanup finished"
        );
        Ok(report)
    }

    async fn load(&self, organization_id: Option<&str>) -> Result<(Vec<Initiative>, HashSet<String>)> {
        let initiatives = self.records.list_initiatives(organization_id).await?;
        let topics = self.records.topic_ids(organization_id).await?;
        Ok((initiatives, topics))
    }
}

fn dangling(initiative: &Initiative, topics: &HashSet<String>) -> Vec<String> {
    initiative
        .topic_ids
        .iter()
        .filter(|id| !topics.contains(*id))
        .cloned()
        .collect()
}
