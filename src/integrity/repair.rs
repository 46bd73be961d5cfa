//! Sync-flag repair between the relational store and the vector store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::batch::{BatchProgress, BatchRunner, CancellationToken, ItemError};
use crate::core::error::{KgError, Result};
use crate::core::model::{KnowledgeRecord, RecordKind};
use crate::search::vectordb::VectorStore;
use crate::store::{RecordScope, RelationalStore, UnreadableRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct RepairOptions {
    /// Also mark unflagged records as synced when their vector exists.
    pub promote_present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub kind: RecordKind,
    pub organization_id: Option<String>,
    pub scanned: usize,
    pub repaired: usize,
    pub promoted: usize,
    pub errors: Vec<ItemError>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagCheck {
    Unchanged,
    Changed,
}

pub struct SyncRepairer {
    records: Arc<dyn RelationalStore>,
    vectors: Arc<dyn VectorStore>,
    runner: BatchRunner,
}

impl SyncRepairer {
    pub fn new(records: Arc<dyn RelationalStore>, vectors: Arc<dyn VectorStore>, runner: BatchRunner) -> Self {
        Self {
            records,
            vectors,
            runner,
        }
    }

    /// Reset `chroma_synced` on records of `kind` whose vector is absent.
    /// Running it twice in a row repairs nothing the second time.
    pub async fn repair_sync_status(&self, kind: RecordKind, organization_id: Option<&str>) -> Result<RepairReport> {
        self.repair_sync_status_with(kind, organization_id, RepairOptions::default(), &CancellationToken::new(), None)
            .await
    }

    pub async fn repair_sync_status_with(
        &self,
        kind: RecordKind,
        organization_id: Option<&str>,
        options: RepairOptions,
        token: &CancellationToken,
        progress: Option<&UnboundedSender<BatchProgress>>,
    ) -> Result<RepairReport> {
        let flagged_scope = RecordScope::organization(organization_id).synced(true);
        let flagged = self.records.list(kind, &flagged_scope).await?;
        let unreadable = self.records.list_unreadable(kind, &flagged_scope).await?;
        let mut report = RepairReport {
            kind,
            organization_id: organization_id.map(String::from),
            scanned: flagged.len() + unreadable.len(),
            repaired: 0,
            promoted: 0,
            errors: Vec::new(),
            cancelled: false,
        };

        let demoted = self
            .runner
            .run(flagged, token, progress, |record| self.reconcile(kind, record, true))
            .await;
        report.repaired = demoted.succeeded.iter().filter(|p| **p == FlagCheck::Changed).count();
        report.errors.extend(demoted.errors);
        report.cancelled = demoted.cancelled;

        if !unreadable.is_empty() && !report.cancelled {
            let reset = AtomicUsize::new(0);
            let outcome = self
                .runner
                .run(unreadable, token, progress, |row| self.reset_unreadable(kind, row, &reset))
                .await;
            report.repaired += reset.load(Ordering::SeqCst);
            report.errors.extend(outcome.errors);
            report.cancelled = outcome.cancelled;
        }

        if options.promote_present && !report.cancelled {
            let unflagged = self
                .records
                .list(kind, &RecordScope::organization(organization_id).synced(false))
                .await?;
            report.scanned += unflagged.len();
            let promoted = self
                .runner
                .run(unflagged, token, progress, |record| self.reconcile(kind, record, false))
                .await;
            report.promoted = promoted.succeeded.iter().filter(|p| **p == FlagCheck::Changed).count();
            report.errors.extend(promoted.errors);
            report.cancelled = promoted.cancelled;
        }

        tracing::info!(
            kind = kind.as_str(),
            scanned = report.scanned,
            repaired = report.repaired,
            promoted = report.promoted,
            errors = report.errors.len(),
            "sync repair finished"
        );
        Ok(report)
    }

    /// Rows whose body cannot be read are always reported. Their flag is
    /// still reset from the indexed columns when the vector is missing.
    async fn reset_unreadable(&self, kind: RecordKind, row: UnreadableRecord, reset: &AtomicUsize) -> Result<()> {
        let present = self
            .vectors
            .exists(kind, &row.id, row.organization_id.as_deref())
            .await?;
        let action = if present {
            "vector present"
        } else {
            self.records.set_synced(kind, &row.id, false).await?;
            reset.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(kind = kind.as_str(), id = %row.id, "unreadable record flagged as synced without vector, flag reset");
            "sync flag reset"
        };
        Err(KgError::DataIntegrityWarning(format!(
            "unreadable {} body ({}), {}",
            kind, row.reason, action
        )))
    }

    /// Flip the flag when it disagrees with the vector store.
    async fn reconcile(&self, kind: RecordKind, record: KnowledgeRecord, flagged: bool) -> Result<FlagCheck> {
        let present = self
            .vectors
            .exists(kind, record.id(), record.organization_id())
            .await?;
        if present == flagged {
            return Ok(FlagCheck::Unchanged);
        }
        self.records.set_synced(kind, record.id(), present).await?;
        if flagged {
            tracing::warn!(kind = kind.as_str(), id = record.id(), "flagged as synced but vector missing, flag reset");
        } else {
            tracing::debug!(kind = kind.as_str(), id = record.id(), "vector present, marked synced");
        }
        Ok(FlagCheck::Changed)
    }
}
