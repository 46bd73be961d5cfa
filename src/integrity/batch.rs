//! Bounded-concurrency batch execution with cooperative cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::config::BatchConfig;
use crate::core::error::{with_timeout, Result};
use crate::core::model::{Initiative, KnowledgeRecord};
use crate::store::UnreadableRecord;

/// Shared flag checked before each item is started.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub id: String,
    pub error: String,
}

#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub errors: Vec<ItemError>,
    pub total: usize,
    pub cancelled: bool,
}

impl<T> BatchOutcome<T> {
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.errors.len()
    }
}

pub trait BatchItem: Clone + Send {
    fn item_id(&self) -> String;
}

impl BatchItem for KnowledgeRecord {
    fn item_id(&self) -> String {
        self.id().to_string()
    }
}

impl BatchItem for UnreadableRecord {
    fn item_id(&self) -> String {
        self.id.clone()
    }
}

impl BatchItem for Initiative {
    fn item_id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone)]
pub struct BatchRunner {
    concurrency: usize,
    max_attempts: u32,
    backoff: Duration,
    item_timeout: Duration,
}

impl BatchRunner {
    pub fn new(concurrency: usize, max_attempts: u32, backoff: Duration, item_timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_attempts: max_attempts.max(1),
            backoff,
            item_timeout,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.concurrency,
            config.max_attempts,
            Duration::from_millis(config.retry_backoff_ms),
            Duration::from_millis(config.item_timeout_ms),
        )
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `op` over `items`, at most `concurrency` at a time.
    ///
    /// Items not yet started when `token` is cancelled are skipped; work
    /// already completed is kept. Per-item failures are collected, never
    /// propagated.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        token: &CancellationToken,
        progress: Option<&UnboundedSender<BatchProgress>>,
        op: F,
    ) -> BatchOutcome<T>
    where
        I: BatchItem,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = items.len();
        let op = &op;
        let mut pending = stream::iter(items)
            .take_while(|_| futures::future::ready(!token.is_cancelled()))
            .map(|item| async move {
                let id = item.item_id();
                (id, self.attempt(item, op).await)
            })
            .buffer_unordered(self.concurrency);

        let mut succeeded = Vec::new();
        let mut errors = Vec::new();
        while let Some((id, result)) = pending.next().await {
            match result {
                Ok(value) => succeeded.push(value),
                Err(e) => {
                    tracing::debug!(%id, error = %e, "batch item failed");
                    errors.push(ItemError {
                        id,
                        error: e.to_string(),
                    });
                }
            }
            if let Some(tx) = progress {
                let _ = tx.send(BatchProgress {
                    completed: succeeded.len(),
                    failed: errors.len(),
                    total,
                });
            }
        }

        let processed = succeeded.len() + errors.len();
        let cancelled = processed < total && token.is_cancelled();
        if cancelled {
            tracing::info!(processed, total, "batch cancelled");
        }
        BatchOutcome {
            succeeded,
            errors,
            total,
            cancelled,
        }
    }

    async fn attempt<I, T, F, Fut>(&self, item: I, op: &F) -> Result<T>
    where
        I: BatchItem,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match with_timeout("batch item", self.item_timeout, op(item.clone())).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(id = %item.item_id(), attempt, error = %e, "retrying batch item");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::KgError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct Job(usize);

    impl BatchItem for Job {
        fn item_id(&self) -> String {
            format!("job-{}", self.0)
        }
    }

    fn runner(concurrency: usize) -> BatchRunner {
        BatchRunner::new(concurrency, 3, Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..20).map(Job).collect();

        let outcome = runner(5)
            .run(jobs, &CancellationToken::new(), None, |job| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(job.0)
                }
            })
            .await;

        assert_eq!(outcome.succeeded.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_retries_only_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = runner(1)
            .run(vec![Job(1), Job(2)], &CancellationToken::new(), None, |job| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    match job.0 {
                        1 if n == 0 => Err(KgError::external("vector store", "unavailable")),
                        1 => Ok(1),
                        _ => Err::<usize, _>(KgError::invalid("bad record")),
                    }
                }
            })
            .await;

        assert_eq!(outcome.succeeded, vec![1]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].id, "job-2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_partial_progress() {
        let token = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let jobs: Vec<Job> = (0..50).map(Job).collect();

        let outcome = runner(2)
            .run(jobs, &token, Some(&tx), |job| {
                let token = token.clone();
                async move {
                    if job.0 == 3 {
                        token.cancel();
                    }
                    Ok(job.0)
                }
            })
            .await;

        assert!(outcome.cancelled);
        assert!(outcome.processed() < 50);
        assert!(outcome.processed() >= 4);
        drop(tx);
        let mut last = None;
        while let Some(p) = rx.recv().await {
            last = Some(p);
        }
        assert_eq!(last.map(|p| p.completed), Some(outcome.succeeded.len()));
    }
}
