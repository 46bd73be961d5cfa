//! CLI subcommands. Each module exposes an async `run`.

pub mod cache;
pub mod context;
pub mod evaluate;
pub mod history;
pub mod index;
pub mod ingest;
pub mod init;
pub mod repair;
pub mod search;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use unicode_width::UnicodeWidthStr;

use kgraph_rag::core::config::EngineConfig;
use kgraph_rag::core::model::EmbeddingInfo;
use kgraph_rag::core::paths::DataPaths;
use kgraph_rag::eval::{EvaluationStore, Evaluator};
use kgraph_rag::integrity::{
    BatchProgress, BatchRunner, CancellationToken, FreshnessScanner, ReferenceCleaner, Regenerator, SyncRepairer,
};
use kgraph_rag::search::history::{SearchHistory, DEFAULT_HISTORY_CAPACITY};
use kgraph_rag::search::{HtpEmbedder, ResultCache, SearchEngine, SqliteVectorStore};
use kgraph_rag::store::{SqliteKvStore, SqliteRecordStore};

/// Opened stores plus configuration for one data directory.
pub struct AppContext {
    pub paths: DataPaths,
    pub config: EngineConfig,
    pub records: Arc<SqliteRecordStore>,
    pub vectors: Arc<SqliteVectorStore>,
    pub state: Arc<SqliteKvStore>,
    pub embedder: Arc<HtpEmbedder>,
    pub cache: Arc<ResultCache>,
    pub history: Arc<SearchHistory>,
}

impl AppContext {
    pub fn open(data_dir: Option<&Path>) -> Result<Self> {
        let paths = DataPaths::resolve(data_dir);
        paths
            .ensure_root()
            .with_context(|| format!("Failed to create data directory {}", paths.root.display()))?;

        let config = EngineConfig::load(&paths.config).context("Failed to load configuration")?;
        let records = Arc::new(SqliteRecordStore::open(&paths.records).context("Failed to open record store")?);
        let vectors = Arc::new(SqliteVectorStore::open(&paths.vectors).context("Failed to open vector store")?);
        let state = Arc::new(SqliteKvStore::open(&paths.state).context("Failed to open state store")?);
        let cache = Arc::new(ResultCache::with_persisted(config.cache.clone(), state.clone()));
        let history = Arc::new(SearchHistory::new(state.clone(), DEFAULT_HISTORY_CAPACITY));

        Ok(Self {
            paths,
            config,
            records,
            vectors,
            state,
            embedder: Arc::new(HtpEmbedder::new()),
            cache,
            history,
        })
    }

    pub fn engine(&self) -> SearchEngine {
        SearchEngine::new(
            self.embedder.clone(),
            self.vectors.clone(),
            self.records.clone(),
            self.cache.clone(),
            self.config.clone(),
        )
        .with_history(self.history.clone())
    }

    pub fn runner(&self) -> BatchRunner {
        BatchRunner::from_config(&self.config.batch)
    }

    pub fn embedding_stamp(&self) -> EmbeddingInfo {
        EmbeddingInfo {
            model_id: self.config.embedding.model_id.clone(),
            version: self.config.embedding.version.clone(),
        }
    }

    pub fn repairer(&self) -> SyncRepairer {
        SyncRepairer::new(self.records.clone(), self.vectors.clone(), self.runner())
    }

    pub fn cleaner(&self) -> ReferenceCleaner {
        ReferenceCleaner::new(self.records.clone(), self.runner())
    }

    pub fn freshness(&self) -> FreshnessScanner {
        FreshnessScanner::new(self.records.clone(), self.embedding_stamp())
    }

    pub fn regenerator(&self) -> Regenerator {
        Regenerator::new(
            self.embedder.clone(),
            self.vectors.clone(),
            self.records.clone(),
            self.runner(),
            self.embedding_stamp(),
        )
        .with_cache(self.cache.clone())
    }

    pub fn evaluation_store(&self) -> Arc<EvaluationStore> {
        Arc::new(EvaluationStore::new(self.state.clone(), &self.config.evaluation))
    }

    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(Arc::new(self.engine()), self.config.evaluation.clone()).with_store(self.evaluation_store())
    }
}

/// Cancel `token` on Ctrl-C.
pub fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Cancelling after in-flight items finish...", "!".yellow().bold());
            token.cancel();
        }
    });
}

/// Progress sender that redraws a single status line on stderr.
pub fn progress_line(label: &'static str, enabled: bool) -> Option<UnboundedSender<BatchProgress>> {
    if !enabled {
        return None;
    }
    let (tx, mut rx) = unbounded_channel::<BatchProgress>();
    tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            eprint!(
                "\r  {} {} {}/{} ({} failed)",
                "→".dimmed(),
                label,
                p.completed + p.failed,
                p.total,
                p.failed
            );
        }
        eprintln!();
    });
    Some(tx)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Pad to a display width, counting wide characters as two columns.
pub fn pad(text: &str, width: usize) -> String {
    let shown = truncate(text, width);
    let fill = width.saturating_sub(UnicodeWidthStr::width(shown.as_str()));
    format!("{}{}", shown, " ".repeat(fill))
}

/// Truncate to a display width, appending "…" when cut.
pub fn truncate(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_wide_chars() {
        assert_eq!(pad("ab", 4), "ab  ");
        assert_eq!(UnicodeWidthStr::width(pad("会議", 6).as_str()), 6);
        assert_eq!(truncate("abcdefgh", 5), "abcd…");
    }
}
