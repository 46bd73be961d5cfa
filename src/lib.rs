//! kgraph-rag library
//!
//! Embedded knowledge-graph retrieval: hybrid search over entities,
//! relations and topics with result caching, evaluation and sync repair.
//!
//! # Modules
//!
//! - `core`: records, errors, configuration, query validation
//! - `search`: scoring, embeddings, vector store, cache, search engine
//! - `store`: relational and key/value storage
//! - `eval`: evaluation harness and regression reports
//! - `integrity`: sync repair, reference cleanup, regeneration

pub mod core;
pub mod eval;
pub mod integrity;
pub mod search;
pub mod store;

// Re-exports for convenience
pub use core::config::EngineConfig;
pub use core::error::{KgError, Result};
pub use core::model::{Entity, Initiative, KnowledgeRecord, RecordKind, Relation, Topic};
pub use core::paths::DataPaths;
pub use eval::{EvaluationReport, EvaluationResult, Evaluator, TestCase};
pub use integrity::{CancellationToken, ReferenceCleaner, SyncRepairer};
pub use search::{ContextBuilder, KnowledgeContext, ResultCache, SearchEngine, SearchFilters, SearchResult};
