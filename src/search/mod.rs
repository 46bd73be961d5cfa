//! Hybrid search over entities, relations and topics
//!
//! - `similarity`: cosine, keyword and recency scoring
//! - `embedding`: embedding contract and the offline HTP embedder
//! - `vectordb`: vector store contract and SQLite adapter
//! - `filters`: structural filters with AND/OR logic
//! - `cache`: two-tier result cache
//! - `context`: token-budgeted retrieval context built on search
//! - `engine`: the search pipeline
//! - `history`: search log and analytics

pub mod cache;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod filters;
pub mod history;
pub mod similarity;
pub mod vectordb;

pub use cache::{CacheKey, ResultCache};
pub use context::{ContextBuilder, ContextSource, KnowledgeContext};
pub use embedding::{Embedding, EmbeddingGenerator, HtpEmbedder};
pub use engine::{SearchEngine, SearchOutcome, SearchResult};
pub use filters::{FilterLogic, SearchFilters};
pub use history::SearchHistory;
pub use vectordb::{SqliteVectorStore, VectorStore};
