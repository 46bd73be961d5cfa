//! Storage contracts and their SQLite adapters
//!
//! - [`RelationalStore`]: record metadata, sync flags, initiatives
//! - [`PersistedStore`]: string key/value state (cache tier, evaluation
//!   artefacts, search history)

pub mod kv;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::core::error::Result;
use crate::core::model::{EmbeddingInfo, Initiative, KnowledgeRecord, RecordKind};

pub use kv::{MemoryKvStore, PersistedStore, SqliteKvStore};
pub use sqlite::SqliteRecordStore;

/// Selection for [`RelationalStore::list`].
#[derive(Debug, Clone, Default)]
pub struct RecordScope {
    pub organization_id: Option<String>,
    /// Restrict to records whose sync flag equals this value.
    pub synced: Option<bool>,
}

impl RecordScope {
    pub fn organization(org: Option<&str>) -> Self {
        Self {
            organization_id: org.map(String::from),
            synced: None,
        }
    }

    pub fn synced(mut self, synced: bool) -> Self {
        self.synced = Some(synced);
        self
    }
}

/// A stored row whose body no longer decodes into a valid record.
#[derive(Debug, Clone)]
pub struct UnreadableRecord {
    pub id: String,
    pub organization_id: Option<String>,
    pub chroma_synced: bool,
    pub reason: String,
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Records of `kind` with the given ids; unknown ids are omitted.
    async fn fetch(&self, kind: RecordKind, ids: &[String]) -> Result<Vec<KnowledgeRecord>>;

    /// Decodable records in scope; unreadable rows are left out.
    async fn list(&self, kind: RecordKind, scope: &RecordScope) -> Result<Vec<KnowledgeRecord>>;

    /// Rows in scope that `list` leaves out because their body is unusable.
    async fn list_unreadable(&self, kind: RecordKind, scope: &RecordScope) -> Result<Vec<UnreadableRecord>>;

    async fn set_synced(&self, kind: RecordKind, id: &str, synced: bool) -> Result<()>;

    async fn record_embedding(&self, kind: RecordKind, id: &str, info: &EmbeddingInfo) -> Result<()>;

    async fn topic_ids(&self, organization_id: Option<&str>) -> Result<HashSet<String>>;

    async fn list_initiatives(&self, organization_id: Option<&str>) -> Result<Vec<Initiative>>;

    async fn set_initiative_topics(&self, id: &str, topic_ids: &[String]) -> Result<()>;
}
