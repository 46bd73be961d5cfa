//! Relational record store using SQLite
//!
//! Each record is kept as a JSON body plus indexed columns for the fields the
//! engine filters on. The `chroma_synced` and embedding-stamp columns are
//! authoritative and are written back onto the body when records are read.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};

use super::{RecordScope, RelationalStore, UnreadableRecord};
use crate::core::error::{KgError, Result};
use crate::core::model::{
    EmbeddingInfo, Entity, Initiative, KnowledgeRecord, RecordBundle, RecordKind, Relation, Topic,
};

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecordCounts {
    pub total: usize,
    pub synced: usize,
}

impl SqliteRecordStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                organization_id TEXT,
                chroma_synced INTEGER NOT NULL DEFAULT 0,
                model_id TEXT,
                model_version TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );

            CREATE TABLE IF NOT EXISTS initiatives (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                organization_id TEXT,
                topic_ids TEXT NOT NULL,  -- JSON array
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_scope ON records(kind, organization_id, chroma_synced);
            CREATE INDEX IF NOT EXISTS idx_initiatives_org ON initiatives(organization_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a record after validating it.
    pub fn upsert(&self, record: &KnowledgeRecord) -> Result<()> {
        record.validate()?;
        let body = match record {
            KnowledgeRecord::Entity(e) => serde_json::to_string(e)?,
            KnowledgeRecord::Relation(r) => serde_json::to_string(r)?,
            KnowledgeRecord::Topic(t) => serde_json::to_string(t)?,
        };
        let embedding = record.embedding();
        self.conn.lock().execute(
            r#"
            INSERT INTO records (kind, id, organization_id, chroma_synced, model_id, model_version, created_at, updated_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(kind, id) DO UPDATE SET
                organization_id = excluded.organization_id,
                chroma_synced = excluded.chroma_synced,
                model_id = excluded.model_id,
                model_version = excluded.model_version,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                body = excluded.body
            "#,
            params![
                record.kind().as_str(),
                record.id(),
                record.organization_id(),
                record.chroma_synced(),
                embedding.map(|e| e.model_id.as_str()),
                embedding.map(|e| e.version.as_str()),
                record.created_at().timestamp(),
                record.updated_at().timestamp(),
                body,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_entity(&self, entity: Entity) -> Result<()> {
        self.upsert(&KnowledgeRecord::Entity(entity))
    }

    pub fn upsert_relation(&self, relation: Relation) -> Result<()> {
        self.upsert(&KnowledgeRecord::Relation(relation))
    }

    pub fn upsert_topic(&self, topic: Topic) -> Result<()> {
        self.upsert(&KnowledgeRecord::Topic(topic))
    }

    pub fn upsert_initiative(&self, initiative: &Initiative) -> Result<()> {
        if initiative.id.trim().is_empty() {
            return Err(KgError::invalid("initiative id must not be empty"));
        }
        self.conn.lock().execute(
            r#"
            INSERT INTO initiatives (id, title, organization_id, topic_ids, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                organization_id = excluded.organization_id,
                topic_ids = excluded.topic_ids,
                updated_at = excluded.updated_at
            "#,
            params![
                initiative.id,
                initiative.title,
                initiative.organization_id,
                serde_json::to_string(&initiative.topic_ids)?,
                initiative.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Store every record of a bundle. Returns the number written.
    pub fn import_bundle(&self, bundle: RecordBundle) -> Result<usize> {
        let mut written = 0;
        for e in bundle.entities {
            self.upsert_entity(e)?;
            written += 1;
        }
        for r in bundle.relations {
            self.upsert_relation(r)?;
            written += 1;
        }
        for t in bundle.topics {
            self.upsert_topic(t)?;
            written += 1;
        }
        for i in &bundle.initiatives {
            self.upsert_initiative(i)?;
            written += 1;
        }
        Ok(written)
    }

    pub fn counts(&self, kind: RecordKind, organization_id: Option<&str>) -> Result<RecordCounts> {
        let (total, synced): (i64, i64) = self.conn.lock().query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(chroma_synced), 0) FROM records
            WHERE kind = ?1 AND (?2 IS NULL OR organization_id = ?2)
            "#,
            params![kind.as_str(), organization_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(RecordCounts {
            total: total as usize,
            synced: synced as usize,
        })
    }

    fn query_records(&self, kind: RecordKind, sql: &str, args: Vec<rusqlite::types::Value>) -> Result<Vec<KnowledgeRecord>> {
        let (records, unreadable) = self.scan(kind, sql, args)?;
        for row in &unreadable {
            tracing::warn!(kind = kind.as_str(), id = %row.id, reason = %row.reason, "skipping unreadable record");
        }
        Ok(records)
    }

    /// Decode every selected row, splitting off the ones whose body is unusable.
    fn scan(
        &self,
        kind: RecordKind,
        sql: &str,
        args: Vec<rusqlite::types::Value>,
    ) -> Result<(Vec<KnowledgeRecord>, Vec<UnreadableRecord>)> {
        let rows: Vec<RawRecord> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(params_from_iter(args), |row| {
                Ok(RawRecord {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    chroma_synced: row.get(2)?,
                    model_id: row.get(3)?,
                    model_version: row.get(4)?,
                    body: row.get(5)?,
                })
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let mut records = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for raw in rows {
            match raw.decode(kind) {
                Ok(record) => records.push(record),
                Err(e) => unreadable.push(UnreadableRecord {
                    id: raw.id,
                    organization_id: raw.organization_id,
                    chroma_synced: raw.chroma_synced,
                    reason: e.to_string(),
                }),
            }
        }
        Ok((records, unreadable))
    }

    fn scope_query(kind: RecordKind, scope: &RecordScope) -> (String, Vec<rusqlite::types::Value>) {
        use rusqlite::types::Value;

        let mut sql = format!("{} WHERE kind = ?", SELECT_RECORD);
        let mut args = vec![Value::Text(kind.as_str().to_string())];
        if let Some(org) = &scope.organization_id {
            sql.push_str(" AND organization_id = ?");
            args.push(Value::Text(org.clone()));
        }
        if let Some(synced) = scope.synced {
            sql.push_str(" AND chroma_synced = ?");
            args.push(Value::Integer(synced as i64));
        }
        sql.push_str(" ORDER BY id");
        (sql, args)
    }
}

struct RawRecord {
    id: String,
    organization_id: Option<String>,
    chroma_synced: bool,
    model_id: Option<String>,
    model_version: Option<String>,
    body: String,
}

impl RawRecord {
    fn decode(&self, kind: RecordKind) -> Result<KnowledgeRecord> {
        let embedding = match (&self.model_id, &self.model_version) {
            (Some(model_id), Some(version)) => Some(EmbeddingInfo {
                model_id: model_id.clone(),
                version: version.clone(),
            }),
            _ => None,
        };
        let record = match kind {
            RecordKind::Entity => {
                let mut e: Entity = serde_json::from_str(&self.body)?;
                e.chroma_synced = self.chroma_synced;
                e.embedding = embedding;
                KnowledgeRecord::Entity(e)
            }
            RecordKind::Relation => {
                let mut r: Relation = serde_json::from_str(&self.body)?;
                r.chroma_synced = self.chroma_synced;
                r.embedding = embedding;
                KnowledgeRecord::Relation(r)
            }
            RecordKind::Topic => {
                let mut t: Topic = serde_json::from_str(&self.body)?;
                t.chroma_synced = self.chroma_synced;
                t.embedding = embedding;
                KnowledgeRecord::Topic(t)
            }
        };
        record.validate()?;
        Ok(record)
    }
}

const SELECT_RECORD: &str = "SELECT id, organization_id, chroma_synced, model_id, model_version, body FROM records";

#[async_trait]
impl RelationalStore for SqliteRecordStore {
    async fn fetch(&self, kind: RecordKind, ids: &[String]) -> Result<Vec<KnowledgeRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{} WHERE kind = ? AND id IN ({})", SELECT_RECORD, placeholders);
        let mut args = vec![rusqlite::types::Value::Text(kind.as_str().to_string())];
        args.extend(ids.iter().map(|id| rusqlite::types::Value::Text(id.clone())));
        self.query_records(kind, &sql, args)
    }

    async fn list(&self, kind: RecordKind, scope: &RecordScope) -> Result<Vec<KnowledgeRecord>> {
        let (sql, args) = Self::scope_query(kind, scope);
        self.query_records(kind, &sql, args)
    }

    async fn list_unreadable(&self, kind: RecordKind, scope: &RecordScope) -> Result<Vec<UnreadableRecord>> {
        let (sql, args) = Self::scope_query(kind, scope);
        let (_, unreadable) = self.scan(kind, &sql, args)?;
        Ok(unreadable)
    }

    async fn set_synced(&self, kind: RecordKind, id: &str, synced: bool) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE records SET chroma_synced = ?1 WHERE kind = ?2 AND id = ?3",
            params![synced, kind.as_str(), id],
        )?;
        if changed == 0 {
            return Err(KgError::invalid(format!("no {} with id '{}'", kind, id)));
        }
        Ok(())
    }

    async fn record_embedding(&self, kind: RecordKind, id: &str, info: &EmbeddingInfo) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE records SET model_id = ?1, model_version = ?2 WHERE kind = ?3 AND id = ?4",
            params![info.model_id, info.version, kind.as_str(), id],
        )?;
        if changed == 0 {
            return Err(KgError::invalid(format!("no {} with id '{}'", kind, id)));
        }
        Ok(())
    }

    async fn topic_ids(&self, organization_id: Option<&str>) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM records WHERE kind = 'topic' AND (?1 IS NULL OR organization_id = ?1)",
        )?;
        let ids = stmt
            .query_map(params![organization_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    async fn list_initiatives(&self, organization_id: Option<&str>) -> Result<Vec<Initiative>> {
        let rows: Vec<(String, String, Option<String>, String, i64)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                r#"
                SELECT id, title, organization_id, topic_ids, updated_at FROM initiatives
                WHERE (?1 IS NULL OR organization_id = ?1)
                ORDER BY id
                "#,
            )?;
            let mapped = stmt.query_map(params![organization_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let mut initiatives = Vec::with_capacity(rows.len());
        for (id, title, organization_id, topic_json, updated_at) in rows {
            let topic_ids: Vec<String> = serde_json::from_str(&topic_json)?;
            initiatives.push(Initiative {
                id,
                title,
                organization_id,
                topic_ids,
                updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
            });
        }
        Ok(initiatives)
    }

    async fn set_initiative_topics(&self, id: &str, topic_ids: &[String]) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE initiatives SET topic_ids = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(topic_ids)?, chrono::Utc::now().timestamp(), id],
        )?;
        if changed == 0 {
            return Err(KgError::invalid(format!("no initiative with id '{}'", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{EntityType, RelationType};

    fn entity(id: &str, org: Option<&str>, synced: bool) -> Entity {
        let mut e = Entity::new(id, format!("Entity {}", id), EntityType::Company);
        e.organization_id = org.map(String::from);
        e.chroma_synced = synced;
        e
    }

    #[tokio::test]
    async fn test_upsert_fetch_list() -> Result<()> {
        let store = SqliteRecordStore::open_in_memory()?;
        store.upsert_entity(entity("e1", Some("org1"), true))?;
        store.upsert_entity(entity("e2", Some("org1"), false))?;
        store.upsert_entity(entity("e3", Some("org2"), true))?;
        store.upsert_relation(Relation::new("r1", "t1", RelationType::Uses, "uses"))?;

        let fetched = store
            .fetch(RecordKind::Entity, &["e1".to_string(), "missing".to_string()])
            .await?;
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id(), "e1");

        let scope = RecordScope::organization(Some("org1")).synced(true);
        let listed = store.list(RecordKind::Entity, &scope).await?;
        assert_eq!(listed.len(), 1);

        let counts = store.counts(RecordKind::Entity, None)?;
        assert_eq!(counts.total, 3);
        assert_eq!(counts.synced, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_flags_are_authoritative() -> Result<()> {
        let store = SqliteRecordStore::open_in_memory()?;
        store.upsert_entity(entity("e1", None, true))?;
        store.set_synced(RecordKind::Entity, "e1", false).await?;
        let info = EmbeddingInfo {
            model_id: "htp-384".to_string(),
            version: "1.0".to_string(),
        };
        store.record_embedding(RecordKind::Entity, "e1", &info).await?;

        let records = store.fetch(RecordKind::Entity, &["e1".to_string()]).await?;
        assert!(!records[0].chroma_synced());
        assert_eq!(records[0].embedding(), Some(&info));

        assert!(store.set_synced(RecordKind::Entity, "nope", true).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_record_rejected() -> Result<()> {
        let store = SqliteRecordStore::open_in_memory()?;
        let mut rel = Relation::new("r1", "t1", RelationType::Owns, "owns");
        rel.confidence = 2.0;
        assert!(store.upsert_relation(rel).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_initiatives() -> Result<()> {
        let store = SqliteRecordStore::open_in_memory()?;
        store.upsert_initiative(&Initiative {
            id: "i1".to_string(),
            title: "Launch".to_string(),
            organization_id: Some("org1".to_string()),
            topic_ids: vec!["t1".to_string(), "t2".to_string()],
            updated_at: chrono::Utc::now(),
        })?;
        store.set_initiative_topics("i1", &["t1".to_string()]).await?;
        let list = store.list_initiatives(Some("org1")).await?;
        assert_eq!(list[0].topic_ids, vec!["t1".to_string()]);
        assert!(store.list_initiatives(Some("org2")).await?.is_empty());
        Ok(())
    }
}
