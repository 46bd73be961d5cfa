//! Vector store using SQLite
//!
//! Stores embeddings as little-endian f32 BLOBs, one table shared by all
//! collections, and computes cosine similarity in Rust. O(n) per query, which
//! is fine for the record counts an embedded knowledge graph holds.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::similarity::{cosine_similarity, normalize_similarity};
use crate::core::error::{KgError, Result};
use crate::core::model::RecordKind;

#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub organization_id: Option<String>,
    /// Candidates below this normalized similarity are dropped.
    pub min_similarity: f32,
}

#[derive(Debug, Clone)]
pub struct VectorMetadata {
    pub organization_id: Option<String>,
    pub model_id: String,
    pub version: String,
}

/// One similarity hit, already normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn find_similar(
        &self,
        kind: RecordKind,
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>>;

    async fn save(&self, kind: RecordKind, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()>;

    /// Returns whether a vector was removed.
    async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool>;

    async fn exists(&self, kind: RecordKind, id: &str, organization_id: Option<&str>) -> Result<bool>;

    async fn count(&self, kind: RecordKind, organization_id: Option<&str>) -> Result<usize>;
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Open or create database at path
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
            CREATE TABLE IF NOT EXISTS vectors (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                organization_id TEXT,
                model_id TEXT NOT NULL,
                version TEXT NOT NULL,
                dim INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_vectors_org ON vectors(collection, organization_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn find_similar(
        &self,
        kind: RecordKind,
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, Vec<u8>)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                r#"
                SELECT id, embedding FROM vectors
                WHERE collection = ?1 AND (?2 IS NULL OR organization_id = ?2)
                "#,
            )?;
            let mapped = stmt.query_map(params![kind.collection(), filter.organization_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let mut matches = Vec::new();
        for (id, blob) in rows {
            let vector = blob_to_embedding(&blob);
            match cosine_similarity(query, &vector) {
                Ok(sim) => {
                    let similarity = normalize_similarity(sim);
                    if similarity >= filter.min_similarity {
                        matches.push(VectorMatch { id, similarity });
                    }
                }
                Err(KgError::DimensionMismatch { left, right }) => {
                    tracing::warn!(collection = kind.collection(), %id, left, right, "skipping vector with mismatched dimension");
                }
                Err(e) => return Err(e),
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn save(&self, kind: RecordKind, id: &str, vector: &[f32], metadata: &VectorMetadata) -> Result<()> {
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(KgError::invalid(format!("vector for {} '{}' contains non-finite values", kind, id)));
        }
        let now = chrono::Utc::now().timestamp();
        self.conn.lock().execute(
            r#"
            INSERT INTO vectors (collection, id, organization_id, model_id, version, dim, embedding, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(collection, id) DO UPDATE SET
                organization_id = excluded.organization_id,
                model_id = excluded.model_id,
                version = excluded.version,
                dim = excluded.dim,
                embedding = excluded.embedding,
                stored_at = excluded.stored_at
            "#,
            params![
                kind.collection(),
                id,
                metadata.organization_id,
                metadata.model_id,
                metadata.version,
                vector.len() as i64,
                embedding_to_blob(vector),
                now,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<bool> {
        let removed = self.conn.lock().execute(
            "DELETE FROM vectors WHERE collection = ?1 AND id = ?2",
            params![kind.collection(), id],
        )?;
        Ok(removed > 0)
    }

    async fn exists(&self, kind: RecordKind, id: &str, organization_id: Option<&str>) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM vectors WHERE collection = ?1 AND id = ?2 AND organization_id IS ?3",
                params![kind.collection(), id, organization_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn count(&self, kind: RecordKind, organization_id: Option<&str>) -> Result<usize> {
        let n: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM vectors WHERE collection = ?1 AND (?2 IS NULL OR organization_id = ?2)",
            params![kind.collection(), organization_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
