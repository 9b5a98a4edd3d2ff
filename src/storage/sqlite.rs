//! SQLite snapshots of fingerprints, topics and summaries

use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::clustering::TopicCluster;
use crate::config::Config;
use crate::dedup::{FingerprintRecord, MemoryFingerprint};
use crate::error::{Error, Result};
use crate::memory::ContextItem;
use crate::summarizer::ConversationSummary;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open the snapshot database under the configured data directory
    pub fn new(config: &Config) -> Result<Self> {
        Self::open(config.sqlite_path())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Throwaway database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Replace every stored fingerprint with `records`
    pub fn replace_fingerprints(&self, records: &[FingerprintRecord]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM fingerprints", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO fingerprints (
                    memory_id, content_hash, memory_type, created_at, fingerprint, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    record.memory_id,
                    record.fingerprint.content_hash,
                    record.fingerprint.memory_type.to_string(),
                    record.fingerprint.created_at.to_rfc3339(),
                    serde_json::to_string(&record.fingerprint)?,
                    record.embedding.as_deref().map(embedding_to_blob),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// All stored fingerprints, oldest first
    pub fn load_fingerprints(&self) -> Result<Vec<FingerprintRecord>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT memory_id, fingerprint, embedding FROM fingerprints
             ORDER BY created_at, memory_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(FingerprintRow {
                memory_id: row.get(0)?,
                fingerprint: row.get(1)?,
                embedding: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Replace every stored memory item with `items`
    ///
    /// Embeddings are not stored here; they live with the fingerprints.
    pub fn replace_items(&self, items: &[ContextItem]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_items", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO memory_items (id, user_id, memory_type, created_at, data)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.user_id,
                    item.memory_type.to_string(),
                    item.timestamp.to_rfc3339(),
                    serde_json::to_string(item)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    pub fn load_items(&self) -> Result<Vec<ContextItem>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare("SELECT data FROM memory_items ORDER BY created_at, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for data in rows {
            items.push(serde_json::from_str(&data?)?);
        }
        Ok(items)
    }

    /// Replace every stored topic with `clusters`
    pub fn replace_clusters(&self, clusters: &[TopicCluster]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM topic_clusters", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO topic_clusters (id, name, member_count, updated_at, data)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for cluster in clusters {
                stmt.execute(params![
                    cluster.id.to_string(),
                    cluster.name,
                    cluster.member_count as i64,
                    cluster.updated_at.to_rfc3339(),
                    serde_json::to_string(cluster)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(clusters.len())
    }

    pub fn load_clusters(&self) -> Result<Vec<TopicCluster>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt =
            conn.prepare("SELECT data FROM topic_clusters ORDER BY member_count DESC, name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut clusters = Vec::new();
        for data in rows {
            clusters.push(serde_json::from_str(&data?)?);
        }
        Ok(clusters)
    }

    /// Insert or update a summary
    pub fn save_summary(&self, summary: &ConversationSummary) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO summaries (id, user_id, span_start, span_end, created_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                data = excluded.data
            "#,
            params![
                summary.id,
                summary.user_id,
                summary.span.start.to_rfc3339(),
                summary.span.end.to_rfc3339(),
                summary.created_at.to_rfc3339(),
                serde_json::to_string(summary)?,
            ],
        )?;
        Ok(())
    }

    /// Every stored summary, oldest first
    pub fn load_summaries(&self) -> Result<Vec<ConversationSummary>> {
        self.query_summaries("SELECT data FROM summaries ORDER BY created_at", None)
    }

    /// Summaries of one user, newest first
    pub fn summaries_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.query_summaries(
            "SELECT data FROM summaries WHERE user_id = ?1 ORDER BY created_at DESC",
            Some(user_id),
        )
    }

    fn query_summaries(
        &self,
        sql: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare(sql)?;

        let rows = stmt.query_map(params_from_iter(user_id.iter()), |row| row.get::<_, String>(0))?;

        let mut summaries = Vec::new();
        for data in rows {
            summaries.push(serde_json::from_str(&data?)?);
        }
        Ok(summaries)
    }
}

/// Intermediate struct for reading from SQLite
struct FingerprintRow {
    memory_id: String,
    fingerprint: String,
    embedding: Option<Vec<u8>>,
}

impl FingerprintRow {
    fn into_record(self) -> Result<FingerprintRecord> {
        let fingerprint: MemoryFingerprint = serde_json::from_str(&self.fingerprint)?;
        let embedding = self.embedding.map(|b| blob_to_embedding(&b)).transpose()?;
        Ok(FingerprintRecord {
            memory_id: self.memory_id,
            fingerprint,
            embedding,
        })
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::storage(format!(
            "Embedding blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
