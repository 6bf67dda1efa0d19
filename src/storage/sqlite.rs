//! Embedded single-file storage backed by SQLite.
//!
//! Embeddings are stored as little-endian `f32` BLOBs and file lists as
//! JSON text. Vector search is a full scan with cosine computed in
//! process. The check-results table doubles as the analytics capability
//! and the source for attribution rebuild on init.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    rank_matches, Analytics, AnalyticsSummary, CheckRow, Storage, StorageError, VectorMatch,
    MAX_BULK_LOAD,
};
use crate::ranker::ResultKind;
use crate::record::StoredRecord;
use crate::similarity::cosine;

/// Rows returned in the analytics timeline.
const TIMELINE_LIMIT: usize = 50;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    files TEXT NOT NULL,
    text_embedding BLOB NOT NULL,
    diff_embedding BLOB NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS records_created_at_idx ON records (created_at DESC);
CREATE TABLE IF NOT EXISTS check_results (
    auto_id INTEGER PRIMARY KEY AUTOINCREMENT,
    id INTEGER NOT NULL,
    result_type TEXT NOT NULL,
    original_id INTEGER,
    confidence REAL NOT NULL,
    timestamp_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS check_results_ts_idx ON check_results (timestamp_ms DESC);
";

/// SQLite-backed implementation of [`Storage`].
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store, useful in tests.
    pub fn in_memory() -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
        // WAL is silently unsupported for in-memory connections.
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(StoredRecord, String)> {
        let files_json: String = row.get("files")?;
        let text_blob: Vec<u8> = row.get("text_embedding")?;
        let diff_blob: Vec<u8> = row.get("diff_embedding")?;
        Ok((
            StoredRecord {
                id: row.get("id")?,
                title: row.get("title")?,
                description: row.get("description")?,
                files: Vec::new(),
                text_embedding: decode_vector_lossy(&text_blob),
                diff_embedding: decode_vector_lossy(&diff_blob),
                created_at: row.get("created_at")?,
            },
            files_json,
        ))
    }

    fn hydrate(pair: (StoredRecord, String)) -> Result<StoredRecord, StorageError> {
        let (mut record, files_json) = pair;
        record.files = serde_json::from_str(&files_json)?;
        Ok(record)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn save(&self, record: &StoredRecord) -> Result<(), StorageError> {
        let files_json = serde_json::to_string(&record.files)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (id, title, description, files, text_embedding, diff_embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 description = excluded.description,
                 files = excluded.files,
                 text_embedding = excluded.text_embedding,
                 diff_embedding = excluded.diff_embedding,
                 created_at = excluded.created_at",
            params![
                record.id,
                record.title,
                record.description,
                files_json,
                encode_vector(&record.text_embedding),
                encode_vector(&record.diff_embedding),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StorageError> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT id, title, description, files, text_embedding, diff_embedding, created_at
                 FROM records WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        found.map(Self::hydrate).transpose()
    }

    async fn get_all(&self) -> Result<Vec<StoredRecord>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, title, description, files, text_embedding, diff_embedding, created_at
             FROM records ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![MAX_BULK_LOAD as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::hydrate).collect()
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id, text_embedding FROM records")?;
        let matches = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok(VectorMatch {
                    id,
                    score: cosine(query, &decode_vector_lossy(&blob)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rank_matches(matches, k))
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute("DELETE FROM records WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        // The connection closes when the store drops; nothing to flush
        // beyond what SQLite already persisted.
        Ok(())
    }

    async fn save_check(&self, check: &CheckRow) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "INSERT INTO check_results (id, result_type, original_id, confidence, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                check.id,
                check.result_type.as_str(),
                check.original_id,
                check.confidence,
                check.timestamp_ms,
            ],
        )?;
        Ok(())
    }

    async fn get_analytics(&self) -> Result<Option<Analytics>, StorageError> {
        let conn = self.conn.lock();
        let mut summary = AnalyticsSummary::default();
        {
            let mut stmt = conn
                .prepare_cached("SELECT result_type, COUNT(*) FROM check_results GROUP BY result_type")?;
            let counts = stmt
                .query_map([], |row| {
                    let kind: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((kind, count.max(0) as u64))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (kind, count) in counts {
                summary.total_checks += count;
                match ResultKind::from_str_lossy(&kind) {
                    ResultKind::Duplicate => summary.duplicates += count,
                    ResultKind::Possible => summary.possibles += count,
                    ResultKind::Unique => summary.uniques += count,
                }
            }
        }
        let mut stmt = conn.prepare_cached(
            "SELECT id, result_type, original_id, confidence, timestamp_ms
             FROM check_results ORDER BY timestamp_ms DESC, auto_id DESC LIMIT ?1",
        )?;
        let timeline = stmt
            .query_map(params![TIMELINE_LIMIT as i64], |row| {
                let kind: String = row.get(1)?;
                Ok(CheckRow {
                    id: row.get(0)?,
                    result_type: ResultKind::from_str_lossy(&kind),
                    original_id: row.get(2)?,
                    confidence: row.get(3)?,
                    timestamp_ms: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(Analytics { summary, timeline }))
    }

    async fn duplicate_edges(&self) -> Result<Vec<(i64, i64)>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, original_id FROM check_results
             WHERE result_type = 'duplicate' AND original_id IS NOT NULL
             ORDER BY timestamp_ms ASC, auto_id ASC",
        )?;
        let edges = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decodes a little-endian `f32` BLOB, ignoring a trailing partial value.
fn decode_vector_lossy(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, text_embedding: Vec<f32>) -> StoredRecord {
        StoredRecord {
            id,
            title: format!("record {id}"),
            description: "body".into(),
            files: vec!["src/a.rs".into(), "src/b.rs".into()],
            diff_embedding: vec![0.5; text_embedding.len()],
            text_embedding,
            created_at: 1_700_000_000_000 + id,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn records_round_trip_with_embeddings_intact() {
        let store = SqliteStorage::in_memory().expect("open");
        let original = record(1, vec![0.25, -0.5, 1.0]);
        store.save(&original).await.expect("save");

        let loaded = store.get(1).await.expect("get").expect("present");
        assert_eq!(loaded.title, original.title);
        assert_eq!(loaded.files, original.files);
        assert_eq!(loaded.text_embedding, original.text_embedding);
        assert_eq!(loaded.diff_embedding, original.diff_embedding);
        assert_eq!(loaded.created_at, original.created_at);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn save_upserts_by_id() {
        let store = SqliteStorage::in_memory().expect("open");
        store.save(&record(1, vec![1.0, 0.0])).await.expect("save");
        let mut updated = record(1, vec![0.0, 1.0]);
        updated.title = "renamed".into();
        store.save(&updated).await.expect("save");

        let all = store.get_all().await.expect("get_all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "renamed");
        assert_eq!(all[0].text_embedding, vec![0.0, 1.0]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn search_scans_and_orders_by_similarity() {
        let store = SqliteStorage::in_memory().expect("open");
        store.save(&record(1, vec![1.0, 0.0])).await.expect("save");
        store.save(&record(2, vec![0.0, 1.0])).await.expect("save");
        store.save(&record(3, vec![0.9, 0.1])).await.expect("save");

        let matches = store.search(&[1.0, 0.0], 2).await.expect("search");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, 1);
        assert_eq!(matches[1].id, 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_removes_rows() {
        let store = SqliteStorage::in_memory().expect("open");
        store.save(&record(1, vec![1.0])).await.expect("save");
        store.delete(1).await.expect("delete");
        assert!(store.get(1).await.expect("get").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn checks_feed_analytics_and_duplicate_edges() {
        let store = SqliteStorage::in_memory().expect("open");
        store
            .save_check(&CheckRow {
                id: 2,
                result_type: ResultKind::Duplicate,
                original_id: Some(1),
                confidence: 0.95,
                timestamp_ms: 100,
            })
            .await
            .expect("save_check");
        store
            .save_check(&CheckRow {
                id: 3,
                result_type: ResultKind::Unique,
                original_id: None,
                confidence: 0.1,
                timestamp_ms: 200,
            })
            .await
            .expect("save_check");

        let analytics = store
            .get_analytics()
            .await
            .expect("analytics")
            .expect("capability present");
        assert_eq!(analytics.summary.total_checks, 2);
        assert_eq!(analytics.summary.duplicates, 1);
        assert_eq!(analytics.summary.uniques, 1);
        assert_eq!(analytics.timeline[0].id, 3);

        let edges = store.duplicate_edges().await.expect("edges");
        assert_eq!(edges, vec![(2, 1)]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        {
            let store = SqliteStorage::open(&path).expect("open");
            store.save(&record(7, vec![0.1, 0.2])).await.expect("save");
        }
        let store = SqliteStorage::open(&path).expect("reopen");
        let loaded = store.get(7).await.expect("get").expect("present");
        assert_eq!(loaded.text_embedding, vec![0.1, 0.2]);
    }
}
