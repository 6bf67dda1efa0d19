//! Client/server storage backed by Postgres with native pgvector search.
//!
//! The embedding column width is fixed at construction and mismatched
//! inserts are rejected. When the `vector` extension cannot be installed
//! the adapter falls back to `real[]` columns and in-process scans, so
//! queries stay correct, just slower; ANN index creation likewise
//! degrades to a no-op.

use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use tokio_postgres::types::Json as PgJson;
use tokio_postgres::{Client, NoTls, Row};
use tracing::warn;

use super::{
    rank_matches, Analytics, AnalyticsSummary, CheckRow, Storage, StorageError, VectorMatch,
    MAX_BULK_LOAD,
};
use crate::ranker::ResultKind;
use crate::record::StoredRecord;
use crate::similarity::cosine;

/// Bounded number of connection attempts before surfacing the failure.
pub const CONNECT_ATTEMPTS: usize = 5;

/// Rows returned in the analytics timeline.
const TIMELINE_LIMIT: i64 = 50;

/// Postgres-backed implementation of [`Storage`].
pub struct PostgresStorage {
    client: Client,
    dimensions: usize,
    vector_ready: bool,
}

impl PostgresStorage {
    /// Connects with exponential backoff and prepares the schema for
    /// embeddings of the given dimension.
    pub async fn connect(database_url: &str, dimensions: usize) -> Result<Self, StorageError> {
        if dimensions == 0 {
            return Err(StorageError::InvalidValue(
                "embedding dimension must be positive".to_string(),
            ));
        }
        let mut attempt = 0usize;
        let (client, connection) = loop {
            match tokio_postgres::connect(database_url, NoTls).await {
                Ok(pair) => break pair,
                Err(err) if attempt + 1 < CONNECT_ATTEMPTS => {
                    attempt += 1;
                    let delay = connect_backoff(attempt);
                    warn!(error = %err, attempt, "postgres connect failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(StorageError::Unavailable(format!(
                        "connect failed after {CONNECT_ATTEMPTS} attempts: {err}"
                    )))
                }
            }
        };
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection task ended");
            }
        });

        let vector_ready = match client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "pgvector extension unavailable; using full-scan search");
                false
            }
        };

        let store = Self {
            client,
            dimensions,
            vector_ready,
        };
        store.prepare_schema().await?;
        Ok(store)
    }

    /// Whether native vector search is active.
    pub fn vector_ready(&self) -> bool {
        self.vector_ready
    }

    async fn prepare_schema(&self) -> Result<(), StorageError> {
        let embedding_type = if self.vector_ready {
            format!("VECTOR({})", self.dimensions)
        } else {
            "REAL[]".to_string()
        };
        let records_ddl = format!(
            "CREATE TABLE IF NOT EXISTS records (
                id BIGINT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                files JSONB NOT NULL,
                text_embedding {embedding_type} NOT NULL,
                diff_embedding {embedding_type} NOT NULL,
                created_at BIGINT NOT NULL
            )"
        );
        self.client.execute(records_ddl.as_str(), &[]).await?;
        self.client
            .execute(
                "CREATE INDEX IF NOT EXISTS records_created_at_idx ON records (created_at DESC)",
                &[],
            )
            .await?;
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS check_results (
                    auto_id BIGSERIAL PRIMARY KEY,
                    id BIGINT NOT NULL,
                    result_type TEXT NOT NULL,
                    original_id BIGINT,
                    confidence DOUBLE PRECISION NOT NULL,
                    timestamp_ms BIGINT NOT NULL
                )",
                &[],
            )
            .await?;
        if self.vector_ready {
            // ANN indexing is an optimization; absence degrades to a
            // sequential scan with identical ordering.
            if let Err(err) = self
                .client
                .execute(
                    "CREATE INDEX IF NOT EXISTS records_text_embedding_idx
                     ON records USING hnsw (text_embedding vector_cosine_ops)",
                    &[],
                )
                .await
            {
                warn!(error = %err, "ANN index creation skipped");
            }
        }
        Ok(())
    }

    fn check_dimension(&self, record: &StoredRecord) -> Result<(), StorageError> {
        for embedding in [&record.text_embedding, &record.diff_embedding] {
            if embedding.len() != self.dimensions {
                return Err(StorageError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: embedding.len(),
                });
            }
        }
        Ok(())
    }

    fn record_from_row(&self, row: &Row) -> StoredRecord {
        let PgJson(files): PgJson<Vec<String>> = row.get("files");
        let (text_embedding, diff_embedding) = if self.vector_ready {
            let text: Vector = row.get("text_embedding");
            let diff: Vector = row.get("diff_embedding");
            (text.to_vec(), diff.to_vec())
        } else {
            (row.get("text_embedding"), row.get("diff_embedding"))
        };
        StoredRecord {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            files,
            text_embedding,
            diff_embedding,
            created_at: row.get("created_at"),
        }
    }

    async fn scan_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, StorageError> {
        let rows = self
            .client
            .query("SELECT id, text_embedding FROM records", &[])
            .await?;
        let matches = rows
            .iter()
            .map(|row| {
                let embedding: Vec<f32> = if self.vector_ready {
                    row.get::<_, Vector>("text_embedding").to_vec()
                } else {
                    row.get("text_embedding")
                };
                VectorMatch {
                    id: row.get("id"),
                    score: cosine(query, &embedding),
                }
            })
            .collect();
        Ok(rank_matches(matches, k))
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn save(&self, record: &StoredRecord) -> Result<(), StorageError> {
        self.check_dimension(record)?;
        let files = PgJson(&record.files);
        let sql = "INSERT INTO records (id, title, description, files, text_embedding, diff_embedding, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   ON CONFLICT (id) DO UPDATE SET
                       title = EXCLUDED.title,
                       description = EXCLUDED.description,
                       files = EXCLUDED.files,
                       text_embedding = EXCLUDED.text_embedding,
                       diff_embedding = EXCLUDED.diff_embedding,
                       created_at = EXCLUDED.created_at";
        if self.vector_ready {
            let text = Vector::from(record.text_embedding.clone());
            let diff = Vector::from(record.diff_embedding.clone());
            self.client
                .execute(
                    sql,
                    &[
                        &record.id,
                        &record.title,
                        &record.description,
                        &files,
                        &text,
                        &diff,
                        &record.created_at,
                    ],
                )
                .await?;
        } else {
            self.client
                .execute(
                    sql,
                    &[
                        &record.id,
                        &record.title,
                        &record.description,
                        &files,
                        &record.text_embedding,
                        &record.diff_embedding,
                        &record.created_at,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, title, description, files, text_embedding, diff_embedding, created_at
                 FROM records WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.map(|row| self.record_from_row(&row)))
    }

    async fn get_all(&self) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT id, title, description, files, text_embedding, diff_embedding, created_at
                 FROM records ORDER BY id ASC LIMIT $1",
                &[&(MAX_BULK_LOAD as i64)],
            )
            .await?;
        Ok(rows.iter().map(|row| self.record_from_row(row)).collect())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, StorageError> {
        if query.len() != self.dimensions {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if !self.vector_ready {
            return self.scan_search(query, k).await;
        }
        let vector = Vector::from(query.to_vec());
        let rows = self
            .client
            .query(
                "SELECT id, 1 - (text_embedding <=> $1) AS score
                 FROM records ORDER BY text_embedding <=> $1 LIMIT $2",
                &[&vector, &(k as i64)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| VectorMatch {
                id: row.get("id"),
                score: row.get("score"),
            })
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        self.client
            .execute("DELETE FROM records WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Dropping the client terminates the spawned connection task.
        Ok(())
    }

    async fn save_check(&self, check: &CheckRow) -> Result<(), StorageError> {
        self.client
            .execute(
                "INSERT INTO check_results (id, result_type, original_id, confidence, timestamp_ms)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &check.id,
                    &check.result_type.as_str(),
                    &check.original_id,
                    &check.confidence,
                    &check.timestamp_ms,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_analytics(&self) -> Result<Option<Analytics>, StorageError> {
        let mut summary = AnalyticsSummary::default();
        let counts = self
            .client
            .query(
                "SELECT result_type, COUNT(*) AS n FROM check_results GROUP BY result_type",
                &[],
            )
            .await?;
        for row in counts {
            let kind: String = row.get("result_type");
            let count: i64 = row.get("n");
            let count = count.max(0) as u64;
            summary.total_checks += count;
            match ResultKind::from_str_lossy(&kind) {
                ResultKind::Duplicate => summary.duplicates += count,
                ResultKind::Possible => summary.possibles += count,
                ResultKind::Unique => summary.uniques += count,
            }
        }
        let rows = self
            .client
            .query(
                "SELECT id, result_type, original_id, confidence, timestamp_ms
                 FROM check_results ORDER BY timestamp_ms DESC, auto_id DESC LIMIT $1",
                &[&TIMELINE_LIMIT],
            )
            .await?;
        let timeline = rows
            .iter()
            .map(|row| {
                let kind: String = row.get("result_type");
                CheckRow {
                    id: row.get("id"),
                    result_type: ResultKind::from_str_lossy(&kind),
                    original_id: row.get("original_id"),
                    confidence: row.get("confidence"),
                    timestamp_ms: row.get("timestamp_ms"),
                }
            })
            .collect();
        Ok(Some(Analytics { summary, timeline }))
    }

    async fn duplicate_edges(&self) -> Result<Vec<(i64, i64)>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT id, original_id FROM check_results
                 WHERE result_type = 'duplicate' AND original_id IS NOT NULL
                 ORDER BY timestamp_ms ASC, auto_id ASC",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("original_id")))
            .collect())
    }
}

fn connect_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}
