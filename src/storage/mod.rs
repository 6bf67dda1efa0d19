//! Persistence contract shared by the storage back-ends.

pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ranker::ResultKind;
use crate::record::StoredRecord;

/// Upper bound on records returned by a single [`Storage::get_all`] call.
/// Callers treat the result as a paginated snapshot, not a live cursor.
pub const MAX_BULK_LOAD: usize = 10_000;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Postgres operation failed.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    /// Snapshot file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization of a record or snapshot failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A record carries embeddings of the wrong dimension for the store.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store was created with.
        expected: usize,
        /// Dimension carried by the rejected record.
        actual: usize,
    },
    /// A persisted value could not be decoded.
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    /// The back-end could not be reached after exhausting retries.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// One candidate produced by a vector search, scored by cosine similarity
/// against the stored text embedding.
#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    /// Identifier of the matching record.
    pub id: i64,
    /// Cosine similarity, descending across a result set.
    pub score: f64,
}

/// Row recorded for long-term check analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRow {
    /// Identifier of the checked descriptor.
    pub id: i64,
    /// Classification tier of the check.
    pub result_type: ResultKind,
    /// Best prior match for duplicate/possible results.
    pub original_id: Option<i64>,
    /// Confidence reported with the result.
    pub confidence: f64,
    /// When the check completed, epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Result-type counts over every recorded check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsSummary {
    /// Total checks recorded.
    pub total_checks: u64,
    /// Checks classified duplicate.
    pub duplicates: u64,
    /// Checks classified possible.
    pub possibles: u64,
    /// Checks classified unique.
    pub uniques: u64,
}

/// Long-term observability payload for backends that record checks.
#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    /// Aggregated counts.
    pub summary: AnalyticsSummary,
    /// Most recent checks, newest first.
    pub timeline: Vec<CheckRow>,
}

/// Persistence capability the detector depends on.
///
/// `save` is an atomic upsert by identifier. `search` orders by cosine
/// similarity against the stored *text* embedding, descending; back-ends
/// without native vector search full-scan. The analytics methods are an
/// optional capability with no-op defaults; the core only relies on them
/// when the configured back-end implements them.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short stable name, reported in detector stats.
    fn name(&self) -> &'static str;

    /// Upserts a record by identifier.
    async fn save(&self, record: &StoredRecord) -> Result<(), StorageError>;

    /// Fetches one record.
    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StorageError>;

    /// Bulk-loads up to [`MAX_BULK_LOAD`] records with embeddings intact.
    async fn get_all(&self) -> Result<Vec<StoredRecord>, StorageError>;

    /// Top-`k` records by text-embedding cosine similarity.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, StorageError>;

    /// Deletes one record; absent identifiers are not an error.
    async fn delete(&self, id: i64) -> Result<(), StorageError>;

    /// Releases held resources.
    async fn close(&self) -> Result<(), StorageError>;

    /// Records a check outcome for analytics.
    async fn save_check(&self, _check: &CheckRow) -> Result<(), StorageError> {
        Ok(())
    }

    /// Aggregated check analytics; `None` when the capability is absent.
    async fn get_analytics(&self) -> Result<Option<Analytics>, StorageError> {
        Ok(None)
    }

    /// Recorded duplicate edges `(dup_id, orig_id)` in recording order,
    /// used to rebuild the attribution graph on initialization.
    async fn duplicate_edges(&self) -> Result<Vec<(i64, i64)>, StorageError> {
        Ok(Vec::new())
    }
}

/// Sorts matches by descending score, breaking ties toward the lowest
/// identifier so orderings are deterministic, and truncates to `k`.
pub(crate) fn rank_matches(mut matches: Vec<VectorMatch>, k: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(k);
    matches
}
