//! Stored index records, snapshot documents and query result shapes.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Indexed record persisted by the storage back-ends: descriptor metadata
/// plus both embeddings. The diff text itself is not retained, only its
/// embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Primary key; inserts with an existing id upsert.
    pub id: i64,
    /// Sanitized title.
    pub title: String,
    /// Sanitized description.
    pub description: String,
    /// Normalized file paths.
    pub files: Vec<String>,
    /// Embedding of `title\ndescription`.
    pub text_embedding: Vec<f32>,
    /// Embedding of the preprocessed diff; same length as `text_embedding`.
    pub diff_embedding: Vec<f32>,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
}

/// Self-contained export of the detector's indexed state, portable across
/// processes independently of any storage back-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every indexed record, embeddings included.
    pub records: Vec<StoredRecord>,
    /// Base64 export of the bloom filter's bit array.
    pub bloom: String,
}

/// One hit returned by semantic search, hydrated with record metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Identifier of the matching record.
    pub id: i64,
    /// Cosine similarity against the query embedding.
    pub score: f64,
    /// Record title.
    pub title: String,
    /// Record description.
    pub description: String,
    /// Record creation timestamp, epoch milliseconds.
    pub created_at: i64,
    /// Changed files recorded for the hit.
    pub files: Vec<String>,
}

/// Aggregate counters reported by the detector.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Number of indexed records in the in-memory mirror.
    pub total_prs: usize,
    /// Bit size of the bloom filter.
    pub bloom_size: usize,
    /// Number of attribution edges recorded.
    pub duplicate_pairs: usize,
    /// Name of the configured storage back-end, or `"none"`.
    pub storage_backend: &'static str,
}

/// Milliseconds since the Unix epoch, saturating at zero for clocks set
/// before 1970.
pub(crate) fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_to_the_documented_shape() {
        let snapshot = Snapshot {
            records: vec![StoredRecord {
                id: 7,
                title: "t".into(),
                description: "d".into(),
                files: vec!["a.rs".into()],
                text_embedding: vec![0.5, 0.5],
                diff_embedding: vec![1.0, 0.0],
                created_at: 1_700_000_000_000,
            }],
            bloom: "AAAA".into(),
        };
        let json = serde_json::to_value(&snapshot).expect("serialize");
        assert_eq!(json["records"][0]["id"], 7);
        assert_eq!(json["records"][0]["text_embedding"][0], 0.5);
        assert_eq!(json["bloom"], "AAAA");

        let back: Snapshot = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.records.len(), 1);
        assert_eq!(back.records[0].diff_embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn epoch_ms_is_monotonic_enough() {
        let a = epoch_ms();
        let b = epoch_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
