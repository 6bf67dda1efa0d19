//! Volatile map-backed storage, primarily for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{rank_matches, Storage, StorageError, VectorMatch, MAX_BULK_LOAD};
use crate::record::StoredRecord;
use crate::similarity::cosine;

/// In-memory storage backed by an id→record map; search is a full scan.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<i64, StoredRecord>>,
}

impl MemoryStorage {
    /// Constructs an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, record: &StoredRecord) -> Result<(), StorageError> {
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<StoredRecord>, StorageError> {
        let records = self.records.read();
        let mut all: Vec<StoredRecord> = records.values().cloned().collect();
        all.sort_by_key(|record| record.id);
        all.truncate(MAX_BULK_LOAD);
        Ok(all)
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, StorageError> {
        let records = self.records.read();
        let matches = records
            .values()
            .map(|record| VectorMatch {
                id: record.id,
                score: cosine(query, &record.text_embedding),
            })
            .collect();
        Ok(rank_matches(matches, k))
    }

    async fn delete(&self, id: i64) -> Result<(), StorageError> {
        self.records.write().remove(&id);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, text_embedding: Vec<f32>) -> StoredRecord {
        StoredRecord {
            id,
            title: format!("record {id}"),
            description: String::new(),
            files: vec!["a.rs".into()],
            diff_embedding: vec![0.0; text_embedding.len()],
            text_embedding,
            created_at: 0,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn save_is_an_upsert() {
        let store = MemoryStorage::new();
        store.save(&record(1, vec![1.0, 0.0])).await.expect("save");
        store.save(&record(1, vec![0.0, 1.0])).await.expect("save");

        assert_eq!(store.len(), 1);
        let loaded = store.get(1).await.expect("get").expect("present");
        assert_eq!(loaded.text_embedding, vec![0.0, 1.0]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn search_orders_by_descending_similarity() {
        let store = MemoryStorage::new();
        store.save(&record(1, vec![1.0, 0.0])).await.expect("save");
        store.save(&record(2, vec![0.7, 0.7])).await.expect("save");
        store.save(&record(3, vec![0.0, 1.0])).await.expect("save");

        let matches = store.search(&[1.0, 0.0], 2).await.expect("search");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, 1);
        assert_eq!(matches[1].id, 2);
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ties_break_toward_the_lowest_id() {
        let store = MemoryStorage::new();
        store.save(&record(9, vec![1.0, 0.0])).await.expect("save");
        store.save(&record(4, vec![1.0, 0.0])).await.expect("save");

        let matches = store.search(&[1.0, 0.0], 2).await.expect("search");
        assert_eq!(matches[0].id, 4);
        assert_eq!(matches[1].id, 9);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delete_removes_the_record() {
        let store = MemoryStorage::new();
        store.save(&record(1, vec![1.0])).await.expect("save");
        store.delete(1).await.expect("delete");
        assert!(store.get(1).await.expect("get").is_none());
        assert!(store.is_empty());
    }
}
