use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::traits::DocumentStore;
use crate::{types::Document, Result};

#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    document: Document,
}

/// In-process document store.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Arc<RwLock<HashMap<String, Row>>>>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn collection(&self, name: &str) -> Arc<RwLock<HashMap<String, Row>>> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(Default::default)
            .clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, key: &str, document: Document) -> Result<()> {
        let rows = self.collection(collection);
        let mut rows = rows.write();
        match rows.get_mut(key) {
            Some(row) => row.document = document,
            None => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                rows.insert(key.to_string(), Row { seq, document });
            }
        }
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        Ok(self.collections.get(collection).and_then(|rows| {
            let rows = rows.read();
            rows.get(key).map(|row| row.document.clone())
        }))
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>> {
        let Some(rows) = self.collections.get(collection).map(|rows| rows.clone()) else {
            return Ok(Vec::new());
        };
        let rows = rows.read();
        let mut ordered: Vec<&Row> = rows.values().collect();
        ordered.sort_by_key(|row| row.seq);
        Ok(ordered.into_iter().map(|row| row.document.clone()).collect())
    }

    async fn append(&self, collection: &str, document: Document) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        self.upsert(collection, &key, document).await?;
        Ok(key)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.collections.get(collection).map_or(0, |rows| {
            let rows = rows.read();
            rows.len()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_overwrite_keeps_position() {
        let store = MemoryStore::new();
        store.upsert("staging_products", "A", doc(json!({"v": 1}))).await.unwrap();
        store.upsert("staging_products", "B", doc(json!({"v": 2}))).await.unwrap();
        store.upsert("staging_products", "A", doc(json!({"v": 3}))).await.unwrap();

        let all = store.read_all("staging_products").await.unwrap();
        assert_eq!(all, vec![doc(json!({"v": 3})), doc(json!({"v": 2}))]);
        assert_eq!(store.count("staging_products").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store.read_all("nothing").await.unwrap().is_empty());
        assert_eq!(store.count("nothing").await.unwrap(), 0);
        assert!(store.get("nothing", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_leave_one_row() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert("staging_users", "u1", doc(json!({"n": i}))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.count("staging_users").await.unwrap(), 1);
    }
}
