use async_trait::async_trait;

use crate::{types::Document, Result};

/// Keyed document collections used for staging, warehouse and error data.
///
/// `upsert` is the only synchronization primitive the pipeline relies on:
/// concurrent writers to the same key resolve to last-write-wins, and a row
/// keeps its original position in `read_all` order when it is overwritten.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document stored under `key`.
    async fn upsert(&self, collection: &str, key: &str, document: Document) -> Result<()>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Every document in first-insertion order. Missing collections are empty.
    async fn read_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Append a document under a generated key and return that key.
    async fn append(&self, collection: &str, document: Document) -> Result<String>;

    async fn count(&self, collection: &str) -> Result<usize>;
}
