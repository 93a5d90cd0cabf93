use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::source::traits::SourceSystem;
use crate::types::{Document, EntityKind};
use crate::Result;

/// Source system backed by in-memory record lists.
#[derive(Default)]
pub struct MemorySource {
    records: RwLock<HashMap<EntityKind, Vec<Document>>>,
    /// Entities whose scan fails, to exercise connectivity failures
    unavailable: RwLock<Vec<EntityKind>>,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, entity: EntityKind, record: Document) {
        self.records.write().entry(entity).or_default().push(record);
    }

    pub fn extend(&self, entity: EntityKind, records: impl IntoIterator<Item = Document>) {
        self.records.write().entry(entity).or_default().extend(records);
    }

    /// Replace the record at `index`, e.g. to simulate an update in the
    /// operational system between two runs.
    pub fn replace(&self, entity: EntityKind, index: usize, record: Document) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&entity).and_then(|list| list.get_mut(index)) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    pub fn set_unavailable(&self, entity: EntityKind) {
        self.unavailable.write().push(entity);
    }
}

#[async_trait]
impl SourceSystem for MemorySource {
    async fn scan(&self, entity: EntityKind) -> Result<Vec<Document>> {
        if self.unavailable.read().contains(&entity) {
            return Err(crate::error::RustDwError::Source(format!(
                "{entity} collection is unavailable"
            )));
        }
        Ok(self.records.read().get(&entity).cloned().unwrap_or_default())
    }
}
