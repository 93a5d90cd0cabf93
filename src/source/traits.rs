use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;

use crate::types::{compare_cursor_values, Document, EntityKind};
use crate::Result;

/// Operational system the producers extract from.
#[async_trait]
pub trait SourceSystem: Send + Sync {
    /// Every record of one entity type, as exported.
    async fn scan(&self, entity: EntityKind) -> Result<Vec<Document>>;

    /// Records whose cursor value is at or after `cursor`.
    ///
    /// `cursor_fields` lists the field and its aliases in lookup order; the
    /// first one present on a record is compared. Records carrying none of
    /// them cannot be placed relative to the cursor and are kept.
    async fn changed_since(
        &self,
        entity: EntityKind,
        cursor_fields: &[&str],
        cursor: &Value,
    ) -> Result<Vec<Document>> {
        let records = self.scan(entity).await?;
        Ok(records
            .into_iter()
            .filter(|record| match cursor_value(record, cursor_fields) {
                Some(value) => compare_cursor_values(value, cursor) != Ordering::Less,
                None => true,
            })
            .collect())
    }
}

/// First non-null value among `fields`.
pub fn cursor_value<'a>(record: &'a Document, fields: &[&str]) -> Option<&'a Value> {
    fields
        .iter()
        .filter_map(|field| record.get(*field))
        .find(|value| !value.is_null())
}
