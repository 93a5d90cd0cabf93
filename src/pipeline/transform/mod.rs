//! Pure mapping functions from staging collections to warehouse documents.
//!
//! Strategies never touch the store; the orchestrator reads staging, calls a
//! strategy and hands the output to the loader. Everything a strategy needs
//! besides its inputs lives in a read-only [`TransformContext`].

pub mod customer;
pub mod menu_item;
pub mod order_line;

use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::pipeline::mapping::ProductMapping;
use crate::types::{field_key, Document, ErrorRecord};

/// A warehouse collection and the fields forming its natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarehouseTable {
    pub collection: &'static str,
    pub key_fields: &'static [&'static str],
}

/// Natural key → surrogate key, built from a loaded dimension.
pub type KeyMap = HashMap<String, String>;

/// Documents for one warehouse collection plus the inputs that could not be
/// merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub documents: Vec<Document>,
    pub errors: Vec<ErrorRecord>,
}

/// Read-only lookup state shared by every transform of a run.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub mapping: ProductMapping,
    /// Namespace for deterministic surrogate keys
    pub namespace: Uuid,
}

impl TransformContext {
    pub fn new(mapping: ProductMapping) -> Self {
        Self {
            mapping,
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_URL, b"rustdw:warehouse"),
        }
    }

    /// Load the mapping file once; see [`ProductMapping::load`].
    pub fn load(mapping_path: &Path) -> Self {
        Self::new(ProductMapping::load(mapping_path))
    }

    /// Same dimension and natural key always give the same surrogate key.
    pub fn surrogate_key(&self, dimension: &str, natural_key: &str) -> String {
        let name = format!("{dimension}/{natural_key}");
        Uuid::new_v5(&self.namespace, name.as_bytes()).to_string()
    }
}

impl Default for TransformContext {
    fn default() -> Self {
        Self::new(ProductMapping::default())
    }
}

/// Build a lookup map from loaded dimension rows.
pub fn key_map(rows: &[Document], natural_field: &str, surrogate_field: &str) -> KeyMap {
    rows.iter()
        .filter_map(|row| Some((field_key(row, natural_field)?, field_key(row, surrogate_field)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_surrogate_keys_are_deterministic_per_dimension() {
        let a = TransformContext::default();
        let b = TransformContext::default();
        assert_eq!(
            a.surrogate_key("dim_menu_item", "A"),
            b.surrogate_key("dim_menu_item", "A")
        );
        assert_ne!(
            a.surrogate_key("dim_menu_item", "A"),
            a.surrogate_key("dim_customer", "A")
        );
    }

    #[test]
    fn test_key_map_skips_incomplete_rows() {
        let rows = vec![
            json!({"user_id": "u1", "customer_key": "k1"}),
            json!({"user_id": "u2"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect::<Vec<_>>();
        let map = key_map(&rows, "user_id", "customer_key");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("u1").map(String::as_str), Some("k1"));
    }
}
