use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::types::value_to_key;

/// Legacy or alternate product identifiers mapped to canonical ones.
///
/// Loaded once and never mutated; consulted only when a warehouse import
/// does not match a staged product directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductMapping {
    entries: HashMap<String, String>,
}

#[derive(Deserialize)]
struct MappingEntry {
    legacy_id: Value,
    product_id: Value,
}

impl ProductMapping {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Load the mapping file. A missing or unparseable file yields an empty
    /// mapping and a warning; the pipeline proceeds without fallback matches.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Product mapping unavailable, continuing with an empty mapping");
                return Self::default();
            }
        };

        match Self::parse(&content) {
            Ok(mapping) => {
                info!(path = %path.display(), entries = mapping.len(), "Loaded product mapping");
                mapping
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Product mapping is not valid, continuing with an empty mapping");
                Self::default()
            }
        }
    }

    /// Accepts `{"legacy": "canonical", ...}` or
    /// `[{"legacy_id": ..., "product_id": ...}, ...]`.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let mut entries = HashMap::new();
        match serde_json::from_str::<Value>(content)? {
            Value::Object(map) => {
                for (legacy, canonical) in map {
                    if let Some(canonical) = value_to_key(&canonical) {
                        entries.insert(legacy.trim().to_string(), canonical);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    let entry: MappingEntry = serde_json::from_value(item)?;
                    if let (Some(legacy), Some(canonical)) =
                        (value_to_key(&entry.legacy_id), value_to_key(&entry.product_id))
                    {
                        entries.insert(legacy, canonical);
                    }
                }
            }
            other => {
                return Err(crate::error::RustDwError::Config(format!(
                    "product mapping must be an object or an array, got {other}"
                )))
            }
        }
        Ok(Self { entries })
    }

    pub fn resolve(&self, legacy_id: &str) -> Option<&str> {
        self.entries.get(legacy_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
