use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::RustDwError;
use crate::source::traits::SourceSystem;
use crate::types::{Document, EntityKind};
use crate::Result;

/// A directory of exports, one per entity: `<entity>.json` holding a JSON
/// array, or `<entity>.jsonl` holding one object per line.
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.path.clone())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RustDwError::Source(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn parse_array(path: &Path, content: &str) -> Result<Vec<Value>> {
        match serde_json::from_str::<Value>(content) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => Err(RustDwError::Source(format!(
                "{} does not contain a JSON array",
                path.display()
            ))),
            Err(e) => Err(RustDwError::Source(format!("{}: {e}", path.display()))),
        }
    }

    fn parse_lines(path: &Path, content: &str) -> Result<Vec<Value>> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    RustDwError::Source(format!("{}:{}: {e}", path.display(), index + 1))
                })
            })
            .collect()
    }
}

#[async_trait]
impl SourceSystem for JsonFileSource {
    async fn scan(&self, entity: EntityKind) -> Result<Vec<Document>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Err(RustDwError::Source(format!(
                "source directory {} is not reachable",
                self.dir.display()
            )));
        }

        let array_path = self.dir.join(format!("{entity}.json"));
        let lines_path = self.dir.join(format!("{entity}.jsonl"));
        let values = if let Some(content) = Self::read_optional(&array_path).await? {
            Self::parse_array(&array_path, &content)?
        } else if let Some(content) = Self::read_optional(&lines_path).await? {
            Self::parse_lines(&lines_path, &content)?
        } else {
            return Err(RustDwError::Source(format!(
                "no export for {entity} in {}",
                self.dir.display()
            )));
        };

        let total = values.len();
        let records: Vec<Document> = values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map),
                other => {
                    warn!(entity = %entity, record = %other, "Skipping non-object source record");
                    None
                }
            })
            .collect();
        debug!(entity = %entity, total, kept = records.len(), "Scanned source export");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_array_and_lines_exports() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("products.json"),
            r#"[{"product_id": "A", "name": "Burger"}, 7, {"product_id": "B"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("users.jsonl"),
            "{\"user_id\": \"u1\"}\n\n{\"user_id\": \"u2\"}\n",
        )
        .unwrap();

        let source = JsonFileSource::new(dir.path().to_path_buf());
        let products = source.scan(EntityKind::Products).await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0]["name"], json!("Burger"));

        let users = source.scan(EntityKind::Users).await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_export_is_a_source_error() {
        let dir = TempDir::new().unwrap();
        let source = JsonFileSource::new(dir.path().to_path_buf());
        let err = source.scan(EntityKind::Orders).await.unwrap_err();
        assert!(matches!(err, RustDwError::Source(_)));

        let gone = JsonFileSource::new(dir.path().join("missing"));
        assert!(gone.scan(EntityKind::Orders).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_export_reports_position() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("orders.jsonl"), "{\"order_id\": 1}\n{oops\n").unwrap();
        let source = JsonFileSource::new(dir.path().to_path_buf());
        let err = source.scan(EntityKind::Orders).await.unwrap_err();
        assert!(err.to_string().contains("orders.jsonl:2"));
    }
}
