use std::sync::Arc;
use tracing::{debug, info};

use crate::error::RustDwError;
use crate::metrics::PipelineMetrics;
use crate::pipeline::schema::{KEY_SEPARATOR, PIPELINE_ERRORS};
use crate::pipeline::transform::WarehouseTable;
use crate::storage::DocumentStore;
use crate::types::{field_key, Document, ErrorRecord};
use crate::Result;

/// Persists transform output into warehouse collections.
pub struct Loader {
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Loader {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn natural_key(table: &WarehouseTable, document: &Document) -> Result<String> {
        let mut parts = Vec::with_capacity(table.key_fields.len());
        for field in table.key_fields {
            let part = field_key(document, field).ok_or_else(|| RustDwError::Load {
                collection: table.collection.to_string(),
                message: format!("document without {field}"),
            })?;
            parts.push(part);
        }
        Ok(parts.join(KEY_SEPARATOR))
    }

    /// Upsert every document by its natural key. Stops at the first failure;
    /// rows written before it stay written.
    pub async fn load(&self, table: &WarehouseTable, documents: &[Document]) -> Result<usize> {
        for document in documents {
            let key = Self::natural_key(table, document)?;
            self.store
                .upsert(table.collection, &key, document.clone())
                .await
                .map_err(|e| RustDwError::Load {
                    collection: table.collection.to_string(),
                    message: e.to_string(),
                })?;
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .rows_loaded
                .with_label_values(&[table.collection])
                .inc_by(documents.len() as u64);
        }
        info!(collection = table.collection, rows = documents.len(), "Loaded warehouse rows");
        Ok(documents.len())
    }

    /// Write transform-time error records to the error store. Keyed records
    /// are upserted so reruns do not duplicate them; the rest are appended.
    pub async fn record_errors(&self, errors: &[ErrorRecord]) -> Result<usize> {
        for error in errors {
            let document = error.to_document()?;
            let written = match &error.key {
                Some(key) => self.store.upsert(PIPELINE_ERRORS, key, document).await,
                None => self.store.append(PIPELINE_ERRORS, document).await.map(|_| ()),
            };
            written.map_err(|e| RustDwError::Load {
                collection: PIPELINE_ERRORS.to_string(),
                message: e.to_string(),
            })?;
            if let Some(metrics) = &self.metrics {
                metrics.records_rejected.with_label_values(&[error.stage.as_str()]).inc();
            }
        }
        if !errors.is_empty() {
            debug!(count = errors.len(), "Recorded transform errors");
        }
        Ok(errors.len())
    }
}
