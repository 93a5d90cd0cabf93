use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;
use crate::pipeline::schema::{EntitySchema, PIPELINE_CURSORS};
use crate::queue::QueueProvider;
use crate::source::traits::{cursor_value, SourceSystem};
use crate::storage::DocumentStore;
use crate::types::{compare_cursor_values, EntityKind, RunMode};
use crate::Result;

/// Outcome of one producer run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractReport {
    pub entity: EntityKind,
    pub requested_mode: RunMode,
    /// Incremental degrades to full when no cursor exists yet
    pub effective_mode: RunMode,
    pub published: usize,
    pub cursor: Option<Value>,
    pub duration: Duration,
}

/// Reads one entity type from the source system and publishes one
/// persistent message per record to the entity queue.
pub struct Producer {
    schema: &'static EntitySchema,
    source: Arc<dyn SourceSystem>,
    queue: Arc<dyn QueueProvider>,
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Producer {
    pub fn new(
        entity: EntityKind,
        source: Arc<dyn SourceSystem>,
        queue: Arc<dyn QueueProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            schema: EntitySchema::for_entity(entity),
            source,
            queue,
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn entity(&self) -> EntityKind {
        self.schema.entity
    }

    /// Cursor persisted by the last successful run, if any.
    pub async fn load_cursor(&self) -> Result<Option<Value>> {
        let stored = self
            .store
            .get(PIPELINE_CURSORS, self.schema.entity.as_str())
            .await?;
        Ok(stored
            .and_then(|mut doc| doc.remove("value"))
            .filter(|value| !value.is_null()))
    }

    async fn save_cursor(&self, value: &Value) -> Result<()> {
        let doc = json!({
            "entity": self.schema.entity.as_str(),
            "field": self.schema.cursor_field,
            "value": value,
            "saved_at": Utc::now().to_rfc3339(),
        });
        if let Value::Object(doc) = doc {
            self.store
                .upsert(PIPELINE_CURSORS, self.schema.entity.as_str(), doc)
                .await?;
        }
        Ok(())
    }

    /// Extract and publish. Any source or queue failure aborts the run and
    /// leaves the cursor untouched.
    pub async fn extract(&self, mode: RunMode) -> Result<ExtractReport> {
        let start = Instant::now();
        let entity = self.schema.entity;
        let cursor_fields = self.schema.cursor_fields();

        self.queue.declare(self.schema.queue).await?;

        let previous = self.load_cursor().await?;
        let (effective_mode, records) = match (mode, &previous) {
            (RunMode::Incremental, Some(cursor)) => {
                debug!(entity = %entity, cursor = %cursor, "Selecting records changed since cursor");
                let records = self
                    .source
                    .changed_since(entity, &cursor_fields, cursor)
                    .await?;
                (RunMode::Incremental, records)
            }
            (RunMode::Incremental, None) => {
                warn!(entity = %entity, "No cursor recorded yet, running a full extract");
                (RunMode::Full, self.source.scan(entity).await?)
            }
            (RunMode::Full, _) => (RunMode::Full, self.source.scan(entity).await?),
        };

        let mut latest: Option<Value> = None;
        for record in &records {
            let payload = serde_json::to_vec(record)?;
            self.queue.publish(self.schema.queue, Bytes::from(payload)).await?;

            if let Some(value) = cursor_value(record, &cursor_fields) {
                let newer = latest
                    .as_ref()
                    .map_or(true, |current| compare_cursor_values(value, current) == Ordering::Greater);
                if newer {
                    latest = Some(value.clone());
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .records_published
                .with_label_values(&[entity.as_str()])
                .inc_by(records.len() as u64);
        }

        // the cursor only moves forward; an empty extract keeps it
        let cursor = match (latest, previous) {
            (Some(latest), Some(previous))
                if compare_cursor_values(&latest, &previous) == Ordering::Less =>
            {
                Some(previous)
            }
            (Some(latest), _) => {
                self.save_cursor(&latest).await?;
                Some(latest)
            }
            (None, previous) => previous,
        };

        let report = ExtractReport {
            entity,
            requested_mode: mode,
            effective_mode,
            published: records.len(),
            cursor,
            duration: start.elapsed(),
        };
        info!(
            entity = %entity,
            mode = %effective_mode,
            published = report.published,
            duration_ms = report.duration.as_millis() as u64,
            "Producer finished"
        );
        Ok(report)
    }
}
