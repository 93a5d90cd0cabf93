use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::metrics::PipelineMetrics;
use crate::pipeline::schema::{EntitySchema, PIPELINE_ERRORS};
use crate::queue::{Delivery, QueueProvider};
use crate::storage::DocumentStore;
use crate::types::{field_key, EntityKind, ErrorRecord};
use crate::Result;

/// Counters for one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub received: u64,
    pub staged: u64,
    pub rejected: u64,
}

impl ConsumeStats {
    pub fn merge(&mut self, other: ConsumeStats) {
        self.received += other.received;
        self.staged += other.staged;
        self.rejected += other.rejected;
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Upserted into staging under this key
    Staged(String),
    /// Written to the error store with this reason
    Rejected(String),
}

/// Drains one entity queue into its staging collection.
///
/// Malformed records go to the error store and are acknowledged so they
/// never block the queue. A failed store write is a connectivity failure:
/// the message is returned to the queue and the consumer stops.
pub struct StagingConsumer {
    schema: &'static EntitySchema,
    queue: Arc<dyn QueueProvider>,
    store: Arc<dyn DocumentStore>,
    receive_timeout: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl StagingConsumer {
    pub fn new(
        entity: EntityKind,
        queue: Arc<dyn QueueProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            schema: EntitySchema::for_entity(entity),
            queue,
            store,
            receive_timeout: Duration::from_secs(1),
            metrics: None,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn entity(&self) -> EntityKind {
        self.schema.entity
    }

    fn stage(&self) -> String {
        format!("consumer:{}", self.schema.entity)
    }

    /// Normalize, validate and stage one delivery without acknowledging it.
    pub async fn process(&self, delivery: &Delivery) -> Result<Outcome> {
        let parsed = serde_json::from_slice::<Value>(&delivery.payload);
        let record = match parsed {
            Ok(Value::Object(record)) => record,
            Ok(other) => {
                return self
                    .reject("payload is not a JSON object", None, other)
                    .await
            }
            Err(e) => {
                let raw = String::from_utf8_lossy(&delivery.payload).into_owned();
                return self
                    .reject(&format!("payload is not valid JSON: {e}"), None, Value::String(raw))
                    .await;
            }
        };

        let record = self.schema.normalize(record);
        let key = match self.schema.staging_key(&record) {
            Ok(key) => key,
            Err(reason) => {
                let identifier = self
                    .schema
                    .key_fields
                    .iter()
                    .find_map(|field| field_key(&record, field));
                return self.reject(&reason, identifier, Value::Object(record)).await;
            }
        };

        self.store.upsert(self.schema.collection, &key, record).await?;
        if let Some(metrics) = &self.metrics {
            metrics
                .records_staged
                .with_label_values(&[self.schema.entity.as_str()])
                .inc();
        }
        debug!(entity = %self.schema.entity, key = %key, "Staged record");
        Ok(Outcome::Staged(key))
    }

    async fn reject(
        &self,
        reason: &str,
        identifier: Option<String>,
        payload: Value,
    ) -> Result<Outcome> {
        let stage = self.stage();
        let mut record =
            ErrorRecord::new(stage.as_str(), reason, payload).with_entity(self.schema.entity);
        if let Some(identifier) = identifier {
            record = record.with_identifier(identifier);
        }
        self.store.append(PIPELINE_ERRORS, record.to_document()?).await?;
        if let Some(metrics) = &self.metrics {
            metrics.records_rejected.with_label_values(&[stage.as_str()]).inc();
        }
        warn!(entity = %self.schema.entity, reason, "Record diverted to error store");
        Ok(Outcome::Rejected(reason.to_string()))
    }

    /// Process and settle one delivery: ack on success or rejection, nack
    /// and propagate on a store failure.
    async fn handle(&self, delivery: Delivery, stats: &mut ConsumeStats) -> Result<()> {
        stats.received += 1;
        match self.process(&delivery).await {
            Ok(outcome) => {
                self.queue.ack(&delivery).await?;
                match outcome {
                    Outcome::Staged(_) => stats.staged += 1,
                    Outcome::Rejected(_) => stats.rejected += 1,
                }
                Ok(())
            }
            Err(e) => {
                error!(entity = %self.schema.entity, error = %e, "Store write failed, returning message to queue");
                if let Err(nack_err) = self.queue.nack(&delivery).await {
                    error!(entity = %self.schema.entity, error = %nack_err, "Failed to nack message");
                }
                Err(e)
            }
        }
    }

    /// Consume until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumeStats> {
        let mut stats = ConsumeStats::default();
        self.queue.declare(self.schema.queue).await?;
        info!(entity = %self.schema.entity, queue = self.schema.queue, "Consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = self.queue.receive(self.schema.queue, self.receive_timeout) => {
                    if let Some(delivery) = received? {
                        self.handle(delivery, &mut stats).await?;
                    }
                }
            }
        }

        info!(
            entity = %self.schema.entity,
            received = stats.received,
            staged = stats.staged,
            rejected = stats.rejected,
            "Consumer stopped"
        );
        Ok(stats)
    }

    /// Consume until one receive times out with nothing delivered.
    pub async fn drain(&self) -> Result<ConsumeStats> {
        let mut stats = ConsumeStats::default();
        self.queue.declare(self.schema.queue).await?;
        while let Some(delivery) = self
            .queue
            .receive(self.schema.queue, self.receive_timeout)
            .await?
        {
            self.handle(delivery, &mut stats).await?;
        }
        info!(
            entity = %self.schema.entity,
            received = stats.received,
            staged = stats.staged,
            rejected = stats.rejected,
            "Queue drained"
        );
        Ok(stats)
    }
}
