//! Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use rustdw::config::{OrchestratorConfig, SettleConfig, SettleStrategy};
use rustdw::pipeline::{ConsumeStats, ProductMapping, StagingConsumer, TransformContext};
use rustdw::queue::QueueProvider;
use rustdw::source::MemorySource;
use rustdw::storage::DocumentStore;
use rustdw::types::{Document, EntityKind};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("fixture must be a JSON object")
}

pub fn users() -> Vec<Document> {
    vec![
        doc(json!({"user_id": "u1", "name": "Ana", "updated_at": "2024-01-01T08:00:00Z"})),
        doc(json!({"user_id": "u2", "name": " Ben ", "updated_at": "2024-01-02T08:00:00Z"})),
        doc(json!({"_id": 3, "name": "Caro", "updated_at": "2024-01-03T08:00:00Z"})),
    ]
}

pub fn products() -> Vec<Document> {
    vec![
        doc(json!({"product_id": "A", "name": "Burger", "price": "8.50", "updated_at": "2024-01-01"})),
        doc(json!({"product_id": "B", "name": "Fries", "price": 3, "updated_at": "2024-01-01"})),
        doc(json!({"id": "C", "name": "Soda", "price": 2, "updated_at": "2024-01-02"})),
    ]
}

pub fn orders() -> Vec<Document> {
    vec![
        doc(json!({"order_id": "O1", "product_id": "A", "user_id": "u1", "quantity": 2, "unit_price": 8.5, "total": 17.0, "status": "paid", "updated_at": "2024-03-01T12:00:00Z"})),
        doc(json!({"order_id": "O1", "product_id": "B", "user_id": "u1", "quantity": 1, "unit_price": 3, "total": 3.0, "status": "paid", "updated_at": "2024-03-01T12:00:00Z"})),
        doc(json!({"order_id": "O2", "product_id": "C", "customer_id": 3, "quantity": 4, "unit_price": 2, "total": 8.0, "status": "paid", "updated_at": "2024-03-02T12:00:00Z"})),
        doc(json!({"order_id": "O3", "product_id": "Z", "user_id": "u2", "quantity": 1, "total": 5.0, "status": "refunded", "updated_at": "2024-03-03T12:00:00Z"})),
        doc(json!({"order_id": "O4", "product_id": "A", "user_id": "u404", "quantity": 1, "total": 8.5, "status": "paid", "updated_at": "2024-03-04T12:00:00Z"})),
    ]
}

pub fn warehouse_imports() -> Vec<Document> {
    vec![
        doc(json!({"import_id": "I1", "product_id": "A", "cost": 10, "date": "2024-01-01", "location": "North"})),
        doc(json!({"import_id": "I2", "product_id": "A", "cost": 20, "date": "2024-02-01", "location": "South"})),
        doc(json!({"import_id": "I3", "product_id": "OLD-B", "cost": "1.5", "date": "2024-01-10", "location": "East"})),
        doc(json!({"import_id": "I4", "product_id": "GHOST", "cost": 9, "date": "2024-01-11"})),
        doc(json!({"import_id": "I5", "product_id": "OLD-Q", "cost": 4, "date": "2024-01-12"})),
    ]
}

pub fn mapping() -> ProductMapping {
    ProductMapping::new(HashMap::from([
        ("OLD-B".to_string(), "B".to_string()),
        ("OLD-Q".to_string(), "Q".to_string()),
    ]))
}

pub fn context() -> TransformContext {
    TransformContext::new(mapping())
}

pub fn seeded_source() -> Arc<MemorySource> {
    let source = MemorySource::new();
    source.extend(EntityKind::Users, users());
    source.extend(EntityKind::Products, products());
    source.extend(EntityKind::Orders, orders());
    source.extend(EntityKind::WarehouseImports, warehouse_imports());
    source
}

/// No producer pause, drain settle bounded to a few seconds.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        producer_pause_ms: 0,
        settle: SettleConfig {
            strategy: SettleStrategy::Drain,
            delay_ms: 5_000,
            poll_interval_ms: 20,
        },
        ..OrchestratorConfig::default()
    }
}

pub struct ConsumerFleet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<rustdw::Result<ConsumeStats>>>,
}

impl ConsumerFleet {
    /// One continuously running consumer per entity, as separate tasks.
    pub fn spawn(queue: Arc<dyn QueueProvider>, store: Arc<dyn DocumentStore>) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handles = EntityKind::ALL
            .into_iter()
            .map(|entity| {
                let consumer = StagingConsumer::new(entity, queue.clone(), store.clone())
                    .with_receive_timeout(Duration::from_millis(50));
                let rx = rx.clone();
                tokio::spawn(async move { consumer.run(rx).await })
            })
            .collect();
        Self { shutdown, handles }
    }

    pub async fn stop(self) -> ConsumeStats {
        self.shutdown.send(true).expect("consumers still listening");
        let mut total = ConsumeStats::default();
        for handle in self.handles {
            total.merge(handle.await.expect("consumer task").expect("consumer run"));
        }
        total
    }
}

/// Current contents of the warehouse collections, in read order.
pub async fn warehouse_snapshot(store: &dyn DocumentStore) -> Vec<(String, Vec<Document>)> {
    let mut snapshot = Vec::new();
    for collection in ["dim_customer", "dim_menu_item", "fact_order_line"] {
        snapshot.push((
            collection.to_string(),
            store.read_all(collection).await.expect("read warehouse"),
        ));
    }
    snapshot
}
