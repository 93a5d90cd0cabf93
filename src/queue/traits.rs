use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::Result;

/// A message handed to a consumer; it stays invisible to other consumers
/// until it is acknowledged or negatively acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    /// Provider-specific handle used for ack/nack
    pub delivery_id: String,
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
    /// Set when the message was handed out before and not acknowledged
    pub redelivered: bool,
}

/// Durable named queues with at-least-once delivery.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Create the queue if it does not exist yet.
    async fn declare(&self, queue: &str) -> Result<()>;

    /// Persist one message. Publishing to an undeclared queue declares it.
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()>;

    /// Wait up to `timeout` for the next message.
    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>>;

    /// Remove a delivered message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return a delivered message to the queue for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Messages not yet acknowledged (ready plus in flight).
    async fn depth(&self, queue: &str) -> Result<usize>;
}
