use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::queue::traits::{Delivery, QueueProvider};
use crate::{error::RustDwError, Result};

#[derive(Debug, Clone)]
struct Envelope {
    id: String,
    payload: Bytes,
    published_at: DateTime<Utc>,
    delivery_count: u32,
}

#[derive(Default)]
struct QueueState {
    ready: Mutex<VecDeque<Envelope>>,
    unacked: Mutex<HashMap<String, Envelope>>,
    notify: Notify,
}

/// In-process queue provider for tests and single-process runs.
///
/// Messages live only as long as the provider; clone the `Arc` to share it
/// between producer and consumer tasks.
#[derive(Default)]
pub struct MemoryQueue {
    queues: DashMap<String, Arc<QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self, queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueState::default()))
            .clone()
    }

    fn existing(&self, queue: &str) -> Result<Arc<QueueState>> {
        self.queues
            .get(queue)
            .map(|state| state.clone())
            .ok_or_else(|| RustDwError::Queue(format!("queue {queue} is not declared")))
    }

    /// Lock order is always `ready` then `unacked`, so `depth` never sees a
    /// message in neither list.
    fn take_ready(state: &QueueState, queue: &str) -> Option<Delivery> {
        let mut ready = state.ready.lock();
        let mut envelope = ready.pop_front()?;
        envelope.delivery_count += 1;
        let delivery = Delivery {
            queue: queue.to_string(),
            delivery_id: envelope.id.clone(),
            payload: envelope.payload.clone(),
            published_at: envelope.published_at,
            redelivered: envelope.delivery_count > 1,
        };
        state.unacked.lock().insert(envelope.id.clone(), envelope);
        Some(delivery)
    }
}

#[async_trait]
impl QueueProvider for MemoryQueue {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.state(queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        let state = self.state(queue);
        state.ready.lock().push_back(Envelope {
            id: Uuid::new_v4().to_string(),
            payload,
            published_at: Utc::now(),
            delivery_count: 0,
        });
        state.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>> {
        let state = self.state(queue);
        let deadline = Instant::now() + timeout;

        loop {
            let notified = state.notify.notified();
            if let Some(delivery) = Self::take_ready(&state, queue) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Self::take_ready(&state, queue));
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let state = self.existing(&delivery.queue)?;
        state.unacked.lock().remove(&delivery.delivery_id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let state = self.existing(&delivery.queue)?;
        let mut ready = state.ready.lock();
        let envelope = state.unacked.lock().remove(&delivery.delivery_id);
        if let Some(envelope) = envelope {
            ready.push_front(envelope);
            state.notify.notify_one();
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<usize> {
        match self.queues.get(queue) {
            Some(state) => {
                let ready = state.ready.lock();
                let unacked = state.unacked.lock();
                Ok(ready.len() + unacked.len())
            }
            None => Ok(0),
        }
    }
}
