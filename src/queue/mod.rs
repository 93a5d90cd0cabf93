//! Durable named queues between producers and consumers.
//!
//! The broker itself is an external collaborator; [`QueueProvider`] is the
//! contract the pipeline relies on (persistent messages, at-least-once
//! delivery, explicit ack/nack). Two providers ship with the crate:
//!
//! - [`MemoryQueue`]: in-process, for tests and single-process runs
//! - [`LocalQueue`]: directory-backed, survives restarts and can be shared
//!   by separate producer, consumer and orchestrator processes

pub mod local;
pub mod memory;
pub mod traits;

pub use local::LocalQueue;
pub use memory::MemoryQueue;
pub use traits::{Delivery, QueueProvider};
