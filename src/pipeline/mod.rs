//! The staging → transform → load pipeline.
//!
//! One generic [`Producer`] and [`StagingConsumer`] pair is instantiated per
//! entity from the [`EntitySchema`] table. Transform strategies are pure
//! functions over staging data; the [`Orchestrator`] sequences a whole run.

pub mod consumer;
pub mod loader;
pub mod mapping;
pub mod orchestrator;
pub mod producer;
pub mod schema;
pub mod transform;

pub use consumer::{ConsumeStats, Outcome, StagingConsumer};
pub use loader::Loader;
pub use mapping::ProductMapping;
pub use orchestrator::{
    ChildProcessLauncher, InProcessLauncher, LaunchOutput, Orchestrator, ProducerLauncher,
    RunFailure, RunReport, RunState, StepOutcome, StepReport,
};
pub use producer::{ExtractReport, Producer};
pub use schema::EntitySchema;
pub use transform::{TransformContext, TransformOutput};
