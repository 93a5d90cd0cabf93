pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod panic_handler;
pub mod pipeline;
pub mod queue;
pub mod reporting;
pub mod source;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Result, RustDwError};
