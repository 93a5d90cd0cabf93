use thiserror::Error;

pub type Result<T> = std::result::Result<T, RustDwError>;

#[derive(Error, Debug)]
pub enum RustDwError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transform {step} failed: {message}")]
    Transform { step: String, message: String },

    #[error("Load into {collection} failed: {message}")]
    Load { collection: String, message: String },

    #[error("Producer for {entity} exited with status {code:?}: {detail}")]
    ProducerExit {
        entity: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("Process launch error: {0}")]
    Launch(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}

impl RustDwError {
    /// Operator-facing hint printed next to a failed step.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            RustDwError::Queue(_) => {
                "check that the message broker is reachable and the queue directory is writable"
            }
            RustDwError::Source(_) => {
                "check that the source system is reachable and exports every entity"
            }
            RustDwError::Storage(_) | RustDwError::Io(_) => {
                "check that the staging/warehouse store is reachable and has free space"
            }
            RustDwError::Config(_) | RustDwError::InvalidConfig(_) => {
                "fix the configuration file and re-run"
            }
            RustDwError::ProducerExit { .. } | RustDwError::Launch(_) => {
                "inspect the producer output above and check broker/source connectivity"
            }
            RustDwError::Transform { .. } | RustDwError::Load { .. } => {
                "check that the consumer processes are running and staging data is well formed"
            }
            RustDwError::Serialization(_) => "inspect the offending document in the error store",
            RustDwError::UnknownEntity(_) => {
                "use one of: users, products, orders, warehouse_imports"
            }
            RustDwError::Metrics(_) => "metrics registration failed; this is a bug",
        }
    }
}
