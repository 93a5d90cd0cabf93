use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::EntityKind;

/// Config file read by the binaries when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/rustdw.toml";

/// Upper bound on the settle wait; anything longer is a misconfiguration.
pub const MAX_SETTLE_DELAY_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub mapping: MappingConfig,
    pub consumer: ConsumerConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory holding one `<entity>.json` or `<entity>.jsonl` export per entity
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Root directory of the durable local queue
    pub path: PathBuf,
    /// How often an idle receive re-scans the queue directory
    pub poll_interval_ms: u64,
    /// Unacknowledged messages older than this are redelivered
    pub visibility_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the staging and warehouse collections
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Legacy product id → canonical product id table
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Entities to consume when none are given on the command line
    pub entities: Vec<EntityKind>,
    /// Maximum wait for one delivery before re-checking for shutdown
    pub receive_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pause between sequential producers
    pub producer_pause_ms: u64,
    pub launcher: LauncherKind,
    /// Producer executable used by the child-process launcher
    pub producer_binary: PathBuf,
    pub settle: SettleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub strategy: SettleStrategy,
    /// Fixed wait, or the upper bound for the drain strategy
    pub delay_ms: u64,
    /// Queue-depth polling interval for the drain strategy
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStrategy {
    /// Sleep for `delay_ms` unconditionally
    Fixed,
    /// Poll queue depth and stop early once every entity queue is empty
    Drain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    InProcess,
    ChildProcess,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            queue: QueueConfig::default(),
            store: StoreConfig::default(),
            mapping: MappingConfig::default(),
            consumer: ConsumerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/source"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/store"),
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/product_mapping.json"),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/queue"),
            poll_interval_ms: 200,
            visibility_timeout_ms: 60_000,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            entities: EntityKind::ALL.to_vec(),
            receive_timeout_ms: 1_000,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            producer_pause_ms: 1_000,
            launcher: LauncherKind::InProcess,
            producer_binary: PathBuf::from("rustdw-producer"),
            settle: SettleConfig::default(),
        }
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            strategy: SettleStrategy::Fixed,
            delay_ms: 5_000,
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::RustDwError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load and validate the configuration for a binary.
    ///
    /// An explicit path must exist. Without one, the default path is used
    /// when present and built-in defaults otherwise.
    pub fn load(path: Option<&str>) -> crate::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        for (name, path) in [
            ("source.path", &self.source.path),
            ("queue.path", &self.queue.path),
            ("store.path", &self.store.path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(crate::error::RustDwError::InvalidConfig(format!(
                    "{name} cannot be empty"
                )));
            }
        }

        if self.queue.poll_interval_ms == 0 {
            return Err(crate::error::RustDwError::InvalidConfig(
                "queue.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.queue.visibility_timeout_ms == 0 {
            return Err(crate::error::RustDwError::InvalidConfig(
                "queue.visibility_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.consumer.receive_timeout_ms == 0 {
            return Err(crate::error::RustDwError::InvalidConfig(
                "consumer.receive_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.orchestrator.settle.delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(crate::error::RustDwError::InvalidConfig(
                "orchestrator.settle.delay_ms should not exceed one hour".to_string(),
            ));
        }

        if self.orchestrator.settle.strategy == SettleStrategy::Drain
            && self.orchestrator.settle.poll_interval_ms == 0
        {
            return Err(crate::error::RustDwError::InvalidConfig(
                "orchestrator.settle.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.orchestrator.launcher == LauncherKind::ChildProcess
            && self.orchestrator.producer_binary.as_os_str().is_empty()
        {
            return Err(crate::error::RustDwError::InvalidConfig(
                "orchestrator.producer_binary is required for the child_process launcher"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
