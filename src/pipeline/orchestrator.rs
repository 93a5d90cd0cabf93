use async_trait::async_trait;
use futures::future::try_join_all;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::{OrchestratorConfig, SettleStrategy};
use crate::error::RustDwError;
use crate::metrics::PipelineMetrics;
use crate::pipeline::loader::Loader;
use crate::pipeline::producer::Producer;
use crate::pipeline::schema::{
    EntitySchema, STAGING_ORDERS, STAGING_PRODUCTS, STAGING_USERS, STAGING_WAREHOUSE_IMPORTS,
};
use crate::pipeline::transform::{
    customer, key_map, menu_item, order_line, TransformContext, TransformOutput, WarehouseTable,
};
use crate::queue::QueueProvider;
use crate::source::SourceSystem;
use crate::storage::DocumentStore;
use crate::types::{Document, EntityKind, RunMode};
use crate::Result;

/// What a launched producer reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutput {
    pub detail: String,
}

/// Starts one producer run and waits for it to finish.
#[async_trait]
pub trait ProducerLauncher: Send + Sync {
    async fn launch(&self, entity: EntityKind, mode: RunMode) -> Result<LaunchOutput>;
}

/// Runs producers as supervised tasks inside the orchestrator process.
pub struct InProcessLauncher {
    source: Arc<dyn SourceSystem>,
    queue: Arc<dyn QueueProvider>,
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl InProcessLauncher {
    pub fn new(
        source: Arc<dyn SourceSystem>,
        queue: Arc<dyn QueueProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
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
}

#[async_trait]
impl ProducerLauncher for InProcessLauncher {
    async fn launch(&self, entity: EntityKind, mode: RunMode) -> Result<LaunchOutput> {
        let mut producer = Producer::new(
            entity,
            self.source.clone(),
            self.queue.clone(),
            self.store.clone(),
        );
        if let Some(metrics) = &self.metrics {
            producer = producer.with_metrics(metrics.clone());
        }

        let handle = tokio::spawn(async move { producer.extract(mode).await });
        let report = handle
            .await
            .map_err(|e| RustDwError::Launch(format!("producer task for {entity} died: {e}")))??;

        let mut detail = format!("published {} records ({})", report.published, report.effective_mode);
        if report.effective_mode != report.requested_mode {
            detail.push_str(", no cursor yet");
        }
        Ok(LaunchOutput { detail })
    }
}

/// Spawns the producer binary per entity, capturing its exit status and
/// output.
pub struct ChildProcessLauncher {
    binary: PathBuf,
    config_path: Option<PathBuf>,
}

impl ChildProcessLauncher {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            config_path: None,
        }
    }

    /// Forward `--config <path>` to every producer.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    fn command(&self, entity: EntityKind, mode: RunMode) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--entity")
            .arg(entity.as_str())
            .arg("--mode")
            .arg(mode.as_str())
            .kill_on_drop(true);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
    }
}

/// Last non-empty line of captured output.
fn last_line(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ProducerLauncher for ChildProcessLauncher {
    async fn launch(&self, entity: EntityKind, mode: RunMode) -> Result<LaunchOutput> {
        debug!(binary = %self.binary.display(), entity = %entity, mode = %mode, "Spawning producer");
        let output = self.command(entity, mode).output().await.map_err(|e| {
            RustDwError::Launch(format!("cannot start {}: {e}", self.binary.display()))
        })?;

        if !output.status.success() {
            let mut detail = last_line(&output.stderr);
            if detail.is_empty() {
                detail = last_line(&output.stdout);
            }
            return Err(RustDwError::ProducerExit {
                entity: entity.to_string(),
                code: output.status.code(),
                detail,
            });
        }

        Ok(LaunchOutput {
            detail: last_line(&output.stdout),
        })
    }
}

/// Orchestrator states; `Failed` is reachable from every working state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    ExtractAll,
    Settle,
    TransformLoad,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::ExtractAll => "extract_all",
            RunState::Settle => "settle",
            RunState::TransformLoad => "transform_load",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// `extract:<entity>`, `settle`, `transform:<collection>` or `load:<collection>`
    pub name: String,
    pub outcome: StepOutcome,
    pub duration: Duration,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub step: String,
    pub cause: String,
    pub hint: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub mode: RunMode,
    pub state: RunState,
    pub steps: Vec<StepReport>,
    pub elapsed: Duration,
    pub failure: Option<RunFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Step-by-step narrative followed by the final banner.
    pub fn render(&self) -> String {
        let width = self.steps.iter().map(|s| s.name.len()).max().unwrap_or(0);
        let mut out = format!("Pipeline run ({} mode)\n", self.mode);
        for step in &self.steps {
            let marker = match step.outcome {
                StepOutcome::Succeeded => "ok  ",
                StepOutcome::Failed => "FAIL",
            };
            out.push_str(&format!(
                "  [{marker}] {:<width$}  {:>8.2}s  {}\n",
                step.name,
                step.duration.as_secs_f64(),
                step.detail,
            ));
        }

        let rule = "=".repeat(60);
        out.push_str(&rule);
        out.push('\n');
        match &self.failure {
            None => out.push_str(&format!(
                "Pipeline completed successfully in {:.2}s\n",
                self.elapsed.as_secs_f64()
            )),
            Some(failure) => {
                out.push_str(&format!(
                    "Pipeline FAILED at step {} after {:.2}s\n",
                    failure.step,
                    self.elapsed.as_secs_f64()
                ));
                out.push_str(&format!("  Cause: {}\n", failure.cause));
                out.push_str(&format!("  Hint:  {}\n", failure.hint));
            }
        }
        out.push_str(&rule);
        out.push('\n');
        out
    }
}

/// Sequences producers, the settle wait and transform/load into one run.
///
/// Consumers are not started or stopped here; they run on their own and the
/// settle step only gives them time to catch up.
pub struct Orchestrator {
    launcher: Arc<dyn ProducerLauncher>,
    queue: Arc<dyn QueueProvider>,
    store: Arc<dyn DocumentStore>,
    context: TransformContext,
    config: OrchestratorConfig,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn ProducerLauncher>,
        queue: Arc<dyn QueueProvider>,
        store: Arc<dyn DocumentStore>,
        context: TransformContext,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            launcher,
            queue,
            store,
            context,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Drive the state machine to `Done` or `Failed`. Never panics on a step
    /// failure and never rolls back; the report says what happened.
    pub async fn run(&self, mode: RunMode) -> RunReport {
        let started = Instant::now();
        let mut steps = Vec::new();
        let mut state = RunState::ExtractAll;
        let mut failure = None;
        info!(mode = %mode, "Pipeline run started");

        loop {
            let next = match state {
                RunState::ExtractAll => self
                    .extract_all(mode, &mut steps)
                    .await
                    .map(|_| RunState::Settle),
                RunState::Settle => self.settle(&mut steps).await.map(|_| RunState::TransformLoad),
                RunState::TransformLoad => self
                    .transform_load(&mut steps)
                    .await
                    .map(|_| RunState::Done),
                RunState::Done | RunState::Failed => break,
            };

            state = match next {
                Ok(next) => {
                    debug!(from = %state, to = %next, "State transition");
                    next
                }
                Err(e) => {
                    let step = steps
                        .last()
                        .map(|s: &StepReport| s.name.clone())
                        .unwrap_or_else(|| state.to_string());
                    error!(step = %step, error = %e, "Pipeline step failed");
                    failure = Some(RunFailure {
                        step,
                        cause: e.to_string(),
                        hint: e.remediation_hint(),
                    });
                    RunState::Failed
                }
            };
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.run_duration.observe(elapsed.as_secs_f64());
        }
        info!(
            mode = %mode,
            state = %state,
            elapsed_ms = elapsed.as_millis() as u64,
            "Pipeline run finished"
        );

        RunReport {
            mode,
            state,
            steps,
            elapsed,
            failure,
        }
    }

    /// Run `work` as the step `name`, recording its outcome.
    async fn step<T, F, D>(
        steps: &mut Vec<StepReport>,
        name: String,
        work: F,
        describe: D,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        D: FnOnce(&T) -> String,
    {
        info!(step = %name, "Step started");
        let started = Instant::now();
        let result = work.await;
        let duration = started.elapsed();
        let (outcome, detail) = match &result {
            Ok(value) => (StepOutcome::Succeeded, describe(value)),
            Err(e) => (StepOutcome::Failed, e.to_string()),
        };
        info!(step = %name, duration_ms = duration.as_millis() as u64, detail = %detail, "Step finished");
        steps.push(StepReport {
            name,
            outcome,
            duration,
            detail,
        });
        result
    }

    async fn extract_all(&self, mode: RunMode, steps: &mut Vec<StepReport>) -> Result<()> {
        let pause = Duration::from_millis(self.config.producer_pause_ms);
        for (i, entity) in EntityKind::ALL.into_iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            Self::step(
                steps,
                format!("extract:{entity}"),
                self.launcher.launch(entity, mode),
                |output| output.detail.clone(),
            )
            .await?;
        }
        Ok(())
    }

    /// Ready plus unacknowledged messages across every entity queue.
    async fn pending_messages(&self) -> Result<usize> {
        let depths = try_join_all(
            EntityKind::ALL
                .into_iter()
                .map(|entity| self.queue.depth(EntitySchema::for_entity(entity).queue)),
        )
        .await?;
        Ok(depths.into_iter().sum())
    }

    /// Wait for consumers per the configured strategy; the detail says how
    /// the wait ended.
    async fn settle_wait(&self) -> Result<String> {
        let settle = &self.config.settle;
        let limit = Duration::from_millis(settle.delay_ms);

        match settle.strategy {
            SettleStrategy::Fixed => {
                tokio::time::sleep(limit).await;
                Ok(format!("fixed wait of {}ms", settle.delay_ms))
            }
            SettleStrategy::Drain => {
                let started = Instant::now();
                let poll = Duration::from_millis(settle.poll_interval_ms.max(1));
                loop {
                    let pending = self.pending_messages().await?;
                    let waited = started.elapsed();
                    if pending == 0 {
                        return Ok(format!("queues drained after {}ms", waited.as_millis()));
                    }
                    if waited >= limit {
                        warn!(pending, "Settle limit reached with messages still queued");
                        return Ok(format!(
                            "gave up after {}ms with {pending} messages pending",
                            waited.as_millis()
                        ));
                    }
                    tokio::time::sleep(poll.min(limit - waited)).await;
                }
            }
        }
    }

    async fn settle(&self, steps: &mut Vec<StepReport>) -> Result<()> {
        Self::step(steps, "settle".to_string(), self.settle_wait(), |detail: &String| {
            detail.clone()
        })
        .await?;
        Ok(())
    }

    async fn read_collection(&self, step: &str, collection: &str) -> Result<Vec<Document>> {
        self.store
            .read_all(collection)
            .await
            .map_err(|e| RustDwError::Transform {
                step: step.to_string(),
                message: format!("reading {collection}: {e}"),
            })
    }

    async fn load_output(
        &self,
        steps: &mut Vec<StepReport>,
        loader: &Loader,
        table: &WarehouseTable,
        output: &TransformOutput,
    ) -> Result<()> {
        let work = async {
            let rows = loader.load(table, &output.documents).await?;
            let errors = loader.record_errors(&output.errors).await?;
            Ok::<_, RustDwError>((rows, errors))
        };
        Self::step(
            steps,
            format!("load:{}", table.collection),
            work,
            |(rows, errors): &(usize, usize)| {
                if *errors > 0 {
                    format!("{rows} rows upserted, {errors} error records")
                } else {
                    format!("{rows} rows upserted")
                }
            },
        )
        .await?;
        Ok(())
    }

    async fn transform_load(&self, steps: &mut Vec<StepReport>) -> Result<()> {
        let mut loader = Loader::new(self.store.clone());
        if let Some(metrics) = &self.metrics {
            loader = loader.with_metrics(metrics.clone());
        }
        let describe = |output: &TransformOutput| {
            if output.errors.is_empty() {
                format!("{} documents", output.documents.len())
            } else {
                format!(
                    "{} documents, {} unmatched inputs",
                    output.documents.len(),
                    output.errors.len()
                )
            }
        };

        // dimensions first: the fact step resolves keys from what they loaded
        let name = format!("transform:{}", customer::TABLE.collection);
        let work = async {
            let users = self.read_collection(&name, STAGING_USERS).await?;
            Ok::<_, RustDwError>(customer::transform(&users, &self.context))
        };
        let customers = Self::step(steps, name.clone(), work, describe).await?;
        self.load_output(steps, &loader, &customer::TABLE, &customers).await?;

        let name = format!("transform:{}", menu_item::TABLE.collection);
        let work = async {
            let products = self.read_collection(&name, STAGING_PRODUCTS).await?;
            let imports = self.read_collection(&name, STAGING_WAREHOUSE_IMPORTS).await?;
            Ok::<_, RustDwError>(menu_item::transform(&products, &imports, &self.context))
        };
        let menu_items = Self::step(steps, name.clone(), work, describe).await?;
        self.load_output(steps, &loader, &menu_item::TABLE, &menu_items).await?;

        let name = format!("transform:{}", order_line::TABLE.collection);
        let work = async {
            let customer_rows = self.read_collection(&name, customer::TABLE.collection).await?;
            let menu_item_rows = self.read_collection(&name, menu_item::TABLE.collection).await?;
            let customer_keys = key_map(&customer_rows, "user_id", customer::SURROGATE_FIELD);
            let menu_item_keys = key_map(&menu_item_rows, "product_id", menu_item::SURROGATE_FIELD);
            let orders = self.read_collection(&name, STAGING_ORDERS).await?;
            Ok::<_, RustDwError>(order_line::transform(&orders, &customer_keys, &menu_item_keys))
        };
        let facts = Self::step(steps, name.clone(), work, describe).await?;
        self.load_output(steps, &loader, &order_line::TABLE, &facts).await?;

        Ok(())
    }
}
