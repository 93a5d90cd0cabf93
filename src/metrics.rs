use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct PipelineMetrics {
    pub records_published: IntCounterVec,
    pub records_staged: IntCounterVec,
    pub records_rejected: IntCounterVec,
    pub rows_loaded: IntCounterVec,
    pub run_duration: Histogram,
    pub registry: Registry,
}

impl PipelineMetrics {
    pub fn new() -> crate::Result<Arc<Self>> {
        let registry = Registry::new();

        let records_published = IntCounterVec::new(
            Opts::new("rustdw_records_published_total", "Source records published to entity queues"),
            &["entity"],
        )?;

        let records_staged = IntCounterVec::new(
            Opts::new("rustdw_records_staged_total", "Records upserted into staging"),
            &["entity"],
        )?;

        let records_rejected = IntCounterVec::new(
            Opts::new("rustdw_records_rejected_total", "Records diverted to the error store"),
            &["stage"],
        )?;

        let rows_loaded = IntCounterVec::new(
            Opts::new("rustdw_rows_loaded_total", "Warehouse rows upserted"),
            &["collection"],
        )?;

        let run_duration = Histogram::with_opts(
            HistogramOpts::new("rustdw_run_duration_seconds", "Orchestrator run wall-clock time")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;

        registry.register(Box::new(records_published.clone()))?;
        registry.register(Box::new(records_staged.clone()))?;
        registry.register(Box::new(records_rejected.clone()))?;
        registry.register(Box::new(rows_loaded.clone()))?;
        registry.register(Box::new(run_duration.clone()))?;

        Ok(Arc::new(Self {
            records_published,
            records_staged,
            records_rejected,
            rows_loaded,
            run_duration,
            registry,
        }))
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather_text(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::RustDwError::Storage(format!("metrics encoding: {e}")))
    }
}
