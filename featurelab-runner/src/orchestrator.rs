//! Fan-out of symbol processing across a worker pool.
//!
//! Each symbol is one task on a dedicated rayon pool. Results come back over
//! a channel and are handled on the calling thread in completion order; that
//! thread is the only writer of the checkpoint file, so every persisted
//! result is committed and saved before the next one is looked at.

use chrono::{DateTime, Utc};
use featurelab_core::checkpoint::{CheckpointError, CheckpointStore, RunRecord};
use featurelab_core::data::{SourceError, StoreError, StoreHandle};
use featurelab_core::features::{panic_message, FeatureEngine, FeatureRegistry};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigError, EtlConfig};
use crate::processor::{ProcessError, SymbolProcessor, SymbolReport};

/// Library holding per-symbol feature frames.
pub const SYMBOL_LIBRARY: &str = "symbol_specific";

#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// What [`Orchestrator::add_symbols`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub added: Vec<String>,
    pub already_registered: Vec<String>,
    pub not_found: Vec<String>,
    pub failed: Vec<String>,
}

/// One run: the appended record plus every symbol's report in completion
/// order.
#[derive(Debug)]
pub struct RunReport {
    pub record: RunRecord,
    pub reports: Vec<SymbolReport>,
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn processed(&self) -> &[String] {
        &self.record.processed_symbols
    }

    pub fn failed(&self) -> impl Iterator<Item = &SymbolReport> {
        self.reports.iter().filter(|r| r.is_failed())
    }

    pub fn report(&self, symbol: &str) -> Option<&SymbolReport> {
        self.reports.iter().find(|r| r.symbol == symbol)
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    processor: SymbolProcessor,
    checkpoints: CheckpointStore,
    workers: usize,
}

impl Orchestrator {
    pub fn new(processor: SymbolProcessor, checkpoints: CheckpointStore, workers: usize) -> Self {
        Self {
            processor,
            checkpoints,
            workers: workers.max(1),
        }
    }

    /// Wire up source, store, feature engine and checkpoint file from a
    /// validated configuration.
    pub fn from_config(config: &EtlConfig) -> Result<Self, EtlError> {
        let features = config.load_features()?;
        let engine = Arc::new(FeatureEngine::new(FeatureRegistry::builtin(), &features));
        let source = config.source.build()?;
        let store = StoreHandle::open(&config.etl.store_root)?.library(SYMBOL_LIBRARY);
        let checkpoints = CheckpointStore::load(&config.etl.metadata_path)?;
        let processor = SymbolProcessor::new(
            source,
            Arc::new(store),
            engine,
            config.retry.policy(),
            config.etl.earliest_start,
        );
        Ok(Self::new(processor, checkpoints, config.etl.workers))
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn processor(&self) -> &SymbolProcessor {
        &self.processor
    }

    pub fn engine(&self) -> &FeatureEngine {
        self.processor.engine()
    }

    /// Register symbols not yet in the checkpoint file, looking up their
    /// identity at the source. Saves once at the end.
    pub fn add_symbols<S: AsRef<str>>(&mut self, symbols: &[S]) -> Result<AddSummary, EtlError> {
        let mut summary = AddSummary::default();
        for symbol in symbols.iter().map(AsRef::as_ref) {
            if self.checkpoints.is_registered(symbol) {
                summary.already_registered.push(symbol.to_string());
                continue;
            }
            match self.processor.source().symbol_info(symbol) {
                Ok(info) => {
                    info!(symbol, description = %info.description, "symbol registered");
                    self.checkpoints.register(&info);
                    summary.added.push(symbol.to_string());
                }
                Err(SourceError::SymbolNotFound { .. }) => {
                    warn!(symbol, "symbol not found at source, skipping");
                    summary.not_found.push(symbol.to_string());
                }
                Err(e) => {
                    error!(symbol, error = %e, "symbol lookup failed, skipping");
                    summary.failed.push(symbol.to_string());
                }
            }
        }
        self.checkpoints.save()?;
        Ok(summary)
    }

    /// One ETL pass over `symbols` up to `end`. Unregistered symbols are
    /// skipped. Always appends a completed run record.
    pub fn run<S: AsRef<str>>(
        &mut self,
        symbols: &[S],
        end: DateTime<Utc>,
    ) -> Result<RunReport, EtlError> {
        let started = Instant::now();
        let mut jobs = Vec::new();
        let mut skipped = Vec::new();
        for symbol in symbols.iter().map(AsRef::as_ref) {
            if self.checkpoints.is_registered(symbol) {
                jobs.push((symbol.to_string(), self.checkpoints.last_timestamp(symbol)));
            } else {
                warn!(symbol, "symbol not registered, skipping");
                skipped.push(symbol.to_string());
            }
        }
        info!(symbols = jobs.len(), workers = self.workers, %end, "etl run started");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("featurelab-worker-{i}"))
            .build()
            .map_err(|e| EtlError::Pool(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        for (symbol, last) in jobs {
            let tx = tx.clone();
            let processor = self.processor.clone();
            pool.spawn(move || {
                let report = panic::catch_unwind(AssertUnwindSafe(|| {
                    processor.process(&symbol, last, end)
                }))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    error!(symbol = %symbol, panic = %message, "symbol task panicked");
                    SymbolReport {
                        symbol: symbol.clone(),
                        attempts: 1,
                        result: Err(ProcessError::Panicked(message)),
                    }
                });
                // The receiver only goes away if the run itself is abandoned.
                let _ = tx.send(report);
            });
        }
        drop(tx);

        let mut processed = Vec::new();
        let mut reports = Vec::new();
        for report in rx {
            if let Some(last) = report.persisted() {
                self.checkpoints.advance(&report.symbol, last);
                if let Err(e) = self.checkpoints.save() {
                    error!(symbol = %report.symbol, error = %e, "checkpoint save failed");
                }
                processed.push(report.symbol.clone());
            }
            reports.push(report);
        }

        let record = RunRecord::completed(end, processed);
        self.checkpoints.append_run(record.clone());
        self.checkpoints.save()?;

        let failed = reports.iter().filter(|r| r.is_failed()).count();
        info!(
            processed = record.processed_symbols.len(),
            failed,
            skipped = skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "etl run completed"
        );
        Ok(RunReport {
            record,
            reports,
            skipped,
        })
    }
}
