//! FeatureLab Runner — incremental ETL over a symbol universe.
//!
//! This crate builds on `featurelab-core` to provide:
//! - TOML configuration for paths, retry policy and the data source
//! - Bounded retry with exponential backoff
//! - The per-symbol processor state machine
//! - The orchestrator that fans symbols out over a worker pool and owns the
//!   checkpoint file

pub mod config;
pub mod orchestrator;
pub mod processor;
pub mod retry;

pub use config::{ConfigError, EtlConfig, EtlSection, RetrySection, SourceConfig};
pub use orchestrator::{AddSummary, EtlError, Orchestrator, RunReport, SYMBOL_LIBRARY};
pub use processor::{
    determine_window, FetchWindow, Outcome, ProcessError, ProcessState, SymbolProcessor,
    SymbolReport,
};
pub use retry::RetryPolicy;
