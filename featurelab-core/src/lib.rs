//! FeatureLab Core — domain types, feature registry and math, market data
//! sources, the series store and checkpoints.
//!
//! This crate holds everything a single symbol's incremental ETL step needs:
//! - Domain types (bars, columnar frames, symbol identity)
//! - Feature registry, parameter expansion and the lookback calculation
//! - Feature math and the base/feature pipeline
//! - Market data sources, quality checks and the Parquet series store
//! - The checkpoint file with per-symbol watermarks and the run log

pub mod checkpoint;
pub mod data;
pub mod domain;
pub mod features;
