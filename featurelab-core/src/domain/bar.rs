//! Bar — one minute of OHLCV data for a single symbol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minute-resolution OHLCV bar with the broker-reported spread.
///
/// `timestamp` is the open of the minute, UTC. Within one symbol's series it
/// is the unique key once quality checks have run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: u64,
    pub spread: f64,
}

/// Identity metadata reported by a market-data source for a symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub description: String,
}

impl SymbolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}
