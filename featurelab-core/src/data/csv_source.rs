//! CSV minute-bar exports as a market data source.
//!
//! Layout: `{dir}/{SYMBOL}.csv` with a header row
//! `time,open,high,low,close,tick_volume,spread`. `time` is either epoch
//! seconds or `%Y-%m-%d %H:%M:%S` UTC. An optional `{dir}/symbols.toml` maps
//! symbol → description:
//!
//! ```toml
//! EURUSD = "Euro vs US Dollar"
//! ```

use super::source::{MarketDataSource, SourceError};
use crate::domain::time::parse_timestamp;
use crate::domain::{Bar, SymbolInfo};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct CsvRow {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    tick_volume: u64,
    #[serde(default)]
    spread: f64,
}

#[derive(Debug)]
pub struct CsvSource {
    dir: PathBuf,
    descriptions: BTreeMap<String, String>,
}

impl CsvSource {
    /// Open a directory of exports, reading `symbols.toml` if present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let dir = dir.into();
        let meta_path = dir.join("symbols.toml");
        let descriptions = if meta_path.exists() {
            let text = std::fs::read_to_string(&meta_path).map_err(|source| SourceError::Io {
                path: meta_path.clone(),
                source,
            })?;
            toml::from_str(&text).map_err(|e| SourceError::Malformed {
                path: meta_path.clone(),
                reason: e.to_string(),
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self { dir, descriptions })
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    fn read_bars(&self, path: &Path) -> Result<Vec<Bar>, SourceError> {
        let malformed = |reason: String| SourceError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| malformed(e.to_string()))?;

        let mut bars = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| malformed(format!("row {}: {e}", line + 1)))?;
            let timestamp = parse_time(&row.time)
                .ok_or_else(|| malformed(format!("row {}: bad time '{}'", line + 1, row.time)))?;
            bars.push(Bar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                tick_volume: row.tick_volume,
                spread: row.spread,
            });
        }
        Ok(bars)
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    match raw.parse::<i64>() {
        Ok(secs) => DateTime::from_timestamp(secs, 0),
        Err(_) => parse_timestamp(raw).ok(),
    }
}

impl MarketDataSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError> {
        if !self.path_for(symbol).exists() {
            return Err(SourceError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let description = self
            .descriptions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string());
        Ok(SymbolInfo::new(symbol, description))
    }

    fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            warn!(symbol, path = %path.display(), "no export for symbol");
            return Ok(Vec::new());
        }
        let mut bars = self.read_bars(&path)?;
        bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
        bars.sort_by_key(|b| b.timestamp);
        debug!(symbol, bars = bars.len(), "read csv export");
        Ok(bars)
    }
}
