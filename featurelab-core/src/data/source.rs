//! Market data source trait and structured error types.
//!
//! The `MarketDataSource` trait abstracts over where minute bars come from
//! (Yahoo Finance, CSV exports, synthetic data) so the processor can swap
//! implementations and tests can script one.

use crate::domain::{Bar, SymbolInfo};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Structured errors from a market data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed data in {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("data source error: {0}")]
    Other(String),
}

impl SourceError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::NetworkUnreachable(_)
                | SourceError::RateLimited { .. }
                | SourceError::Io { .. }
                | SourceError::Other(_)
        )
    }
}

/// A provider of minute bars and symbol identity.
///
/// Implementations must tolerate concurrent `fetch` calls from several
/// worker threads.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Identity of a symbol. Unknown symbols fail with
    /// [`SourceError::SymbolNotFound`].
    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, SourceError>;

    /// Minute bars with `start <= timestamp <= end`, ascending. An unknown
    /// symbol or a source that cannot be reached yields an empty vector.
    fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError>;
}
