//! Durable per-symbol progress and the append-only run log.
//!
//! The checkpoint file is JSON:
//!
//! ```json
//! {
//!   "symbols": {
//!     "EURUSD": {
//!       "name": "EURUSD",
//!       "description": "Euro vs US Dollar",
//!       "last_timestamp": "2024-09-02 10:15:00"
//!     }
//!   },
//!   "etl_runs": [
//!     {
//!       "timestamp": "2024-09-02 10:16:03",
//!       "processed_symbols": ["EURUSD"],
//!       "status": "Completed"
//!     }
//!   ]
//! }
//! ```
//!
//! A single owner mutates it; workers never write it. Saves are atomic
//! (write `.tmp`, rename into place).

use crate::domain::time::{serde_timestamp, serde_timestamp_opt};
use crate::domain::SymbolInfo;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCheckpoint {
    pub name: String,
    pub description: String,
    #[serde(with = "serde_timestamp_opt", default)]
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(with = "serde_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub processed_symbols: Vec<String>,
    pub status: RunStatus,
}

impl RunRecord {
    pub fn completed(timestamp: DateTime<Utc>, processed_symbols: Vec<String>) -> Self {
        Self {
            timestamp,
            processed_symbols,
            status: RunStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub symbols: IndexMap<String, SymbolCheckpoint>,
    #[serde(default)]
    pub etl_runs: Vec<RunRecord>,
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    metadata: Metadata,
}

impl CheckpointStore {
    /// Load the checkpoint file.
    ///
    /// A missing file bootstraps empty state and saves it immediately. An
    /// unparsable file is set aside as `{file}.quarantined` and bootstrapped
    /// the same way.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let metadata = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Metadata>(&content) {
                Ok(metadata) => {
                    debug!(
                        path = %path.display(),
                        symbols = metadata.symbols.len(),
                        runs = metadata.etl_runs.len(),
                        "checkpoint loaded"
                    );
                    return Ok(Self { path, metadata });
                }
                Err(e) => {
                    let mut target = path.as_os_str().to_owned();
                    target.push(".quarantined");
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "checkpoint file unparsable, quarantining and starting fresh"
                    );
                    fs::rename(&path, &target).map_err(|source| CheckpointError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    Metadata::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no checkpoint file, initializing");
                Metadata::default()
            }
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let store = Self { path, metadata };
        store.save()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_registered(&self, symbol: &str) -> bool {
        self.metadata.symbols.contains_key(symbol)
    }

    /// Registered symbols in registration order.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, &SymbolCheckpoint)> {
        self.metadata.symbols.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Register a symbol with no progress. Returns `false` if it was already
    /// registered, in which case nothing changes.
    pub fn register(&mut self, info: &SymbolInfo) -> bool {
        if self.is_registered(&info.name) {
            return false;
        }
        self.metadata.symbols.insert(
            info.name.clone(),
            SymbolCheckpoint {
                name: info.name.clone(),
                description: info.description.clone(),
                last_timestamp: None,
            },
        );
        true
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.metadata
            .symbols
            .get(symbol)
            .and_then(|c| c.last_timestamp)
    }

    /// Move a symbol's watermark forward. Unregistered symbols and
    /// timestamps at or before the current watermark are ignored; returns
    /// whether the watermark moved.
    pub fn advance(&mut self, symbol: &str, ts: DateTime<Utc>) -> bool {
        let Some(checkpoint) = self.metadata.symbols.get_mut(symbol) else {
            warn!(symbol, "advance on unregistered symbol ignored");
            return false;
        };
        match checkpoint.last_timestamp {
            Some(last) if last >= ts => {
                debug!(symbol, %last, requested = %ts, "checkpoint not moved backward");
                false
            }
            _ => {
                checkpoint.last_timestamp = Some(ts);
                true
            }
        }
    }

    pub fn append_run(&mut self, record: RunRecord) {
        self.metadata.etl_runs.push(record);
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.metadata.etl_runs
    }

    /// Write the whole file atomically, pretty-printed.
    pub fn save(&self) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(&self.metadata)?;
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}
