//! ETL configuration loaded from TOML.
//!
//! ```toml
//! [etl]
//! metadata_path = "TimeSeriesDB/metadata.json"
//! store_root = "TimeSeriesDB"
//! feature_config = "features.json"
//! earliest_start = "2024-09-01 00:00:00"
//! workers = 4
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 2000
//! backoff_factor = 2.0
//!
//! [source]
//! kind = "csv"
//! dir = "exports"
//! ```
//!
//! Every field is optional. Relative paths in a file are resolved against
//! the file's directory.

use chrono::{DateTime, TimeZone, Utc};
use featurelab_core::data::{
    CsvSource, MarketDataSource, Session, SourceError, SyntheticSource, YahooSource,
};
use featurelab_core::domain::time::serde_timestamp;
use featurelab_core::features::FeatureConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Features(#[from] featurelab_core::features::ConfigError),

    #[error("cannot open data source: {0}")]
    Source(#[from] SourceError),
}

// ── Sections ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtlSection {
    /// Checkpoint file.
    pub metadata_path: PathBuf,
    /// Root directory of the series store.
    pub store_root: PathBuf,
    /// Feature configuration JSON. Absent: every registered kind with its
    /// defaults.
    pub feature_config: Option<PathBuf>,
    /// No data before this instant is ever fetched.
    #[serde(with = "serde_timestamp")]
    pub earliest_start: DateTime<Utc>,
    pub workers: usize,
}

impl Default for EtlSection {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("TimeSeriesDB/metadata.json"),
            store_root: PathBuf::from("TimeSeriesDB"),
            feature_config: None,
            earliest_start: Utc
                .with_ymd_and_hms(2024, 9, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            backoff_factor: 2.0,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.backoff_factor,
        )
    }
}

/// Where minute bars come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Csv {
        dir: PathBuf,
    },
    Yahoo {
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    #[default]
    Synthetic,
}

fn default_timeout_secs() -> u64 {
    30
}

impl SourceConfig {
    pub fn build(&self) -> Result<Arc<dyn MarketDataSource>, ConfigError> {
        Ok(match self {
            SourceConfig::Csv { dir } => Arc::new(CsvSource::open(dir)?),
            SourceConfig::Yahoo { timeout_secs } => Arc::new(YahooSource::new(Arc::new(
                Session::new(Duration::from_secs(*timeout_secs)),
            ))),
            SourceConfig::Synthetic => Arc::new(SyntheticSource::new()),
        })
    }
}

// ── Top level ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtlConfig {
    pub etl: EtlSection,
    pub retry: RetrySection,
    pub source: SourceConfig,
}

impl EtlConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.etl.workers == 0 {
            return Err(ConfigError::Invalid("etl.workers must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_factor must be a finite number >= 1, got {}",
                self.retry.backoff_factor
            )));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.etl.metadata_path);
        resolve(&mut self.etl.store_root);
        if let Some(p) = self.etl.feature_config.as_mut() {
            resolve(p);
        }
        if let SourceConfig::Csv { dir } = &mut self.source {
            resolve(dir);
        }
    }

    /// The feature configuration document, or the empty one (every kind with
    /// defaults) when none is configured.
    pub fn load_features(&self) -> Result<FeatureConfig, ConfigError> {
        match &self.etl.feature_config {
            Some(path) => Ok(FeatureConfig::from_file(path)?),
            None => Ok(FeatureConfig::default()),
        }
    }
}
