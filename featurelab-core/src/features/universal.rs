//! Cross-symbol features computed over a panel of aligned frames.

use super::math;
use super::params::{ParamSet, Params};
use super::{FeatureError, FeatureOutput};
use crate::domain::Frame;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// Several symbols' frames reindexed onto one shared, sorted timeline.
/// Rows a symbol has no bar for are NaN.
#[derive(Debug, Clone, Default)]
pub struct Panel {
    timestamps: Vec<DateTime<Utc>>,
    frames: IndexMap<String, Frame>,
}

impl Panel {
    /// Align frames on the union of their timestamps.
    pub fn align(frames: &IndexMap<String, Frame>) -> Self {
        let timeline: BTreeSet<DateTime<Utc>> = frames
            .values()
            .flat_map(|f| f.timestamps().iter().copied())
            .collect();
        let timestamps: Vec<DateTime<Utc>> = timeline.into_iter().collect();
        let frames = frames
            .iter()
            .map(|(symbol, frame)| (symbol.clone(), frame.reindex(&timestamps)))
            .collect();
        Self { timestamps, frames }
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.frames.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// One symbol's column on the shared timeline, if both exist.
    pub fn column(&self, symbol: &str, column: &str) -> Option<&[f64]> {
        self.frames.get(symbol)?.column(column)
    }

    /// The named column for every symbol that has it, in symbol order.
    fn columns<'a>(&'a self, column: &'a str) -> impl Iterator<Item = (&'a str, &'a [f64])> {
        self.frames
            .iter()
            .filter_map(move |(s, f)| f.column(column).map(|c| (s.as_str(), c)))
    }
}

/// A feature computed from all symbols at once.
pub trait UniversalFeature: Send + Sync {
    fn name(&self) -> &str;

    fn warmup(&self) -> usize;

    fn compute(&self, panel: &Panel) -> Result<FeatureOutput, FeatureError>;
}

fn cross_section(
    panel: &Panel,
    column: &str,
    reduce: impl Fn(Vec<f64>) -> f64,
) -> Vec<f64> {
    let series: Vec<&[f64]> = panel.columns(column).map(|(_, c)| c).collect();
    (0..panel.len())
        .map(|i| reduce(series.iter().map(|c| c[i]).collect()))
        .collect()
}

/// Mean close across symbols at each timestamp.
#[derive(Debug, Clone, Default)]
pub struct AverageCloseAllSymbols;

impl UniversalFeature for AverageCloseAllSymbols {
    fn name(&self) -> &str {
        "Average_Close_All_Symbols"
    }

    fn warmup(&self) -> usize {
        0
    }

    fn compute(&self, panel: &Panel) -> Result<FeatureOutput, FeatureError> {
        Ok(FeatureOutput::Single(cross_section(panel, "close", |v| math::nan_mean(v))))
    }
}

/// Median tick volume across symbols at each timestamp.
#[derive(Debug, Clone, Default)]
pub struct MedianVolumeAllSymbols;

impl UniversalFeature for MedianVolumeAllSymbols {
    fn name(&self) -> &str {
        "Median_Volume_All_Symbols"
    }

    fn warmup(&self) -> usize {
        0
    }

    fn compute(&self, panel: &Panel) -> Result<FeatureOutput, FeatureError> {
        Ok(FeatureOutput::Single(cross_section(
            panel,
            "tick_volume",
            |v| math::nan_median(v),
        )))
    }
}

/// Rolling Pearson correlation of close for every symbol pair, one
/// sub-column `{A}_{B}` per pair in symbol order.
#[derive(Debug, Clone)]
pub struct ClosePriceCorrelation {
    window: usize,
    name: String,
}

impl ClosePriceCorrelation {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            name: format!("ClosePriceCorrelation_{window}"),
        }
    }
}

impl UniversalFeature for ClosePriceCorrelation {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.window.saturating_sub(1)
    }

    fn compute(&self, panel: &Panel) -> Result<FeatureOutput, FeatureError> {
        let closes: Vec<(&str, &[f64])> = panel.columns("close").collect();
        let n = panel.len();
        let mut pairs = Vec::new();
        for (a_idx, (a, a_close)) in closes.iter().enumerate() {
            for (b, b_close) in &closes[a_idx + 1..] {
                let mut corr = vec![f64::NAN; n];
                if self.window >= 2 && n >= self.window {
                    for i in (self.window - 1)..n {
                        let start = i + 1 - self.window;
                        let wa = &a_close[start..=i];
                        let wb = &b_close[start..=i];
                        if wa.iter().chain(wb).any(|v| v.is_nan()) {
                            continue;
                        }
                        corr[i] = math::pearson(wa, wb);
                    }
                }
                pairs.push((format!("{a}_{b}"), corr));
            }
        }
        Ok(FeatureOutput::Multi(pairs))
    }
}

pub(crate) fn build_average_close(
    params: &ParamSet,
) -> Result<Box<dyn UniversalFeature>, FeatureError> {
    Params::new("AverageCloseAllSymbols", params, &[])?;
    Ok(Box::new(AverageCloseAllSymbols))
}

pub(crate) fn build_median_volume(
    params: &ParamSet,
) -> Result<Box<dyn UniversalFeature>, FeatureError> {
    Params::new("MedianVolumeAllSymbols", params, &[])?;
    Ok(Box::new(MedianVolumeAllSymbols))
}

pub(crate) fn build_close_correlation(
    params: &ParamSet,
) -> Result<Box<dyn UniversalFeature>, FeatureError> {
    let p = Params::new("ClosePriceCorrelation", params, &["window"])?;
    Ok(Box::new(ClosePriceCorrelation::new(p.period("window")?)))
}
