//! Simple transforms of close: log returns, percentage change and z-score.

use super::math;
use super::params::{ParamSet, Params};
use super::{Feature, FeatureError, FeatureOutput};
use crate::domain::Frame;

#[derive(Debug, Clone, Default)]
pub struct LogReturns;

impl Feature for LogReturns {
    fn name(&self) -> &str {
        "Log_Returns"
    }

    fn warmup(&self) -> usize {
        1
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        Ok(FeatureOutput::Single(math::log_returns(
            frame.require("close")?,
        )))
    }
}

/// Percentage change of close over `periods` bars, as a fraction.
#[derive(Debug, Clone)]
pub struct PctChange {
    periods: usize,
    name: String,
}

impl PctChange {
    pub fn new(periods: usize) -> Self {
        Self {
            periods,
            name: format!("Pct_Change_{periods}"),
        }
    }
}

impl Feature for PctChange {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.periods
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        Ok(FeatureOutput::Single(math::pct_change(
            frame.require("close")?,
            self.periods,
        )))
    }
}

/// (close - rolling mean) / rolling sample std. A flat window is NaN.
#[derive(Debug, Clone)]
pub struct ZScore {
    window: usize,
    name: String,
}

impl ZScore {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            name: format!("Z_Score_{window}"),
        }
    }
}

impl Feature for ZScore {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.window.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        let mean = math::rolling_mean(close, self.window);
        let sd = math::rolling_std(close, self.window, 1);
        let result = (0..close.len())
            .map(|i| {
                if sd[i] == 0.0 {
                    f64::NAN
                } else {
                    (close[i] - mean[i]) / sd[i]
                }
            })
            .collect();
        Ok(FeatureOutput::Single(result))
    }
}

pub(crate) fn build_log_returns(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    Params::new("LogReturns", params, &[])?;
    Ok(Box::new(LogReturns))
}

pub(crate) fn build_pct_change(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("PctChange", params, &["periods"])?;
    Ok(Box::new(PctChange::new(p.period("periods")?)))
}

pub(crate) fn build_zscore(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("ZScore", params, &["window"])?;
    let window = p.period("window")?;
    if window < 2 {
        return Err(FeatureError::InvalidParam {
            kind: "ZScore".into(),
            param: "window".into(),
            reason: "a sample standard deviation needs at least 2 values".into(),
        });
    }
    Ok(Box::new(ZScore::new(window)))
}
