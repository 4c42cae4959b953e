//! Feature computation: the registry of feature kinds, parameter expansion,
//! the concrete indicator math and the pipeline that applies them to frames.
//!
//! A feature reads columns from a [`Frame`] and returns one column
//! ([`FeatureOutput::Single`]) or several named sub-columns
//! ([`FeatureOutput::Multi`]). Values before the feature's warmup are NaN.

pub mod expand;
pub mod math;
pub mod momentum;
pub mod moving_averages;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod transforms;
pub mod universal;
pub mod volatility;
pub mod volume;

pub use expand::{expand, expand_all, ConfigError, FeatureConfig, FeatureInstance, ParamSchema};
pub use params::{ParamSet, ParamValue};
pub use pipeline::{
    apply_base, apply_features, panic_message, ApplySummary, FeatureEngine, BASE_COLUMNS,
};
pub use registry::{Category, Constructor, FeatureRegistry, FeatureSpec};
pub use universal::{Panel, UniversalFeature};

use crate::domain::{Frame, FrameError};
use thiserror::Error;

/// Errors raised while constructing or computing a single feature instance.
///
/// The pipeline logs and skips these; they never abort a run.
#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("{kind}: missing parameter '{param}'")]
    MissingParam { kind: String, param: String },

    #[error("{kind}: unexpected parameter '{param}'")]
    UnexpectedParam { kind: String, param: String },

    #[error("{kind}: invalid value for '{param}': {reason}")]
    InvalidParam {
        kind: String,
        param: String,
        reason: String,
    },

    #[error("{kind} is a {actual} feature")]
    WrongCategory { kind: String, actual: Category },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("feature panicked: {0}")]
    Panicked(String),
}

/// The result of computing one feature over a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutput {
    Single(Vec<f64>),
    /// Sub-column suffix and values, merged as `{name}_{suffix}`.
    Multi(Vec<(String, Vec<f64>)>),
}

/// How a feature's value at a row depends on the history before it, which
/// decides what a resumed run must do to reproduce a cold run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Depends on at most the declared lookback of preceding bars.
    Windowed,
    /// A running total from the first bar ever processed. A resumed run
    /// shifts its values onto the last persisted value.
    Cumulative,
    /// Resets at each UTC midnight. A resumed run must re-fetch from the start
    /// of the checkpoint's day.
    Daily,
}

/// A symbol-specific feature: a pure function of one symbol's frame.
pub trait Feature: Send + Sync {
    /// Output name, e.g. `SMA_20`.
    fn name(&self) -> &str;

    /// Bars needed before the first valid output value.
    fn warmup(&self) -> usize;

    fn continuity(&self) -> Continuity {
        Continuity::Windowed
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError>;
}

/// Synthetic bars for feature tests: open = previous close, high/low one unit
/// outside the open/close range, tick volume 1000, one bar per minute.
#[cfg(test)]
pub fn make_frame(closes: &[f64]) -> Frame {
    use crate::domain::Bar;
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 9, 2, 0, 0, 0).unwrap();
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: base + chrono::Duration::minutes(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                tick_volume: 1000,
                spread: 1.0,
            }
        })
        .collect();
    Frame::from_bars(&bars)
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for feature tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

/// Unwrap a single-column output in tests.
#[cfg(test)]
pub fn single(output: FeatureOutput) -> Vec<f64> {
    match output {
        FeatureOutput::Single(v) => v,
        FeatureOutput::Multi(_) => panic!("expected single-column output"),
    }
}

/// Look up a sub-column of a multi-column output in tests.
#[cfg(test)]
pub fn sub(output: &FeatureOutput, name: &str) -> Vec<f64> {
    match output {
        FeatureOutput::Multi(cols) => cols
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| panic!("no sub-column '{name}'")),
        FeatureOutput::Single(_) => panic!("expected multi-column output"),
    }
}
