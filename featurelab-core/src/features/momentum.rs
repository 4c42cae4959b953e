//! Momentum oscillators: RSI, MACD and the stochastic oscillator.

use super::math;
use super::params::{ParamSet, Params};
use super::{Feature, FeatureError, FeatureOutput};
use crate::domain::Frame;

/// Relative Strength Index with Wilder smoothing.
///
/// RSI = 100 - 100 / (1 + avg_gain / avg_loss). Lookback: length.
/// avg_loss == 0 → 100; avg_gain == 0 → 0; no movement at all → 50.
#[derive(Debug, Clone)]
pub struct Rsi {
    length: usize,
    name: String,
}

impl Rsi {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            name: format!("RSI_{length}"),
        }
    }
}

impl Feature for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        let n = close.len();
        let mut gains = vec![f64::NAN; n];
        let mut losses = vec![f64::NAN; n];
        for i in 1..n {
            let change = close[i] - close[i - 1];
            if change.is_nan() {
                continue;
            }
            gains[i] = change.max(0.0);
            losses[i] = (-change).max(0.0);
        }

        let avg_gain = math::wilder(&gains, self.length);
        let avg_loss = math::wilder(&losses, self.length);
        let result = avg_gain
            .iter()
            .zip(&avg_loss)
            .map(|(&g, &l)| {
                if g.is_nan() || l.is_nan() {
                    f64::NAN
                } else {
                    rsi_value(g, l)
                }
            })
            .collect();
        Ok(FeatureOutput::Single(result))
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Moving Average Convergence Divergence.
///
/// Sub-columns: `macd` = EMA(fast) - EMA(slow), `signal` = EMA(macd, signal),
/// `histogram` = macd - signal.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast,
            slow,
            signal,
            name: format!("MACD_{fast}_{slow}_{signal}"),
        }
    }
}

impl Feature for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        (self.slow - 1) + (self.signal - 1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        let fast = math::ema(close, self.fast);
        let slow = math::ema(close, self.slow);
        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = math::ema(&macd, self.signal);
        let histogram: Vec<f64> = macd.iter().zip(&signal).map(|(m, s)| m - s).collect();
        Ok(FeatureOutput::Multi(vec![
            ("macd".into(), macd),
            ("histogram".into(), histogram),
            ("signal".into(), signal),
        ]))
    }
}

/// Stochastic oscillator.
///
/// `k` = 100 * (close - lowest low) / (highest high - lowest low) over `k`
/// bars; `d` = SMA(k, d). A flat window has no range and reads 50.
#[derive(Debug, Clone)]
pub struct Stoch {
    k: usize,
    d: usize,
    name: String,
}

impl Stoch {
    pub fn new(k: usize, d: usize) -> Self {
        Self {
            k,
            d,
            name: format!("STOCH_{k}_{d}"),
        }
    }
}

impl Feature for Stoch {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        (self.k - 1) + (self.d - 1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let high = frame.require("high")?;
        let low = frame.require("low")?;
        let close = frame.require("close")?;

        let highest = math::rolling_max(high, self.k);
        let lowest = math::rolling_min(low, self.k);
        let k: Vec<f64> = (0..close.len())
            .map(|i| {
                let range = highest[i] - lowest[i];
                if range.is_nan() || close[i].is_nan() {
                    f64::NAN
                } else if range == 0.0 {
                    50.0
                } else {
                    100.0 * (close[i] - lowest[i]) / range
                }
            })
            .collect();
        let d = math::rolling_mean(&k, self.d);
        Ok(FeatureOutput::Multi(vec![("k".into(), k), ("d".into(), d)]))
    }
}

// ── Constructors ─────────────────────────────────────────────────────

pub(crate) fn build_rsi(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("RSI", params, &["length"])?;
    Ok(Box::new(Rsi::new(p.period("length")?)))
}

pub(crate) fn build_macd(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("MACD", params, &["fast", "slow", "signal"])?;
    let fast = p.period("fast")?;
    let slow = p.period("slow")?;
    let signal = p.period("signal")?;
    if fast >= slow {
        return Err(FeatureError::InvalidParam {
            kind: "MACD".into(),
            param: "fast".into(),
            reason: format!("fast ({fast}) must be shorter than slow ({slow})"),
        });
    }
    Ok(Box::new(Macd::new(fast, slow, signal)))
}

pub(crate) fn build_stoch(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("STOCH", params, &["k", "d"])?;
    Ok(Box::new(Stoch::new(p.period("k")?, p.period("d")?)))
}
