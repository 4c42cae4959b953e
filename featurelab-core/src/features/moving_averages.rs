//! Moving averages of close: SMA, EMA, WMA, HMA, plus intraday VWAP.

use super::math;
use super::params::{ParamSet, Params};
use super::{Continuity, Feature, FeatureError, FeatureOutput};
use crate::domain::Frame;
use chrono::NaiveDate;

/// Simple Moving Average. Lookback: length - 1.
#[derive(Debug, Clone)]
pub struct Sma {
    length: usize,
    name: String,
}

impl Sma {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            name: format!("SMA_{length}"),
        }
    }
}

impl Feature for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        Ok(FeatureOutput::Single(math::rolling_mean(close, self.length)))
    }
}

/// Exponential Moving Average, seeded with the SMA of the first `length` closes.
#[derive(Debug, Clone)]
pub struct Ema {
    length: usize,
    name: String,
}

impl Ema {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            name: format!("EMA_{length}"),
        }
    }
}

impl Feature for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        Ok(FeatureOutput::Single(math::ema(close, self.length)))
    }
}

/// Linearly Weighted Moving Average.
#[derive(Debug, Clone)]
pub struct Wma {
    length: usize,
    name: String,
}

impl Wma {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            name: format!("WMA_{length}"),
        }
    }
}

impl Feature for Wma {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        Ok(FeatureOutput::Single(math::wma(close, self.length)))
    }
}

/// Hull Moving Average: WMA(2 * WMA(n/2) - WMA(n), floor(sqrt(n))).
#[derive(Debug, Clone)]
pub struct Hma {
    length: usize,
    half: usize,
    root: usize,
    name: String,
}

impl Hma {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            half: (length / 2).max(1),
            root: ((length as f64).sqrt().floor() as usize).max(1),
            name: format!("HMA_{length}"),
        }
    }
}

impl Feature for Hma {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1) + self.root.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        let fast = math::wma(close, self.half);
        let slow = math::wma(close, self.length);
        let raw: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| 2.0 * f - s).collect();
        Ok(FeatureOutput::Single(math::wma(&raw, self.root)))
    }
}

/// Volume Weighted Average Price, anchored at each UTC day.
///
/// Uses the typical price (high + low + close) / 3 weighted by tick volume.
/// A day with no volume so far yields NaN.
#[derive(Debug, Clone, Default)]
pub struct Vwap;

impl Feature for Vwap {
    fn name(&self) -> &str {
        "VWAP"
    }

    fn warmup(&self) -> usize {
        0
    }

    fn continuity(&self) -> Continuity {
        Continuity::Daily
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let high = frame.require("high")?;
        let low = frame.require("low")?;
        let close = frame.require("close")?;
        let volume = frame.require("tick_volume")?;

        let mut result = vec![f64::NAN; frame.len()];
        let mut day: Option<NaiveDate> = None;
        let (mut pv, mut vol) = (0.0, 0.0);
        for (i, ts) in frame.timestamps().iter().enumerate() {
            let today = ts.date_naive();
            if day != Some(today) {
                day = Some(today);
                pv = 0.0;
                vol = 0.0;
            }
            let typical = (high[i] + low[i] + close[i]) / 3.0;
            if typical.is_nan() || volume[i].is_nan() {
                continue;
            }
            pv += typical * volume[i];
            vol += volume[i];
            if vol > 0.0 {
                result[i] = pv / vol;
            }
        }
        Ok(FeatureOutput::Single(result))
    }
}

// ── Constructors ─────────────────────────────────────────────────────

pub(crate) fn build_sma(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("SMA", params, &["length"])?;
    Ok(Box::new(Sma::new(p.period("length")?)))
}

pub(crate) fn build_ema(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("EMA", params, &["length"])?;
    Ok(Box::new(Ema::new(p.period("length")?)))
}

pub(crate) fn build_wma(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("WMA", params, &["length"])?;
    Ok(Box::new(Wma::new(p.period("length")?)))
}

pub(crate) fn build_hma(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("HMA", params, &["length"])?;
    Ok(Box::new(Hma::new(p.period("length")?)))
}

pub(crate) fn build_vwap(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    Params::new("VWAP", params, &[])?;
    Ok(Box::new(Vwap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{assert_approx, make_frame, single, DEFAULT_EPSILON};

    #[test]
    fn sma_5_basic() {
        let frame = make_frame(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
        let result = single(Sma::new(5).compute(&frame).unwrap());
        assert_eq!(result.len(), 7);
        for v in &result[..4] {
            assert!(v.is_nan());
        }
        assert_approx(result[4], 12.0, DEFAULT_EPSILON);
        assert_approx(result[6], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_too_few_bars() {
        let frame = make_frame(&[10.0, 11.0]);
        let result = single(Sma::new(5).compute(&frame).unwrap());
        assert!(result.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_3_known_values() {
        let frame = make_frame(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let result = single(Ema::new(3).compute(&frame).unwrap());
        assert_approx(result[2], 11.0, DEFAULT_EPSILON);
        assert_approx(result[3], 12.0, DEFAULT_EPSILON);
        assert_approx(result[4], 13.0, DEFAULT_EPSILON);
    }

    #[test]
    fn wma_linear_series_lags_less_than_sma() {
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let frame = make_frame(&closes);
        let sma = single(Sma::new(4).compute(&frame).unwrap());
        let wma = single(Wma::new(4).compute(&frame).unwrap());
        assert!(wma[9] > sma[9]);
        // (7 + 2*8 + 3*9 + 4*10) / 10 = 9.0
        assert_approx(wma[9], 9.0, DEFAULT_EPSILON);
    }

    #[test]
    fn hma_tracks_linear_trend() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let frame = make_frame(&closes);
        let hma = Hma::new(9);
        let result = single(hma.compute(&frame).unwrap());
        assert!(result[hma.warmup() - 1].is_nan());
        assert!(!result[hma.warmup()].is_nan());
        // HMA removes lag on a straight line.
        assert_approx(result[29], 30.0, 1e-9);
    }

    #[test]
    fn vwap_resets_each_day() {
        use crate::domain::Bar;
        use chrono::{TimeZone, Utc};
        let bar = |h: u32, m: u32, day: u32, price: f64, volume: u64| Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 9, day, h, m, 0).unwrap(),
            open: price,
            high: price,
            low: price,
            close: price,
            tick_volume: volume,
            spread: 0.0,
        };
        let frame = Frame::from_bars(&[
            bar(23, 58, 2, 10.0, 1),
            bar(23, 59, 2, 20.0, 3),
            bar(0, 0, 3, 50.0, 2),
        ]);
        let out = single(Vwap.compute(&frame).unwrap());
        assert_approx(out[0], 10.0, DEFAULT_EPSILON);
        // (10*1 + 20*3) / 4
        assert_approx(out[1], 17.5, DEFAULT_EPSILON);
        // New UTC day starts from scratch.
        assert_approx(out[2], 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn vwap_zero_volume_is_nan() {
        let mut frame = make_frame(&[10.0]);
        frame.insert_column("tick_volume", vec![0.0]).unwrap();
        let out = single(Vwap.compute(&frame).unwrap());
        assert!(out[0].is_nan());
    }

    #[test]
    fn constructor_rejects_bad_params() {
        let mut params = ParamSet::new();
        params.insert("length".into(), crate::features::ParamValue::Int(0));
        assert!(build_sma(&params).is_err());
        assert!(build_vwap(&params).is_err());
        assert!(build_vwap(&ParamSet::new()).is_ok());
    }
}
