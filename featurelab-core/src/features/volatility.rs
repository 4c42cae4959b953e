//! Volatility measures: Bollinger Bands, ATR and rolling return volatility.

use super::math;
use super::params::{ParamSet, Params};
use super::{Feature, FeatureError, FeatureOutput};
use crate::domain::Frame;

/// Bollinger Bands around an SMA of close, using the population standard
/// deviation.
///
/// Sub-columns in order: `lower`, `middle`, `upper`, `bandwidth`
/// (100 * (upper - lower) / middle) and `percent` ((close - lower) /
/// (upper - lower)). A zero-width band leaves `percent` NaN.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    length: usize,
    std: f64,
    name: String,
}

impl BollingerBands {
    pub fn new(length: usize, std: f64) -> Self {
        Self {
            length,
            std,
            name: format!("BBANDS_{length}_{std}"),
        }
    }
}

impl Feature for BollingerBands {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length.saturating_sub(1)
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let close = frame.require("close")?;
        let middle = math::rolling_mean(close, self.length);
        let sd = math::rolling_std(close, self.length, 0);

        let n = close.len();
        let mut lower = vec![f64::NAN; n];
        let mut upper = vec![f64::NAN; n];
        let mut bandwidth = vec![f64::NAN; n];
        let mut percent = vec![f64::NAN; n];
        for i in 0..n {
            if middle[i].is_nan() || sd[i].is_nan() {
                continue;
            }
            lower[i] = middle[i] - self.std * sd[i];
            upper[i] = middle[i] + self.std * sd[i];
            if middle[i] != 0.0 {
                bandwidth[i] = 100.0 * (upper[i] - lower[i]) / middle[i];
            }
            let width = upper[i] - lower[i];
            if width != 0.0 {
                percent[i] = (close[i] - lower[i]) / width;
            }
        }

        Ok(FeatureOutput::Multi(vec![
            ("lower".into(), lower),
            ("middle".into(), middle),
            ("upper".into(), upper),
            ("bandwidth".into(), bandwidth),
            ("percent".into(), percent),
        ]))
    }
}

/// Average True Range with Wilder smoothing. Lookback: length (first bar has
/// no true range).
#[derive(Debug, Clone)]
pub struct Atr {
    length: usize,
    name: String,
}

impl Atr {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            name: format!("ATR_{length}"),
        }
    }
}

impl Feature for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.length
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let tr = math::true_range(
            frame.require("high")?,
            frame.require("low")?,
            frame.require("close")?,
        );
        Ok(FeatureOutput::Single(math::wilder(&tr, self.length)))
    }
}

/// Rolling sample standard deviation of the `returns` base column.
#[derive(Debug, Clone)]
pub struct Volatility {
    window: usize,
    name: String,
}

impl Volatility {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            name: format!("Volatility_{window}"),
        }
    }
}

impl Feature for Volatility {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.window
    }

    fn compute(&self, frame: &Frame) -> Result<FeatureOutput, FeatureError> {
        let returns = frame.require("returns")?;
        Ok(FeatureOutput::Single(math::rolling_std(returns, self.window, 1)))
    }
}

// ── Constructors ─────────────────────────────────────────────────────

pub(crate) fn build_bbands(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("BBANDS", params, &["length", "std"])?;
    let length = p.period("length")?;
    let std = p.number("std")?;
    if std <= 0.0 {
        return Err(FeatureError::InvalidParam {
            kind: "BBANDS".into(),
            param: "std".into(),
            reason: format!("must be > 0, got {std}"),
        });
    }
    Ok(Box::new(BollingerBands::new(length, std)))
}

pub(crate) fn build_atr(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("ATR", params, &["length"])?;
    Ok(Box::new(Atr::new(p.period("length")?)))
}

pub(crate) fn build_volatility(params: &ParamSet) -> Result<Box<dyn Feature>, FeatureError> {
    let p = Params::new("Volatility", params, &["window"])?;
    Ok(Box::new(Volatility::new(p.period("window")?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FrameError;
    use crate::features::{assert_approx, make_frame, single, sub, DEFAULT_EPSILON};

    #[test]
    fn bbands_known_values() {
        // Window [2, 4, 6]: mean 4, population std sqrt(8/3)
        let frame = make_frame(&[2.0, 4.0, 6.0]);
        let out = BollingerBands::new(3, 2.0).compute(&frame).unwrap();
        let sd = (8.0_f64 / 3.0).sqrt();
        assert_approx(sub(&out, "middle")[2], 4.0, DEFAULT_EPSILON);
        assert_approx(sub(&out, "upper")[2], 4.0 + 2.0 * sd, DEFAULT_EPSILON);
        assert_approx(sub(&out, "lower")[2], 4.0 - 2.0 * sd, DEFAULT_EPSILON);
        assert_approx(sub(&out, "bandwidth")[2], 100.0 * 4.0 * sd / 4.0, 1e-9);
        let expected_pct = (6.0 - (4.0 - 2.0 * sd)) / (4.0 * sd);
        assert_approx(sub(&out, "percent")[2], expected_pct, 1e-9);
        assert!(sub(&out, "middle")[1].is_nan());
    }

    #[test]
    fn bbands_name_drops_integral_fraction() {
        assert_eq!(BollingerBands::new(20, 2.0).name(), "BBANDS_20_2");
        assert_eq!(BollingerBands::new(20, 2.5).name(), "BBANDS_20_2.5");
    }

    #[test]
    fn bbands_flat_series_has_no_percent() {
        let frame = make_frame(&[5.0, 5.0, 5.0]);
        let out = BollingerBands::new(3, 2.0).compute(&frame).unwrap();
        assert_approx(sub(&out, "bandwidth")[2], 0.0, DEFAULT_EPSILON);
        assert!(sub(&out, "percent")[2].is_nan());
    }

    #[test]
    fn atr_constant_range() {
        // make_frame puts high/low one unit outside open/close; with a flat
        // close every true range is 2.
        let frame = make_frame(&[100.0; 6]);
        let atr = Atr::new(3);
        let result = single(atr.compute(&frame).unwrap());
        assert!(result[2].is_nan());
        assert_approx(result[3], 2.0, DEFAULT_EPSILON);
        assert_approx(result[5], 2.0, DEFAULT_EPSILON);
    }

    #[test]
    fn volatility_requires_returns_column() {
        let frame = make_frame(&[1.0, 2.0, 3.0]);
        assert_eq!(
            Volatility::new(2).compute(&frame).unwrap_err(),
            FeatureError::Frame(FrameError::MissingColumn("returns".into()))
        );
    }

    #[test]
    fn volatility_is_sample_std_of_returns() {
        let mut frame = make_frame(&[1.0, 2.0, 3.0, 4.0]);
        frame
            .insert_column("returns", vec![f64::NAN, 0.01, 0.03, 0.02])
            .unwrap();
        let result = single(Volatility::new(3).compute(&frame).unwrap());
        assert!(result[2].is_nan());
        assert_approx(result[3], 0.01, 1e-12);
    }

    #[test]
    fn bbands_rejects_non_positive_std() {
        let params: ParamSet = [
            ("length".to_string(), crate::features::ParamValue::Int(20)),
            ("std".to_string(), crate::features::ParamValue::Float(0.0)),
        ]
        .into_iter()
        .collect();
        assert!(build_bbands(&params).is_err());
    }
}
